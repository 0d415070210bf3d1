// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The `default` feature.
//!
//! Always enabled. It requires the cluster agent and the node agent and
//! provides what every deployment needs:
//!
//! - service accounts and baseline RBAC for each enabled component
//! - the cluster agent `Service`
//! - the credentials `Secret` when keys are given in plaintext
//! - the cluster agent token `Secret` when no token secret is referenced
//! - the install-info `ConfigMap`
//! - common environment variables (cluster name, site, tags, keys, token)
//!
//! When neither `clusterAgentToken` nor `clusterAgentTokenSecret` is set the
//! token is taken from `status.clusterAgent.generatedToken`, or generated on
//! the first pass. The reconciler copies it back to status so that later
//! passes produce the same secret.

use super::rbac::{
    leader_election_rules, named_rule, non_resource_rule, rule, AUTOSCALING_API_GROUP,
    CLUSTER_ID_RESOURCE_NAME, COORDINATION_API_GROUP, CORE_API_GROUP, CREATE, DATADOG_API_GROUP,
    GET, KUBE_SYSTEM_NAMESPACE, LIST, OPENSHIFT_QUOTA_API_GROUP, UPDATE, WATCH,
};
use super::{node_agent_container, Feature, FeatureId, RequiredComponent, RequiredComponents};
use crate::component::Component;
use crate::constants::{
    API_KEY_SECRET_KEY, APP_KEY_SECRET_KEY, CLUSTER_AGENT_CONTAINER, CLUSTER_AGENT_PORT,
    CLUSTER_AGENT_PORT_NAME, CLUSTER_AGENT_SUFFIX, TOKEN_SECRET_KEY,
};
use crate::crd::{DatadogAgent, SecretReference};
use crate::errors::{FeatureError, Result};
use crate::hashing::{checksum_annotation_key, content_hash};
use crate::labels::selector_labels;
use crate::managers::ResourceManagers;
use crate::platform::{from_dynamic, ObjectKind};
use crate::podtemplate::{ContainerTarget, PodTemplateChanges};
use k8s_openapi::api::core::v1::{
    EnvVar, EnvVarSource, Secret, SecretKeySelector, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::api::rbac::v1::PolicyRule;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use rand::distr::{Alphanumeric, SampleString};
use std::collections::BTreeMap;
use tracing::debug;

const FEATURE: &str = "default";

/// Length of a generated cluster agent token.
const GENERATED_TOKEN_LENGTH: usize = 32;

/// Key of the install-info config map payload.
const INSTALL_INFO_KEY: &str = "install_info";

pub const DD_API_KEY: &str = "DD_API_KEY";
pub const DD_APP_KEY: &str = "DD_APP_KEY";
pub const DD_CLUSTER_AGENT_AUTH_TOKEN: &str = "DD_CLUSTER_AGENT_AUTH_TOKEN";
pub const DD_CLUSTER_NAME: &str = "DD_CLUSTER_NAME";
pub const DD_SITE: &str = "DD_SITE";
pub const DD_TAGS: &str = "DD_TAGS";
pub const DD_CLUSTER_AGENT_ENABLED: &str = "DD_CLUSTER_AGENT_ENABLED";
pub const DD_CLUSTER_AGENT_KUBERNETES_SERVICE_NAME: &str = "DD_CLUSTER_AGENT_KUBERNETES_SERVICE_NAME";
pub const DD_CLUSTER_AGENT_SERVICE_ACCOUNT_NAME: &str = "DD_CLUSTER_AGENT_SERVICE_ACCOUNT_NAME";
pub const DD_AGENT_DAEMONSET: &str = "DD_AGENT_DAEMONSET";
pub const DD_CLUSTER_AGENT_DEPLOYMENT: &str = "DD_CLUSTER_AGENT_DEPLOYMENT";
pub const DD_DATADOG_AGENT_CUSTOM_RESOURCE: &str = "DD_DATADOG_AGENT_CUSTOM_RESOURCE";

/// Name of the operator-managed credentials secret.
#[must_use]
pub fn credentials_secret_name(owner_name: &str) -> String {
    format!("{owner_name}-secret")
}

/// Name of the operator-managed cluster agent token secret.
#[must_use]
pub fn token_secret_name(owner_name: &str) -> String {
    format!("{owner_name}-token")
}

/// Name of the install-info config map.
#[must_use]
pub fn install_info_config_map_name(owner_name: &str) -> String {
    format!("{owner_name}-install-info")
}

/// Build a fresh `default` feature.
#[must_use]
pub fn build() -> Box<dyn Feature> {
    Box::<DefaultFeature>::default()
}

/// Where an environment variable sourced from a secret reads its value.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SecretKeyRef {
    secret: String,
    key: String,
}

impl SecretKeyRef {
    fn new(secret: &str, key: &str) -> Self {
        Self {
            secret: secret.to_string(),
            key: key.to_string(),
        }
    }

    fn env(&self, name: &str) -> EnvVar {
        EnvVar {
            name: name.to_string(),
            value: None,
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: self.secret.clone(),
                    key: self.key.clone(),
                    optional: None,
                }),
                ..EnvVarSource::default()
            }),
        }
    }
}

impl From<&SecretReference> for SecretKeyRef {
    fn from(reference: &SecretReference) -> Self {
        Self::new(&reference.secret_name, &reference.key_name)
    }
}

#[derive(Debug, Clone, Default)]
struct ComponentAccount {
    service_account: String,
    workload: String,
}

/// Baseline configuration shared by every component.
#[derive(Debug, Default)]
pub struct DefaultFeature {
    owner_name: String,
    owner_namespace: String,

    agent: ComponentAccount,
    cluster_agent: ComponentAccount,
    cluster_checks_runner: ComponentAccount,
    cluster_agent_service: String,
    disable_non_resource_rules: bool,
    single_container: bool,

    cluster_name: Option<String>,
    site: Option<String>,
    tags: Vec<String>,

    api_key: Option<SecretKeyRef>,
    app_key: Option<SecretKeyRef>,
    /// Plaintext keys to store in the credentials secret.
    credentials_data: BTreeMap<String, String>,

    token: Option<SecretKeyRef>,
    /// Token to store in the token secret, `None` when a secret is referenced.
    token_value: Option<String>,
    token_checksum: Option<String>,
}

impl DefaultFeature {
    fn configure_credentials(&mut self, owner: &DatadogAgent) -> Result<()> {
        let Some(credentials) = owner.spec.global.as_ref().and_then(|g| g.credentials.as_ref()) else {
            return Ok(());
        };

        exclusive(
            credentials.api_key.is_some(),
            credentials.api_secret.is_some(),
            "global.credentials.apiKey",
            "global.credentials.apiSecret",
        )?;
        exclusive(
            credentials.app_key.is_some(),
            credentials.app_secret.is_some(),
            "global.credentials.appKey",
            "global.credentials.appSecret",
        )?;

        let managed_secret = credentials_secret_name(&self.owner_name);
        if let Some(api_key) = &credentials.api_key {
            self.credentials_data
                .insert(API_KEY_SECRET_KEY.to_string(), api_key.clone());
            self.api_key = Some(SecretKeyRef::new(&managed_secret, API_KEY_SECRET_KEY));
        } else if let Some(reference) = &credentials.api_secret {
            self.api_key = Some(reference.into());
        }

        if let Some(app_key) = &credentials.app_key {
            self.credentials_data
                .insert(APP_KEY_SECRET_KEY.to_string(), app_key.clone());
            self.app_key = Some(SecretKeyRef::new(&managed_secret, APP_KEY_SECRET_KEY));
        } else if let Some(reference) = &credentials.app_secret {
            self.app_key = Some(reference.into());
        }
        Ok(())
    }

    fn configure_token(&mut self, owner: &DatadogAgent) -> Result<()> {
        let global = owner.spec.global.as_ref();
        let plaintext = global.and_then(|g| g.cluster_agent_token.clone());
        let reference = global.and_then(|g| g.cluster_agent_token_secret.as_ref());
        exclusive(
            plaintext.is_some(),
            reference.is_some(),
            "global.clusterAgentToken",
            "global.clusterAgentTokenSecret",
        )?;

        if let Some(reference) = reference {
            self.token = Some(reference.into());
            return Ok(());
        }

        let value = plaintext
            .or_else(|| {
                owner
                    .status
                    .as_ref()
                    .and_then(|s| s.cluster_agent.as_ref())
                    .and_then(|s| s.generated_token.clone())
                    .filter(|t| !t.is_empty())
            })
            .unwrap_or_else(|| {
                debug!(owner = %self.owner_name, "Generating cluster agent token");
                Alphanumeric.sample_string(&mut rand::rng(), GENERATED_TOKEN_LENGTH)
            });

        let data = token_data(&value);
        self.token_checksum = Some(content_hash(&data).map_err(|e| FeatureError::Serialization {
            feature: FEATURE.to_string(),
            reason: e.to_string(),
        })?);
        self.token = Some(SecretKeyRef::new(
            &token_secret_name(&self.owner_name),
            TOKEN_SECRET_KEY,
        ));
        self.token_value = Some(value);
        Ok(())
    }

    /// Variables every component gets.
    fn common_env(&self, changes: &mut PodTemplateChanges) {
        if let Some(cluster_name) = &self.cluster_name {
            changes.add_env_var(DD_CLUSTER_NAME, cluster_name);
        }
        if let Some(site) = &self.site {
            changes.add_env_var(DD_SITE, site);
        }
        if !self.tags.is_empty() {
            changes.add_env_var(DD_TAGS, &self.tags.join(" "));
        }
        if let Some(api_key) = &self.api_key {
            changes.add_env(ContainerTarget::All, api_key.env(DD_API_KEY), None);
        }
        if let Some(token) = &self.token {
            changes.add_env(
                ContainerTarget::All,
                token.env(DD_CLUSTER_AGENT_AUTH_TOKEN),
                None,
            );
        }
        if let Some(checksum) = &self.token_checksum {
            changes.add_annotation(&checksum_annotation_key(FeatureId::Default.as_str()), checksum);
        }
    }

    /// Variables pointing an agent at the cluster agent service.
    fn cluster_agent_client_env(&self, changes: &mut PodTemplateChanges) {
        changes
            .add_env_var(DD_CLUSTER_AGENT_ENABLED, "true")
            .add_env_var(
                DD_CLUSTER_AGENT_KUBERNETES_SERVICE_NAME,
                &self.cluster_agent_service,
            );
    }

    fn agent_dependencies(&self, managers: &mut ResourceManagers) -> Result<()> {
        let component = Component::NodeAgent;
        let mut rbac = managers.rbac();
        rbac.add_service_account_by_component(
            &self.owner_namespace,
            &self.agent.service_account,
            component,
        )?;
        rbac.add_cluster_policy_rules_by_component(
            &self.owner_namespace,
            &component.cluster_rbac_resource_name(&self.owner_namespace, &self.owner_name),
            &self.agent.service_account,
            agent_cluster_role_rules(self.disable_non_resource_rules),
            component,
        )
    }

    fn cluster_agent_dependencies(&self, managers: &mut ResourceManagers) -> Result<()> {
        let component = Component::ClusterAgent;
        let rbac_name = component.rbac_resource_name(&self.owner_name);
        {
            let mut rbac = managers.rbac();
            rbac.add_service_account_by_component(
                &self.owner_namespace,
                &self.cluster_agent.service_account,
                component,
            )?;
            rbac.add_policy_rules_by_component(
                &self.owner_namespace,
                &rbac_name,
                &self.cluster_agent.service_account,
                cluster_agent_role_rules(&self.owner_name),
                component,
            )?;
            rbac.add_cluster_policy_rules_by_component(
                &self.owner_namespace,
                &component.cluster_rbac_resource_name(&self.owner_namespace, &self.owner_name),
                &self.cluster_agent.service_account,
                cluster_agent_cluster_role_rules(self.disable_non_resource_rules),
                component,
            )?;
        }

        let key = managers
            .store_mut()
            .add_or_update(ObjectKind::Service, &self.cluster_agent_service_object())?;
        managers.track(component, key);

        if let (Some(value), Some(checksum)) = (&self.token_value, &self.token_checksum) {
            let mut annotations = BTreeMap::new();
            annotations.insert(
                checksum_annotation_key(FeatureId::Default.as_str()),
                checksum.clone(),
            );
            let secret = Secret {
                metadata: ObjectMeta {
                    name: Some(token_secret_name(&self.owner_name)),
                    namespace: Some(self.owner_namespace.clone()),
                    annotations: Some(annotations),
                    ..ObjectMeta::default()
                },
                string_data: Some(token_data(value)),
                ..Secret::default()
            };
            managers.store_mut().add_or_update(ObjectKind::Secret, &secret)?;
        }
        Ok(())
    }

    fn cluster_checks_runner_dependencies(&self, managers: &mut ResourceManagers) -> Result<()> {
        let component = Component::ClusterChecksRunner;
        let mut rbac = managers.rbac();
        rbac.add_service_account_by_component(
            &self.owner_namespace,
            &self.cluster_checks_runner.service_account,
            component,
        )?;
        rbac.add_cluster_policy_rules_by_component(
            &self.owner_namespace,
            &component.cluster_rbac_resource_name(&self.owner_namespace, &self.owner_name),
            &self.cluster_checks_runner.service_account,
            cluster_checks_runner_cluster_role_rules(&self.owner_name, self.disable_non_resource_rules),
            component,
        )
    }

    fn cluster_agent_service_object(&self) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(self.cluster_agent_service.clone()),
                namespace: Some(self.owner_namespace.clone()),
                ..ObjectMeta::default()
            },
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                selector: Some(selector_labels(&self.owner_name, CLUSTER_AGENT_SUFFIX)),
                ports: Some(vec![ServicePort {
                    name: Some(CLUSTER_AGENT_PORT_NAME.to_string()),
                    port: CLUSTER_AGENT_PORT,
                    target_port: Some(IntOrString::Int(CLUSTER_AGENT_PORT)),
                    protocol: Some("TCP".to_string()),
                    ..ServicePort::default()
                }]),
                ..ServiceSpec::default()
            }),
            ..Service::default()
        }
    }

    fn node_agent_changes(&self) -> PodTemplateChanges {
        let mut changes = PodTemplateChanges::new();
        self.common_env(&mut changes);
        self.cluster_agent_client_env(&mut changes);
        changes
    }
}

impl Feature for DefaultFeature {
    fn id(&self) -> FeatureId {
        FeatureId::Default
    }

    fn configure(&mut self, owner: &DatadogAgent) -> Result<RequiredComponents> {
        let spec = &owner.spec;
        self.owner_name = owner.name_any();
        self.owner_namespace = owner.namespace().unwrap_or_default();

        let account = |component: Component| ComponentAccount {
            service_account: component.service_account_name(&self.owner_name, spec),
            workload: component.workload_name(&self.owner_name, spec),
        };
        self.agent = account(Component::NodeAgent);
        self.cluster_agent = account(Component::ClusterAgent);
        self.cluster_checks_runner = account(Component::ClusterChecksRunner);
        self.cluster_agent_service = Component::ClusterAgent.service_name(&self.owner_name);
        self.single_container = super::single_container_strategy(owner);

        if let Some(global) = &spec.global {
            self.cluster_name = global.cluster_name.clone();
            self.site = global.site.clone();
            self.tags = global.tags.clone();
            self.disable_non_resource_rules = global.disable_non_resource_rules.unwrap_or(false);
        }

        self.configure_credentials(owner)?;
        self.configure_token(owner)?;

        let agent_containers: Vec<&str> = if self.single_container {
            vec![node_agent_container(owner)]
        } else {
            Vec::new()
        };
        Ok(RequiredComponents {
            cluster_agent: RequiredComponent::required(&[CLUSTER_AGENT_CONTAINER]),
            agent: RequiredComponent::required(&agent_containers),
            cluster_checks_runner: RequiredComponent::default(),
        })
    }

    fn manage_dependencies(
        &self,
        managers: &mut ResourceManagers,
        components: &RequiredComponents,
    ) -> Result<()> {
        let mut install_info = BTreeMap::new();
        install_info.insert(INSTALL_INFO_KEY.to_string(), install_info_payload());
        managers.config_maps().add_config_map(
            &install_info_config_map_name(&self.owner_name),
            &self.owner_namespace,
            install_info,
        )?;

        if !self.credentials_data.is_empty() {
            let secret = Secret {
                metadata: ObjectMeta {
                    name: Some(credentials_secret_name(&self.owner_name)),
                    namespace: Some(self.owner_namespace.clone()),
                    ..ObjectMeta::default()
                },
                string_data: Some(self.credentials_data.clone()),
                ..Secret::default()
            };
            managers.store_mut().add_or_update(ObjectKind::Secret, &secret)?;
        }

        if components.agent.is_enabled() {
            self.agent_dependencies(managers)?;
        }
        if components.cluster_agent.is_enabled() {
            self.cluster_agent_dependencies(managers)?;
        }
        if components.cluster_checks_runner.is_enabled() {
            self.cluster_checks_runner_dependencies(managers)?;
        }
        Ok(())
    }

    fn manage_cluster_agent(&self) -> Result<PodTemplateChanges> {
        let mut changes = PodTemplateChanges::new();
        self.common_env(&mut changes);
        if let Some(app_key) = &self.app_key {
            changes.add_env(ContainerTarget::All, app_key.env(DD_APP_KEY), None);
        }
        changes
            .add_env_var_to_container(
                CLUSTER_AGENT_CONTAINER,
                DD_CLUSTER_AGENT_SERVICE_ACCOUNT_NAME,
                &self.cluster_agent.service_account,
            )
            .add_env_var_to_container(CLUSTER_AGENT_CONTAINER, DD_AGENT_DAEMONSET, &self.agent.workload)
            .add_env_var_to_container(
                CLUSTER_AGENT_CONTAINER,
                DD_CLUSTER_AGENT_DEPLOYMENT,
                &self.cluster_agent.workload,
            )
            .add_env_var_to_container(
                CLUSTER_AGENT_CONTAINER,
                DD_DATADOG_AGENT_CUSTOM_RESOURCE,
                &self.owner_name,
            );
        Ok(changes)
    }

    fn manage_node_agent(&self) -> Result<PodTemplateChanges> {
        Ok(self.node_agent_changes())
    }

    fn manage_single_container_node_agent(&self) -> Result<PodTemplateChanges> {
        Ok(self.node_agent_changes())
    }

    fn manage_cluster_checks_runner(&self) -> Result<PodTemplateChanges> {
        let mut changes = PodTemplateChanges::new();
        self.common_env(&mut changes);
        self.cluster_agent_client_env(&mut changes);
        Ok(changes)
    }
}

/// Token generated by the operator for `owner`, read back from the queued
/// token secret.
///
/// Returns `None` when the owner configures its own token.
#[must_use]
pub fn generated_token(owner: &DatadogAgent, managers: &ResourceManagers) -> Option<String> {
    let global = owner.spec.global.as_ref();
    if global.is_some_and(|g| g.cluster_agent_token.is_some() || g.cluster_agent_token_secret.is_some()) {
        return None;
    }

    let owner_name = owner.name_any();
    let queued = managers.store().get(
        ObjectKind::Secret,
        &owner.namespace().unwrap_or_default(),
        &token_secret_name(&owner_name),
    )?;
    let secret: Secret = from_dynamic(queued).ok()?;
    secret.string_data?.remove(TOKEN_SECRET_KEY)
}

fn token_data(value: &str) -> BTreeMap<String, String> {
    let mut data = BTreeMap::new();
    data.insert(TOKEN_SECRET_KEY.to_string(), value.to_string());
    data
}

fn install_info_payload() -> String {
    format!(
        "---\ninstall_method:\n  tool: datadog-operator\n  tool_version: datadog-operator\n  installer_version: {}\n",
        env!("CARGO_PKG_VERSION")
    )
}

fn exclusive(first_set: bool, second_set: bool, first: &str, second: &str) -> Result<()> {
    if first_set && second_set {
        return Err(FeatureError::MutuallyExclusiveConfig {
            feature: FEATURE.to_string(),
            first: first.to_string(),
            second: second.to_string(),
        }
        .into());
    }
    Ok(())
}

// ============================================================================
// Baseline policy rules
// ============================================================================

fn agent_cluster_role_rules(exclude_non_resource_rules: bool) -> Vec<PolicyRule> {
    let mut rules = vec![
        rule(
            CORE_API_GROUP,
            &["nodes/metrics", "nodes/spec", "nodes/proxy", "nodes/stats"],
            &[GET],
        ),
        rule(CORE_API_GROUP, &["endpoints"], &[GET]),
        rule(COORDINATION_API_GROUP, &["leases"], &[GET]),
    ];
    if !exclude_non_resource_rules {
        rules.push(non_resource_rule(&["/metrics", "/metrics/slis"], &[GET]));
    }
    rules
}

fn cluster_agent_role_rules(owner_name: &str) -> Vec<PolicyRule> {
    let mut rules = leader_election_rules(owner_name);
    rules.push(named_rule(
        CORE_API_GROUP,
        &["configmaps"],
        &[CLUSTER_ID_RESOURCE_NAME],
        &[GET, UPDATE, CREATE],
    ));
    rules.push(named_rule(
        DATADOG_API_GROUP,
        &["datadogagents"],
        &[owner_name],
        &[GET],
    ));
    rules
}

fn cluster_wide_read_rule() -> PolicyRule {
    rule(
        CORE_API_GROUP,
        &[
            "services",
            "events",
            "endpoints",
            "pods",
            "nodes",
            "componentstatuses",
            "configmaps",
            "namespaces",
        ],
        &[GET, LIST, WATCH],
    )
}

fn cluster_agent_cluster_role_rules(exclude_non_resource_rules: bool) -> Vec<PolicyRule> {
    let mut rules = vec![
        cluster_wide_read_rule(),
        rule(OPENSHIFT_QUOTA_API_GROUP, &["clusterresourcequotas"], &[GET, LIST]),
        rule(AUTOSCALING_API_GROUP, &["horizontalpodautoscalers"], &[LIST, WATCH]),
        named_rule(CORE_API_GROUP, &["namespaces"], &[KUBE_SYSTEM_NAMESPACE], &[GET]),
    ];
    if !exclude_non_resource_rules {
        rules.push(non_resource_rule(&["/version", "/healthz"], &[GET]));
    }
    rules
}

fn cluster_checks_runner_cluster_role_rules(
    owner_name: &str,
    exclude_non_resource_rules: bool,
) -> Vec<PolicyRule> {
    let mut rules = vec![
        cluster_wide_read_rule(),
        rule(CORE_API_GROUP, &["configmaps"], &[CREATE]),
        named_rule(
            CORE_API_GROUP,
            &["configmaps"],
            &[&super::rbac::leader_election_resource_name(owner_name)],
            &[GET, UPDATE],
        ),
        rule(OPENSHIFT_QUOTA_API_GROUP, &["clusterresourcequotas"], &[GET, LIST]),
    ];
    if !exclude_non_resource_rules {
        rules.push(non_resource_rule(&["/version", "/healthz", "/metrics"], &[GET]));
    }
    rules
}

#[cfg(test)]
#[path = "enabledefault_tests.rs"]
mod enabledefault_tests;
