// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The `admission_controller` feature.
//!
//! The cluster agent registers a mutating webhook and serves it behind a
//! `Service` of its own. It needs to manage the webhook configuration, read
//! the owners of admitted pods, and keep its serving certificate in a secret
//! of the owner's namespace.

use super::rbac::{
    rule, APPS_API_GROUP, BATCH_API_GROUP, CORE_API_GROUP, CREATE, DATADOG_API_GROUP, GET, LIST,
    UPDATE, WATCH,
};
use super::{Feature, FeatureId, RequiredComponent, RequiredComponents};
use crate::component::Component;
use crate::constants::{CLUSTER_AGENT_CONTAINER, CLUSTER_AGENT_SUFFIX};
use crate::crd::DatadogAgent;
use crate::errors::{FeatureError, Result};
use crate::labels::selector_labels;
use crate::managers::ResourceManagers;
use crate::platform::ObjectKind;
use crate::podtemplate::PodTemplateChanges;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::api::rbac::v1::PolicyRule;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use kube::ResourceExt;

pub const DD_ADMISSION_CONTROLLER_ENABLED: &str = "DD_ADMISSION_CONTROLLER_ENABLED";
pub const DD_ADMISSION_CONTROLLER_MUTATE_UNLABELLED: &str = "DD_ADMISSION_CONTROLLER_MUTATE_UNLABELLED";
pub const DD_ADMISSION_CONTROLLER_SERVICE_NAME: &str = "DD_ADMISSION_CONTROLLER_SERVICE_NAME";
pub const DD_ADMISSION_CONTROLLER_CONTAINER_REGISTRY: &str = "DD_ADMISSION_CONTROLLER_CONTAINER_REGISTRY";
pub const DD_ADMISSION_CONTROLLER_INJECT_CONFIG_MODE: &str = "DD_ADMISSION_CONTROLLER_INJECT_CONFIG_MODE";
pub const DD_ADMISSION_CONTROLLER_FAILURE_POLICY: &str = "DD_ADMISSION_CONTROLLER_FAILURE_POLICY";
pub const DD_ADMISSION_CONTROLLER_WEBHOOK_NAME: &str = "DD_ADMISSION_CONTROLLER_WEBHOOK_NAME";

pub const SERVICE_PORT: i32 = 443;
pub const TARGET_PORT: i32 = 8000;
pub const PORT_NAME: &str = "admissioncontrollerport";

const ADMISSION_REGISTRATION_API_GROUP: &str = "admissionregistration.k8s.io";

const COMMUNICATION_MODES: &[&str] = &["hostip", "service", "socket"];
const FAILURE_POLICIES: &[&str] = &["Ignore", "Fail"];

#[must_use]
pub fn default_service_name(owner_name: &str) -> String {
    format!("{owner_name}-admission-controller")
}

#[must_use]
pub fn default_webhook_name(owner_namespace: &str, owner_name: &str) -> String {
    format!("{owner_namespace}-{owner_name}-webhook")
}

/// Cluster rules of the cluster agent serving the webhook.
#[must_use]
pub fn cluster_rules() -> Vec<PolicyRule> {
    vec![
        rule(
            ADMISSION_REGISTRATION_API_GROUP,
            &["mutatingwebhookconfigurations", "validatingwebhookconfigurations"],
            &[GET, LIST, WATCH, CREATE, UPDATE],
        ),
        rule(
            APPS_API_GROUP,
            &["daemonsets", "deployments", "replicasets", "statefulsets"],
            &[GET],
        ),
        rule(BATCH_API_GROUP, &["cronjobs", "jobs"], &[GET]),
        rule(DATADOG_API_GROUP, &["extendeddaemonsetreplicasets"], &[GET]),
    ]
}

/// Namespaced rules for the webhook certificate secret.
#[must_use]
pub fn namespaced_rules() -> Vec<PolicyRule> {
    vec![rule(CORE_API_GROUP, &["secrets"], &[GET, LIST, WATCH, CREATE, UPDATE])]
}

/// Build a fresh `admission_controller` feature.
#[must_use]
pub fn build() -> Box<dyn Feature> {
    Box::<AdmissionControllerFeature>::default()
}

#[derive(Debug, Default)]
pub struct AdmissionControllerFeature {
    enabled: bool,
    mutate_unlabelled: bool,
    service_name: String,
    webhook_name: String,
    registry: Option<String>,
    communication_mode: Option<String>,
    failure_policy: Option<String>,
    owner_name: String,
    owner_namespace: String,
    service_account: String,
}

impl AdmissionControllerFeature {
    fn service(&self) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(self.service_name.clone()),
                namespace: Some(self.owner_namespace.clone()),
                ..ObjectMeta::default()
            },
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                selector: Some(selector_labels(&self.owner_name, CLUSTER_AGENT_SUFFIX)),
                ports: Some(vec![ServicePort {
                    name: Some(PORT_NAME.to_string()),
                    port: SERVICE_PORT,
                    target_port: Some(IntOrString::Int(TARGET_PORT)),
                    protocol: Some("TCP".to_string()),
                    ..ServicePort::default()
                }]),
                ..ServiceSpec::default()
            }),
            ..Service::default()
        }
    }
}

fn checked(field: &str, value: Option<&String>, allowed: &[&str]) -> Result<Option<String>> {
    match value.filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) if allowed.contains(&v.as_str()) => Ok(Some(v.clone())),
        Some(v) => Err(FeatureError::InvalidConfig {
            feature: FeatureId::AdmissionController.to_string(),
            reason: format!("{field} must be one of {}, got {v:?}", allowed.join(", ")),
        }
        .into()),
    }
}

impl Feature for AdmissionControllerFeature {
    fn id(&self) -> FeatureId {
        FeatureId::AdmissionController
    }

    fn configure(&mut self, owner: &DatadogAgent) -> Result<RequiredComponents> {
        let Some(config) = owner
            .spec
            .features
            .as_ref()
            .and_then(|f| f.admission_controller.as_ref())
            .filter(|a| a.enabled.unwrap_or(false))
        else {
            return Ok(RequiredComponents::default());
        };

        self.communication_mode = checked(
            "agentCommunicationMode",
            config.agent_communication_mode.as_ref(),
            COMMUNICATION_MODES,
        )?;
        self.failure_policy = checked("failurePolicy", config.failure_policy.as_ref(), FAILURE_POLICIES)?;

        self.enabled = true;
        self.owner_name = owner.name_any();
        self.owner_namespace = owner.namespace().unwrap_or_default();
        self.mutate_unlabelled = config.mutate_unlabelled.unwrap_or(false);
        self.service_name = config
            .service_name
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| default_service_name(&self.owner_name));
        self.webhook_name = config
            .webhook_name
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| default_webhook_name(&self.owner_namespace, &self.owner_name));
        self.registry = config
            .registry
            .clone()
            .or_else(|| owner.spec.global.as_ref().and_then(|g| g.registry.clone()))
            .filter(|r| !r.is_empty());
        self.service_account = Component::ClusterAgent.service_account_name(&self.owner_name, &owner.spec);

        Ok(RequiredComponents {
            cluster_agent: RequiredComponent::required(&[CLUSTER_AGENT_CONTAINER]),
            ..RequiredComponents::default()
        })
    }

    fn manage_dependencies(
        &self,
        managers: &mut ResourceManagers,
        components: &RequiredComponents,
    ) -> Result<()> {
        if !self.enabled || !components.cluster_agent.is_enabled() {
            return Ok(());
        }
        let component = Component::ClusterAgent;
        let ns = self.owner_namespace.as_str();

        let key = managers.store_mut().add_or_update(ObjectKind::Service, &self.service())?;
        managers.track(component, key);

        let mut rbac = managers.rbac();
        rbac.add_cluster_policy_rules_by_component(
            ns,
            &component.cluster_rbac_resource_name(ns, &self.owner_name),
            &self.service_account,
            cluster_rules(),
            component,
        )?;
        rbac.add_policy_rules_by_component(
            ns,
            &component.rbac_resource_name(&self.owner_name),
            &self.service_account,
            namespaced_rules(),
            component,
        )
    }

    fn manage_cluster_agent(&self) -> Result<PodTemplateChanges> {
        let mut changes = PodTemplateChanges::new();
        if !self.enabled {
            return Ok(changes);
        }
        changes
            .add_env_var_to_container(CLUSTER_AGENT_CONTAINER, DD_ADMISSION_CONTROLLER_ENABLED, "true")
            .add_env_var_to_container(
                CLUSTER_AGENT_CONTAINER,
                DD_ADMISSION_CONTROLLER_MUTATE_UNLABELLED,
                &self.mutate_unlabelled.to_string(),
            )
            .add_env_var_to_container(
                CLUSTER_AGENT_CONTAINER,
                DD_ADMISSION_CONTROLLER_SERVICE_NAME,
                &self.service_name,
            )
            .add_env_var_to_container(
                CLUSTER_AGENT_CONTAINER,
                DD_ADMISSION_CONTROLLER_WEBHOOK_NAME,
                &self.webhook_name,
            );
        let optional = [
            (DD_ADMISSION_CONTROLLER_CONTAINER_REGISTRY, &self.registry),
            (DD_ADMISSION_CONTROLLER_INJECT_CONFIG_MODE, &self.communication_mode),
            (DD_ADMISSION_CONTROLLER_FAILURE_POLICY, &self.failure_policy),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                changes.add_env_var_to_container(CLUSTER_AGENT_CONTAINER, name, value);
            }
        }
        Ok(changes)
    }
}

#[cfg(test)]
#[path = "admissioncontroller_tests.rs"]
mod admissioncontroller_tests;
