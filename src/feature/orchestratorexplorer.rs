// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The `orchestrator_explorer` feature.
//!
//! The `orchestrator` check runs in the cluster agent, or in the cluster
//! checks runner when cluster checks are dispatched there, and collects
//! Kubernetes resources and the listed custom resources. Node agents only
//! get the enabling env vars.

use super::rbac::{
    rule, APPS_API_GROUP, AUTOSCALING_API_GROUP, BATCH_API_GROUP, CORE_API_GROUP, LIST,
    STORAGE_API_GROUP, WATCH,
};
use super::{node_agent_container, Feature, FeatureId, RequiredComponent, RequiredComponents};
use crate::component::Component;
use crate::constants::{CLUSTER_AGENT_CONTAINER, CLUSTER_CHECKS_RUNNER_CONTAINER};
use crate::crd::{ConfigMapConfig, CustomConfig, DatadogAgent};
use crate::errors::{FeatureError, Result};
use crate::hashing::{checksum_annotation_key, content_hash};
use crate::managers::ResourceManagers;
use crate::podtemplate::PodTemplateChanges;
use k8s_openapi::api::core::v1::{ConfigMapVolumeSource, Volume, VolumeMount};
use k8s_openapi::api::rbac::v1::PolicyRule;
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::warn;

pub const DD_ORCHESTRATOR_EXPLORER_ENABLED: &str = "DD_ORCHESTRATOR_EXPLORER_ENABLED";
pub const DD_ORCHESTRATOR_EXPLORER_CONTAINER_SCRUBBING_ENABLED: &str =
    "DD_ORCHESTRATOR_EXPLORER_CONTAINER_SCRUBBING_ENABLED";
pub const DD_ORCHESTRATOR_EXPLORER_EXTRA_TAGS: &str = "DD_ORCHESTRATOR_EXPLORER_EXTRA_TAGS";
pub const DD_ORCHESTRATOR_EXPLORER_ORCHESTRATOR_DD_URL: &str = "DD_ORCHESTRATOR_EXPLORER_ORCHESTRATOR_DD_URL";

/// Config map key holding the check configuration.
pub const CHECK_CONFIG_KEY: &str = "orchestrator.yaml";

pub const CONFIG_VOLUME_NAME: &str = "orchestrator-explorer-config";
pub const CONFIG_MOUNT_PATH: &str = "/etc/datadog-agent/conf.d/orchestrator.d";

const NETWORKING_API_GROUP: &str = "networking.k8s.io";
const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";
const APIEXTENSIONS_API_GROUP: &str = "apiextensions.k8s.io";

const COLLECTED_RESOURCES: &[(&str, &[&str])] = &[
    (
        CORE_API_GROUP,
        &[
            "limitranges",
            "namespaces",
            "nodes",
            "persistentvolumeclaims",
            "persistentvolumes",
            "pods",
            "serviceaccounts",
            "services",
        ],
    ),
    (APPS_API_GROUP, &["daemonsets", "deployments", "replicasets", "statefulsets"]),
    (BATCH_API_GROUP, &["cronjobs", "jobs"]),
    (AUTOSCALING_API_GROUP, &["horizontalpodautoscalers"]),
    (NETWORKING_API_GROUP, &["ingresses", "networkpolicies"]),
    (RBAC_API_GROUP, &["clusterrolebindings", "clusterroles", "rolebindings", "roles"]),
    (STORAGE_API_GROUP, &["storageclasses"]),
    (APIEXTENSIONS_API_GROUP, &["customresourcedefinitions"]),
];

#[must_use]
pub fn default_config_map_name(owner_name: &str) -> String {
    format!("{owner_name}-orchestrator-explorer-config")
}

/// Cluster role name for the service account running the check.
#[must_use]
pub fn rbac_resource_name(owner_namespace: &str, owner_name: &str, suffix: &str) -> String {
    format!("{owner_namespace}-{owner_name}-orchestrator-explorer-{suffix}")
}

/// Generated check configuration, listing `custom_resources` as CRD collectors.
#[must_use]
pub fn default_check_config(cluster_check: bool, custom_resources: &[String]) -> String {
    let mut config = format!(
        "---\ncluster_check: {cluster_check}\nad_identifiers:\n  - _kube_orchestrator\ninit_config:\n\ninstances:\n  - skip_leader_election: {cluster_check}\n"
    );
    if !custom_resources.is_empty() {
        config.push_str("    crd_collectors:\n");
        for cr in custom_resources {
            config.push_str(&format!("      - {cr}\n"));
        }
    }
    config
}

/// Read permissions needed by the check, custom resources included.
///
/// Custom resources are `group/version/resource`; malformed entries grant
/// nothing.
#[must_use]
pub fn policy_rules(custom_resources: &[String]) -> Vec<PolicyRule> {
    let mut rules: Vec<PolicyRule> = COLLECTED_RESOURCES
        .iter()
        .map(|(group, resources)| rule(group, resources, &[LIST, WATCH]))
        .collect();
    for cr in custom_resources {
        match cr.split('/').collect::<Vec<_>>().as_slice() {
            [group, _version, resource] if !resource.is_empty() => {
                rules.push(rule(group, &[*resource], &[LIST, WATCH]));
            }
            _ => warn!(resource = %cr, "Ignoring malformed custom resource, expected group/version/resource"),
        }
    }
    rules
}

/// Build a fresh `orchestrator_explorer` feature.
#[must_use]
pub fn build() -> Box<dyn Feature> {
    Box::<OrchestratorExplorerFeature>::default()
}

#[derive(Debug, Default)]
pub struct OrchestratorExplorerFeature {
    enabled: bool,
    run_in_cluster_checks_runner: bool,
    scrub_containers: bool,
    extra_tags: Vec<String>,
    dd_url: Option<String>,
    custom_resources: Vec<String>,
    owner_name: String,
    owner_namespace: String,
    service_account: String,
    custom_config: Option<CustomConfig>,
    config_map_name: String,
    config_checksum: Option<String>,
    node_agent_container: &'static str,
}

impl OrchestratorExplorerFeature {
    fn rbac_component(&self) -> Component {
        if self.run_in_cluster_checks_runner {
            Component::ClusterChecksRunner
        } else {
            Component::ClusterAgent
        }
    }

    fn user_config_map(&self) -> Option<&ConfigMapConfig> {
        self.custom_config.as_ref().and_then(|c| c.config_map.as_ref())
    }

    fn config_volume(&self) -> Volume {
        let items = self
            .user_config_map()
            .map(|cm| cm.items.clone())
            .filter(|items| !items.is_empty());
        Volume {
            name: CONFIG_VOLUME_NAME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: self.config_map_name.clone(),
                items,
                ..ConfigMapVolumeSource::default()
            }),
            ..Volume::default()
        }
    }

    fn add_env(&self, changes: &mut PodTemplateChanges, container: &str) {
        changes
            .add_env_var_to_container(container, DD_ORCHESTRATOR_EXPLORER_ENABLED, "true")
            .add_env_var_to_container(
                container,
                DD_ORCHESTRATOR_EXPLORER_CONTAINER_SCRUBBING_ENABLED,
                &self.scrub_containers.to_string(),
            );
        if !self.extra_tags.is_empty() {
            // The agent parses this as a JSON list
            let tags = serde_json::Value::from(self.extra_tags.clone()).to_string();
            changes.add_env_var_to_container(container, DD_ORCHESTRATOR_EXPLORER_EXTRA_TAGS, &tags);
        }
        if let Some(url) = &self.dd_url {
            changes.add_env_var_to_container(container, DD_ORCHESTRATOR_EXPLORER_ORCHESTRATOR_DD_URL, url);
        }
    }

    fn node_agent_changes(&self) -> PodTemplateChanges {
        let mut changes = PodTemplateChanges::new();
        if self.enabled {
            self.add_env(&mut changes, self.node_agent_container);
        }
        changes
    }
}

impl Feature for OrchestratorExplorerFeature {
    fn id(&self) -> FeatureId {
        FeatureId::OrchestratorExplorer
    }

    fn configure(&mut self, owner: &DatadogAgent) -> Result<RequiredComponents> {
        let features = owner.spec.features.as_ref();
        let Some(config) = features
            .and_then(|f| f.orchestrator_explorer.as_ref())
            .filter(|o| o.enabled.unwrap_or(false))
        else {
            return Ok(RequiredComponents::default());
        };

        if let Some(conf) = &config.conf {
            if conf.config_data.is_some() && conf.config_map.is_some() {
                return Err(FeatureError::MutuallyExclusiveConfig {
                    feature: FeatureId::OrchestratorExplorer.to_string(),
                    first: "conf.configData".to_string(),
                    second: "conf.configMap".to_string(),
                }
                .into());
            }
        }
        // Custom resources end up in the generated config, so they restart pods too
        if config.conf.is_some() || !config.custom_resources.is_empty() {
            self.config_checksum = Some(content_hash(config).map_err(|e| FeatureError::Serialization {
                feature: FeatureId::OrchestratorExplorer.to_string(),
                reason: e.to_string(),
            })?);
        }

        self.enabled = true;
        self.scrub_containers = config.scrub_containers.unwrap_or(true);
        self.extra_tags.clone_from(&config.extra_tags);
        self.dd_url = config.dd_url.clone().filter(|u| !u.is_empty());
        self.custom_resources.clone_from(&config.custom_resources);
        self.custom_resources.sort();
        self.custom_resources.dedup();
        self.owner_name = owner.name_any();
        self.owner_namespace = owner.namespace().unwrap_or_default();
        self.custom_config.clone_from(&config.conf);
        self.config_map_name = self
            .user_config_map()
            .map_or_else(|| default_config_map_name(&self.owner_name), |cm| cm.name.clone());
        self.node_agent_container = node_agent_container(owner);

        self.run_in_cluster_checks_runner = features
            .and_then(|f| f.cluster_checks.as_ref())
            .is_some_and(|c| c.enabled.unwrap_or(false) && c.use_cluster_checks_runners.unwrap_or(false));
        self.service_account = self
            .rbac_component()
            .service_account_name(&self.owner_name, &owner.spec);

        let mut required = RequiredComponents {
            cluster_agent: RequiredComponent::required(&[CLUSTER_AGENT_CONTAINER]),
            agent: RequiredComponent::required(&[self.node_agent_container]),
            ..RequiredComponents::default()
        };
        if self.run_in_cluster_checks_runner {
            required.cluster_checks_runner = RequiredComponent::required(&[CLUSTER_CHECKS_RUNNER_CONTAINER]);
        }
        Ok(required)
    }

    fn manage_dependencies(
        &self,
        managers: &mut ResourceManagers,
        _components: &RequiredComponents,
    ) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        if self.user_config_map().is_none() {
            let content = self
                .custom_config
                .as_ref()
                .and_then(|c| c.config_data.clone())
                .unwrap_or_else(|| default_check_config(self.run_in_cluster_checks_runner, &self.custom_resources));
            let data = BTreeMap::from([(CHECK_CONFIG_KEY.to_string(), content)]);
            let annotations = self
                .config_checksum
                .iter()
                .map(|checksum| {
                    (
                        checksum_annotation_key(FeatureId::OrchestratorExplorer.as_str()),
                        checksum.clone(),
                    )
                })
                .collect();
            managers.config_maps().add_annotated_config_map(
                &self.config_map_name,
                &self.owner_namespace,
                data,
                annotations,
            )?;
        }

        let component = self.rbac_component();
        managers.rbac().add_cluster_policy_rules_by_component(
            &self.owner_namespace,
            &rbac_resource_name(&self.owner_namespace, &self.owner_name, component.suffix()),
            &self.service_account,
            policy_rules(&self.custom_resources),
            component,
        )
    }

    fn manage_cluster_agent(&self) -> Result<PodTemplateChanges> {
        let mut changes = PodTemplateChanges::new();
        if !self.enabled {
            return Ok(changes);
        }
        changes.add_volume(self.config_volume()).add_volume_mount_to_container(
            CLUSTER_AGENT_CONTAINER,
            VolumeMount {
                name: CONFIG_VOLUME_NAME.to_string(),
                mount_path: CONFIG_MOUNT_PATH.to_string(),
                read_only: Some(true),
                ..VolumeMount::default()
            },
        );
        if let Some(checksum) = &self.config_checksum {
            changes.add_annotation(
                &checksum_annotation_key(FeatureId::OrchestratorExplorer.as_str()),
                checksum,
            );
        }
        self.add_env(&mut changes, CLUSTER_AGENT_CONTAINER);
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
        if self.enabled && self.run_in_cluster_checks_runner {
            self.add_env(&mut changes, CLUSTER_CHECKS_RUNNER_CONTAINER);
        }
        Ok(changes)
    }
}

#[cfg(test)]
#[path = "orchestratorexplorer_tests.rs"]
mod orchestratorexplorer_tests;
