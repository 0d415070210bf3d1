// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The `kubernetes_state_core` feature.
//!
//! The cluster agent runs the `kubernetes_state_core` check from a config map
//! mounted into its `conf.d`. When cluster checks are dispatched to the
//! cluster checks runner, the check is scheduled as a cluster check and the
//! runner's service account receives the read permissions instead. Node
//! agents are told to ignore the legacy `kubernetes_state` autoconfig.

use super::rbac::{
    rule, APPS_API_GROUP, AUTOSCALING_API_GROUP, BATCH_API_GROUP, CORE_API_GROUP, LIST, POLICY_API_GROUP,
    STORAGE_API_GROUP, WATCH,
};
use super::{node_agent_container, Feature, FeatureId, RequiredComponent, RequiredComponents};
use crate::component::Component;
use crate::constants::CLUSTER_AGENT_CONTAINER;
use crate::crd::{ConfigMapConfig, CustomConfig, DatadogAgent};
use crate::errors::{FeatureError, Result};
use crate::hashing::{checksum_annotation_key, content_hash};
use crate::managers::ResourceManagers;
use crate::podtemplate::{append_space_separated, ContainerTarget, PodTemplateChanges};
use k8s_openapi::api::core::v1::{ConfigMapVolumeSource, EnvVar, Volume, VolumeMount};
use k8s_openapi::api::rbac::v1::PolicyRule;
use kube::ResourceExt;
use std::collections::BTreeMap;

pub const DD_KUBE_STATE_METRICS_CORE_ENABLED: &str = "DD_KUBE_STATE_METRICS_CORE_ENABLED";
pub const DD_KUBE_STATE_METRICS_CORE_CONFIGMAP_NAME: &str = "DD_KUBE_STATE_METRICS_CORE_CONFIGMAP_NAME";
pub const DD_IGNORE_AUTOCONF: &str = "DD_IGNORE_AUTOCONF";

/// Config map key holding the check configuration.
pub const CHECK_CONFIG_KEY: &str = "kubernetes_state_core.yaml.default";

/// Volume carrying the check configuration into the cluster agent.
pub const CONFIG_VOLUME_NAME: &str = "ksm-core-config";

/// Directory the configuration is mounted at.
pub const CONFIG_MOUNT_PATH: &str = "/etc/datadog-agent/conf.d/kubernetes_state_core.d";

const IGNORED_AUTOCONF: &str = "kubernetes_state";

/// Resources watched by the check, grouped by API group.
const COLLECTED_RESOURCES: &[(&str, &[&str])] = &[
    (
        CORE_API_GROUP,
        &[
            "configmaps",
            "endpoints",
            "events",
            "limitranges",
            "namespaces",
            "nodes",
            "persistentvolumeclaims",
            "persistentvolumes",
            "pods",
            "replicationcontrollers",
            "resourcequotas",
            "secrets",
            "services",
        ],
    ),
    (APPS_API_GROUP, &["daemonsets", "deployments", "replicasets", "statefulsets"]),
    (BATCH_API_GROUP, &["cronjobs", "jobs"]),
    (AUTOSCALING_API_GROUP, &["horizontalpodautoscalers"]),
    (POLICY_API_GROUP, &["poddisruptionbudgets"]),
    (STORAGE_API_GROUP, &["storageclasses", "volumeattachments"]),
];

/// Default config map name for an owner.
#[must_use]
pub fn default_config_map_name(owner_name: &str) -> String {
    format!("{owner_name}-kube-state-metrics-core-config")
}

/// Cluster role name for the service account running the check.
#[must_use]
pub fn rbac_resource_name(owner_namespace: &str, owner_name: &str, suffix: &str) -> String {
    format!("{owner_namespace}-{owner_name}-ksm-core-{suffix}")
}

/// Generated check configuration.
///
/// When `cluster_check` is set the check is dispatched by the cluster agent
/// instead of running in it, so leader election is skipped as well.
#[must_use]
pub fn default_check_config(cluster_check: bool) -> String {
    format!(
        "---\ncluster_check: {cluster_check}\ninit_config:\ninstances:\n  - collectors:\n    - pods\n    - replicationcontrollers\n    - statefulsets\n    - nodes\n    - cronjobs\n    - jobs\n    - replicasets\n    - deployments\n    - configmaps\n    - services\n    - endpoints\n    - daemonsets\n    - horizontalpodautoscalers\n    - limitranges\n    - resourcequotas\n    - secrets\n    - namespaces\n    - persistentvolumeclaims\n    - persistentvolumes\n    telemetry: true\n    skip_leader_election: {cluster_check}\n"
    )
}

/// Read permissions needed by the check.
#[must_use]
pub fn policy_rules() -> Vec<PolicyRule> {
    COLLECTED_RESOURCES
        .iter()
        .map(|(group, resources)| rule(group, resources, &[LIST, WATCH]))
        .collect()
}

/// Build a fresh `kubernetes_state_core` feature.
#[must_use]
pub fn build() -> Box<dyn Feature> {
    Box::<KubernetesStateCoreFeature>::default()
}

#[derive(Debug, Default)]
pub struct KubernetesStateCoreFeature {
    enabled: bool,
    run_in_cluster_checks_runner: bool,
    owner_name: String,
    owner_namespace: String,
    service_account: String,
    custom_config: Option<CustomConfig>,
    config_map_name: String,
    config_checksum: Option<String>,
    node_agent_container: &'static str,
}

impl KubernetesStateCoreFeature {
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

    fn annotate(&self, changes: &mut PodTemplateChanges) {
        if let Some(checksum) = &self.config_checksum {
            changes.add_annotation(
                &checksum_annotation_key(FeatureId::KubernetesStateCore.as_str()),
                checksum,
            );
        }
    }

    fn node_agent_changes(&self) -> PodTemplateChanges {
        let mut changes = PodTemplateChanges::new();
        if !self.enabled {
            return changes;
        }
        changes.add_env(
            ContainerTarget::Named(self.node_agent_container.to_string()),
            EnvVar {
                name: DD_IGNORE_AUTOCONF.to_string(),
                value: Some(IGNORED_AUTOCONF.to_string()),
                value_from: None,
            },
            Some(append_space_separated),
        );
        changes
    }
}

impl Feature for KubernetesStateCoreFeature {
    fn id(&self) -> FeatureId {
        FeatureId::KubernetesStateCore
    }

    fn configure(&mut self, owner: &DatadogAgent) -> Result<RequiredComponents> {
        let features = owner.spec.features.as_ref();
        let Some(config) = features
            .and_then(|f| f.kube_state_metrics_core.as_ref())
            .filter(|k| k.enabled.unwrap_or(false))
        else {
            return Ok(RequiredComponents::default());
        };

        if let Some(conf) = &config.conf {
            if conf.config_data.is_some() && conf.config_map.is_some() {
                return Err(FeatureError::MutuallyExclusiveConfig {
                    feature: FeatureId::KubernetesStateCore.to_string(),
                    first: "conf.configData".to_string(),
                    second: "conf.configMap".to_string(),
                }
                .into());
            }
            self.config_checksum = Some(content_hash(conf).map_err(|e| FeatureError::Serialization {
                feature: FeatureId::KubernetesStateCore.to_string(),
                reason: e.to_string(),
            })?);
        }

        self.enabled = true;
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
            cluster_agent: RequiredComponent::with_flag(true),
            ..RequiredComponents::default()
        };
        if self.run_in_cluster_checks_runner {
            required.cluster_checks_runner = RequiredComponent::with_flag(true);
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
                .unwrap_or_else(|| default_check_config(self.run_in_cluster_checks_runner));
            let data = BTreeMap::from([(CHECK_CONFIG_KEY.to_string(), content)]);
            let annotations = self
                .config_checksum
                .iter()
                .map(|checksum| {
                    (
                        checksum_annotation_key(FeatureId::KubernetesStateCore.as_str()),
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
            policy_rules(),
            component,
        )
    }

    fn manage_cluster_agent(&self) -> Result<PodTemplateChanges> {
        let mut changes = PodTemplateChanges::new();
        if !self.enabled {
            return Ok(changes);
        }
        changes
            .add_volume(self.config_volume())
            .add_volume_mount_to_container(
                CLUSTER_AGENT_CONTAINER,
                VolumeMount {
                    name: CONFIG_VOLUME_NAME.to_string(),
                    mount_path: CONFIG_MOUNT_PATH.to_string(),
                    read_only: Some(true),
                    ..VolumeMount::default()
                },
            )
            .add_env_var_to_container(CLUSTER_AGENT_CONTAINER, DD_KUBE_STATE_METRICS_CORE_ENABLED, "true")
            .add_env_var_to_container(
                CLUSTER_AGENT_CONTAINER,
                DD_KUBE_STATE_METRICS_CORE_CONFIGMAP_NAME,
                &self.config_map_name,
            );
        self.annotate(&mut changes);
        Ok(changes)
    }

    fn manage_node_agent(&self) -> Result<PodTemplateChanges> {
        Ok(self.node_agent_changes())
    }

    fn manage_single_container_node_agent(&self) -> Result<PodTemplateChanges> {
        Ok(self.node_agent_changes())
    }
}

#[cfg(test)]
#[path = "kubernetesstatecore_tests.rs"]
mod kubernetesstatecore_tests;
