// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The `cluster_checks` feature.
//!
//! The cluster agent dispatches cluster and endpoint checks, either to the
//! node agents or, with `useClusterChecksRunners`, to the cluster checks
//! runner, which then becomes a required component.

use super::{node_agent_container, Feature, FeatureId, RequiredComponent, RequiredComponents};
use crate::constants::{
    CLUSTER_AGENT_CONTAINER, CLUSTER_CHECKS_RUNNER_CONTAINER, CORE_AGENT_CONTAINER,
    UNPRIVILEGED_SINGLE_AGENT_CONTAINER,
};
use crate::crd::DatadogAgent;
use crate::errors::{FeatureError, Result};
use crate::hashing::{checksum_annotation_key, content_hash};
use crate::podtemplate::PodTemplateChanges;

pub const DD_CLUSTER_CHECKS_ENABLED: &str = "DD_CLUSTER_CHECKS_ENABLED";
pub const DD_EXTRA_CONFIG_PROVIDERS: &str = "DD_EXTRA_CONFIG_PROVIDERS";
pub const DD_EXTRA_LISTENERS: &str = "DD_EXTRA_LISTENERS";

const KUBE_SERVICES_AND_ENDPOINTS: &str = "kube_services kube_endpoints";
const ENDPOINTS_CHECKS_PROVIDER: &str = "endpointschecks";
const CLUSTER_AND_ENDPOINTS_CHECKS_PROVIDERS: &str = "clusterchecks endpointschecks";
const CLUSTER_CHECKS_PROVIDER: &str = "clusterchecks";

/// Build a fresh `cluster_checks` feature.
#[must_use]
pub fn build() -> Box<dyn Feature> {
    Box::<ClusterChecksFeature>::default()
}

#[derive(Debug, Default)]
pub struct ClusterChecksFeature {
    enabled: bool,
    use_cluster_checks_runners: bool,
    config_checksum: Option<String>,
}

impl ClusterChecksFeature {
    fn annotate(&self, changes: &mut PodTemplateChanges) {
        if let Some(checksum) = &self.config_checksum {
            changes.add_annotation(&checksum_annotation_key(FeatureId::ClusterChecks.as_str()), checksum);
        }
    }

    fn node_agent_changes(&self, container: &str) -> PodTemplateChanges {
        let mut changes = PodTemplateChanges::new();
        if !self.enabled {
            return changes;
        }
        let providers = if self.use_cluster_checks_runners {
            ENDPOINTS_CHECKS_PROVIDER
        } else {
            CLUSTER_AND_ENDPOINTS_CHECKS_PROVIDERS
        };
        changes.add_env_var_to_container(container, DD_EXTRA_CONFIG_PROVIDERS, providers);
        changes
    }
}

impl Feature for ClusterChecksFeature {
    fn id(&self) -> FeatureId {
        FeatureId::ClusterChecks
    }

    fn configure(&mut self, owner: &DatadogAgent) -> Result<RequiredComponents> {
        let Some(config) = owner
            .spec
            .features
            .as_ref()
            .and_then(|f| f.cluster_checks.as_ref())
            .filter(|c| c.enabled.unwrap_or(false))
        else {
            return Ok(RequiredComponents::default());
        };

        self.enabled = true;
        self.use_cluster_checks_runners = config.use_cluster_checks_runners.unwrap_or(false);
        self.config_checksum = Some(content_hash(config).map_err(|e| FeatureError::Serialization {
            feature: FeatureId::ClusterChecks.to_string(),
            reason: e.to_string(),
        })?);

        let node_agent = if self.use_cluster_checks_runners {
            RequiredComponent::default()
        } else {
            RequiredComponent::required(&[node_agent_container(owner)])
        };
        Ok(RequiredComponents {
            cluster_agent: RequiredComponent::with_flag(true),
            agent: node_agent,
            cluster_checks_runner: RequiredComponent::with_flag(self.use_cluster_checks_runners),
        })
    }

    fn manage_cluster_agent(&self) -> Result<PodTemplateChanges> {
        let mut changes = PodTemplateChanges::new();
        if !self.enabled {
            return Ok(changes);
        }
        changes
            .add_env_var_to_container(CLUSTER_AGENT_CONTAINER, DD_CLUSTER_CHECKS_ENABLED, "true")
            .add_env_var_to_container(
                CLUSTER_AGENT_CONTAINER,
                DD_EXTRA_CONFIG_PROVIDERS,
                KUBE_SERVICES_AND_ENDPOINTS,
            )
            .add_env_var_to_container(
                CLUSTER_AGENT_CONTAINER,
                DD_EXTRA_LISTENERS,
                KUBE_SERVICES_AND_ENDPOINTS,
            );
        self.annotate(&mut changes);
        Ok(changes)
    }

    fn manage_node_agent(&self) -> Result<PodTemplateChanges> {
        Ok(self.node_agent_changes(CORE_AGENT_CONTAINER))
    }

    fn manage_single_container_node_agent(&self) -> Result<PodTemplateChanges> {
        Ok(self.node_agent_changes(UNPRIVILEGED_SINGLE_AGENT_CONTAINER))
    }

    fn manage_cluster_checks_runner(&self) -> Result<PodTemplateChanges> {
        let mut changes = PodTemplateChanges::new();
        if !self.enabled || !self.use_cluster_checks_runners {
            return Ok(changes);
        }
        changes
            .add_env_var_to_container(CLUSTER_CHECKS_RUNNER_CONTAINER, DD_CLUSTER_CHECKS_ENABLED, "true")
            .add_env_var_to_container(
                CLUSTER_CHECKS_RUNNER_CONTAINER,
                DD_EXTRA_CONFIG_PROVIDERS,
                CLUSTER_CHECKS_PROVIDER,
            );
        self.annotate(&mut changes);
        Ok(changes)
    }
}

#[cfg(test)]
#[path = "clusterchecks_tests.rs"]
mod clusterchecks_tests;
