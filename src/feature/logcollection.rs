// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The `log_collection` feature.
//!
//! Mounts the node's pod and container log directories into the node agent
//! and keeps the tailing registry on a host path so it survives restarts.

use super::{node_agent_container, Feature, FeatureId, RequiredComponent, RequiredComponents};
use crate::crd::{DatadogAgent, LogCollectionFeatureConfig};
use crate::errors::Result;
use crate::podtemplate::PodTemplateChanges;
use k8s_openapi::api::core::v1::{HostPathVolumeSource, Volume, VolumeMount};

pub const DD_LOGS_ENABLED: &str = "DD_LOGS_ENABLED";
pub const DD_LOGS_CONFIG_CONTAINER_COLLECT_ALL: &str = "DD_LOGS_CONFIG_CONTAINER_COLLECT_ALL";
pub const DD_LOGS_CONFIG_K8S_CONTAINER_USE_FILE: &str = "DD_LOGS_CONFIG_K8S_CONTAINER_USE_FILE";
pub const DD_LOGS_CONFIG_OPEN_FILES_LIMIT: &str = "DD_LOGS_CONFIG_OPEN_FILES_LIMIT";

pub const POINTER_VOLUME_NAME: &str = "pointerdir";
pub const POINTER_VOLUME_PATH: &str = "/opt/datadog-agent/run";
pub const DEFAULT_TEMP_STORAGE_PATH: &str = "/var/lib/datadog-agent/logs";

pub const POD_LOG_VOLUME_NAME: &str = "logpodpath";
pub const DEFAULT_POD_LOG_PATH: &str = "/var/log/pods";

pub const CONTAINER_LOG_VOLUME_NAME: &str = "logcontainerpath";
pub const DEFAULT_CONTAINER_LOG_PATH: &str = "/var/lib/docker/containers";

pub const SYMLINK_CONTAINER_VOLUME_NAME: &str = "symlinkcontainerpath";
pub const DEFAULT_SYMLINK_CONTAINER_PATH: &str = "/var/log/containers";

/// Build a fresh `log_collection` feature.
#[must_use]
pub fn build() -> Box<dyn Feature> {
    Box::<LogCollectionFeature>::default()
}

#[derive(Debug, Default)]
pub struct LogCollectionFeature {
    config: Option<LogCollectionFeatureConfig>,
    container: &'static str,
}

fn host_path_volume(name: &str, path: &str) -> Volume {
    Volume {
        name: name.to_string(),
        host_path: Some(HostPathVolumeSource {
            path: path.to_string(),
            type_: None,
        }),
        ..Volume::default()
    }
}

fn mount(name: &str, path: &str, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: Some(read_only),
        ..VolumeMount::default()
    }
}

impl LogCollectionFeature {
    fn node_agent_changes(&self) -> PodTemplateChanges {
        let mut changes = PodTemplateChanges::new();
        let Some(config) = &self.config else {
            return changes;
        };
        let container = self.container;

        let pointer = config
            .temp_storage_path
            .as_deref()
            .unwrap_or(DEFAULT_TEMP_STORAGE_PATH);
        changes
            .add_volume(host_path_volume(POINTER_VOLUME_NAME, pointer))
            .add_volume_mount_to_container(container, mount(POINTER_VOLUME_NAME, POINTER_VOLUME_PATH, false));

        // Read-only log sources are mounted at the same path as on the host
        for (name, path) in [
            (
                POD_LOG_VOLUME_NAME,
                config.pod_logs_path.as_deref().unwrap_or(DEFAULT_POD_LOG_PATH),
            ),
            (
                CONTAINER_LOG_VOLUME_NAME,
                config
                    .container_logs_path
                    .as_deref()
                    .unwrap_or(DEFAULT_CONTAINER_LOG_PATH),
            ),
            (
                SYMLINK_CONTAINER_VOLUME_NAME,
                config
                    .container_symlinks_path
                    .as_deref()
                    .unwrap_or(DEFAULT_SYMLINK_CONTAINER_PATH),
            ),
        ] {
            changes
                .add_volume(host_path_volume(name, path))
                .add_volume_mount_to_container(container, mount(name, path, true));
        }

        changes
            .add_env_var_to_container(container, DD_LOGS_ENABLED, "true")
            .add_env_var_to_container(
                container,
                DD_LOGS_CONFIG_CONTAINER_COLLECT_ALL,
                &config.container_collect_all.unwrap_or(false).to_string(),
            )
            .add_env_var_to_container(
                container,
                DD_LOGS_CONFIG_K8S_CONTAINER_USE_FILE,
                &config.container_collect_using_files.unwrap_or(true).to_string(),
            );
        if let Some(limit) = config.open_files_limit {
            changes.add_env_var_to_container(container, DD_LOGS_CONFIG_OPEN_FILES_LIMIT, &limit.to_string());
        }
        changes
    }
}

impl Feature for LogCollectionFeature {
    fn id(&self) -> FeatureId {
        FeatureId::LogCollection
    }

    fn configure(&mut self, owner: &DatadogAgent) -> Result<RequiredComponents> {
        self.config = owner
            .spec
            .features
            .as_ref()
            .and_then(|f| f.log_collection.clone())
            .filter(|l| l.enabled.unwrap_or(false));
        if self.config.is_none() {
            return Ok(RequiredComponents::default());
        }

        self.container = node_agent_container(owner);
        Ok(RequiredComponents {
            agent: RequiredComponent::required(&[self.container]),
            ..RequiredComponents::default()
        })
    }

    fn manage_node_agent(&self) -> Result<PodTemplateChanges> {
        Ok(self.node_agent_changes())
    }

    fn manage_single_container_node_agent(&self) -> Result<PodTemplateChanges> {
        Ok(self.node_agent_changes())
    }
}

#[cfg(test)]
#[path = "logcollection_tests.rs"]
mod logcollection_tests;
