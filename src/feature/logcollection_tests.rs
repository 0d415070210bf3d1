// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `logcollection.rs`

#[cfg(test)]
mod tests {
    use crate::constants::{CORE_AGENT_CONTAINER, UNPRIVILEGED_SINGLE_AGENT_CONTAINER};
    use crate::crd::{
        ContainerStrategy, DatadogAgent, DatadogAgentSpec, FeaturesConfig, GlobalConfig,
        LogCollectionFeatureConfig,
    };
    use crate::feature::logcollection::{
        build, DD_LOGS_CONFIG_CONTAINER_COLLECT_ALL, DD_LOGS_CONFIG_K8S_CONTAINER_USE_FILE,
        DD_LOGS_CONFIG_OPEN_FILES_LIMIT, DD_LOGS_ENABLED, POINTER_VOLUME_NAME, POINTER_VOLUME_PATH,
    };
    use crate::podtemplate::{ContainerTarget, PodTemplateChange, PodTemplateChanges};
    use crate::test_helpers::{env_change, env_value, named, owner, owner_with_spec};
    use k8s_openapi::api::core::v1::{Volume, VolumeMount};

    fn logs(config: LogCollectionFeatureConfig) -> DatadogAgent {
        owner_with_spec(
            "bar",
            "foo",
            DatadogAgentSpec {
                features: Some(FeaturesConfig {
                    log_collection: Some(config),
                    ..FeaturesConfig::default()
                }),
                ..DatadogAgentSpec::default()
            },
        )
    }

    fn enabled() -> LogCollectionFeatureConfig {
        LogCollectionFeatureConfig {
            enabled: Some(true),
            ..LogCollectionFeatureConfig::default()
        }
    }

    fn volumes(changes: &PodTemplateChanges) -> Vec<&Volume> {
        changes
            .iter()
            .filter_map(|change| match change {
                PodTemplateChange::AddVolume { volume, .. } => Some(volume),
                _ => None,
            })
            .collect()
    }

    fn mounts(changes: &PodTemplateChanges) -> Vec<(&ContainerTarget, &VolumeMount)> {
        changes
            .iter()
            .filter_map(|change| match change {
                PodTemplateChange::AddVolumeMount { target, mount, .. } => Some((target, mount)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_disabled_requires_nothing() {
        let dda = logs(LogCollectionFeatureConfig {
            enabled: Some(false),
            ..LogCollectionFeatureConfig::default()
        });
        for dda in [owner("bar", "foo"), dda] {
            let mut feature = build();
            assert!(!feature.configure(&dda).unwrap().is_configured());
            assert!(feature.manage_node_agent().unwrap().is_empty());
        }
    }

    #[test]
    fn test_enabled_requires_core_agent_container() {
        let required = build().configure(&logs(enabled())).unwrap();
        assert_eq!(required.agent.containers, vec![CORE_AGENT_CONTAINER]);
        assert!(!required.cluster_agent.is_configured());
    }

    #[test]
    fn test_default_paths_and_env() {
        let mut feature = build();
        feature.configure(&logs(enabled())).unwrap();
        let changes = feature.manage_node_agent().unwrap();

        let host_paths: Vec<String> = volumes(&changes)
            .iter()
            .filter_map(|v| v.host_path.as_ref().map(|h| h.path.clone()))
            .collect();
        assert_eq!(
            host_paths,
            vec![
                "/var/lib/datadog-agent/logs",
                "/var/log/pods",
                "/var/lib/docker/containers",
                "/var/log/containers",
            ]
        );

        let mounts = mounts(&changes);
        assert_eq!(mounts.len(), 4);
        assert!(mounts.iter().all(|(target, _)| *target == &named(CORE_AGENT_CONTAINER)));
        let (_, pointer) = mounts
            .iter()
            .find(|(_, m)| m.name == POINTER_VOLUME_NAME)
            .unwrap();
        assert_eq!(pointer.mount_path, POINTER_VOLUME_PATH);
        assert_eq!(pointer.read_only, Some(false));
        assert!(mounts
            .iter()
            .filter(|(_, m)| m.name != POINTER_VOLUME_NAME)
            .all(|(_, m)| m.read_only == Some(true)));

        assert_eq!(env_value(&changes, DD_LOGS_ENABLED), Some("true"));
        assert_eq!(env_value(&changes, DD_LOGS_CONFIG_CONTAINER_COLLECT_ALL), Some("false"));
        assert_eq!(env_value(&changes, DD_LOGS_CONFIG_K8S_CONTAINER_USE_FILE), Some("true"));
        assert!(env_value(&changes, DD_LOGS_CONFIG_OPEN_FILES_LIMIT).is_none());
    }

    #[test]
    fn test_custom_settings() {
        let mut feature = build();
        feature
            .configure(&logs(LogCollectionFeatureConfig {
                container_collect_all: Some(true),
                container_collect_using_files: Some(false),
                temp_storage_path: Some("/data/logs".to_string()),
                open_files_limit: Some(500),
                ..enabled()
            }))
            .unwrap();
        let changes = feature.manage_node_agent().unwrap();

        assert_eq!(env_value(&changes, DD_LOGS_CONFIG_CONTAINER_COLLECT_ALL), Some("true"));
        assert_eq!(env_value(&changes, DD_LOGS_CONFIG_K8S_CONTAINER_USE_FILE), Some("false"));
        assert_eq!(env_value(&changes, DD_LOGS_CONFIG_OPEN_FILES_LIMIT), Some("500"));
        assert!(volumes(&changes)
            .iter()
            .any(|v| v.host_path.as_ref().is_some_and(|h| h.path == "/data/logs")));
    }

    #[test]
    fn test_single_container_strategy() {
        let mut dda = logs(enabled());
        dda.spec.global = Some(GlobalConfig {
            container_strategy: Some(ContainerStrategy::Single),
            ..GlobalConfig::default()
        });
        let mut feature = build();
        let required = feature.configure(&dda).unwrap();
        assert!(required.agent.single_container_strategy_enabled());

        let changes = feature.manage_single_container_node_agent().unwrap();
        let (target, _) = env_change(&changes, DD_LOGS_ENABLED).unwrap();
        assert_eq!(target, &named(UNPRIVILEGED_SINGLE_AGENT_CONTAINER));
    }
}
