// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `feature/mod.rs`

#[cfg(test)]
mod tests {
    use crate::component::Component;
    use crate::constants::{CLUSTER_AGENT_CONTAINER, CORE_AGENT_CONTAINER, UNPRIVILEGED_SINGLE_AGENT_CONTAINER};
    use crate::crd::{
        ClusterChecksFeatureConfig, ContainerStrategy, DatadogAgent, DatadogAgentSpec, FeaturesConfig,
        GlobalConfig, LogCollectionFeatureConfig, SecretReference,
    };
    use crate::errors::{FeatureError, Result};
    use crate::feature::{
        clusterchecks, default_registry, node_agent_container, single_container_strategy, Feature, FeatureId,
        FeatureRegistry, RequiredComponent, RequiredComponents,
    };
    use crate::test_helpers::{owner, owner_with_spec};

    #[derive(Debug)]
    struct VetoCheckRunner;

    impl Feature for VetoCheckRunner {
        fn id(&self) -> FeatureId {
            FeatureId::LogCollection
        }

        fn configure(&mut self, _owner: &DatadogAgent) -> Result<RequiredComponents> {
            Ok(RequiredComponents {
                cluster_checks_runner: RequiredComponent::with_flag(false),
                ..RequiredComponents::default()
            })
        }
    }

    fn veto() -> Box<dyn Feature> {
        Box::new(VetoCheckRunner)
    }

    fn with_features(features: FeaturesConfig) -> DatadogAgent {
        owner_with_spec(
            "bar",
            "foo",
            DatadogAgentSpec {
                features: Some(features),
                ..DatadogAgentSpec::default()
            },
        )
    }

    // ========================================================================
    // RequiredComponent
    // ========================================================================

    #[test]
    fn test_enabled_and_configured() {
        let unset = RequiredComponent::default();
        assert!(!unset.is_enabled());
        assert!(!unset.is_configured());

        let vetoed = RequiredComponent::with_flag(false);
        assert!(!vetoed.is_enabled());
        assert!(vetoed.is_configured());

        let containers_only = RequiredComponent {
            is_required: None,
            containers: vec![CORE_AGENT_CONTAINER.to_string()],
        };
        assert!(containers_only.is_enabled());
        assert!(containers_only.is_configured());
    }

    #[test]
    fn test_merge_absent_flag_defers() {
        let mut merged = RequiredComponent::default();
        merged.merge(&RequiredComponent::with_flag(true));
        assert_eq!(merged.is_required, Some(true));

        let mut merged = RequiredComponent::with_flag(false);
        merged.merge(&RequiredComponent::default());
        assert_eq!(merged.is_required, Some(false));
    }

    #[test]
    fn test_merge_false_wins() {
        let mut merged = RequiredComponent::with_flag(true);
        merged.merge(&RequiredComponent::with_flag(false));
        assert_eq!(merged.is_required, Some(false));

        let mut merged = RequiredComponent::with_flag(false);
        merged.merge(&RequiredComponent::with_flag(true));
        assert_eq!(merged.is_required, Some(false));
    }

    #[test]
    fn test_merge_unions_containers_in_order() {
        let mut merged = RequiredComponent::required(&["agent", "trace-agent"]);
        merged.merge(&RequiredComponent::required(&["process-agent", "agent"]));
        assert_eq!(merged.containers, vec!["agent", "trace-agent", "process-agent"]);
    }

    #[test]
    fn test_single_container_strategy_detection() {
        assert!(RequiredComponent::required(&[UNPRIVILEGED_SINGLE_AGENT_CONTAINER])
            .single_container_strategy_enabled());
        assert!(!RequiredComponent::required(&[CORE_AGENT_CONTAINER]).single_container_strategy_enabled());
        assert!(
            !RequiredComponent::required(&[UNPRIVILEGED_SINGLE_AGENT_CONTAINER, CORE_AGENT_CONTAINER])
                .single_container_strategy_enabled()
        );
    }

    #[test]
    fn test_required_components_get() {
        let required = RequiredComponents {
            cluster_agent: RequiredComponent::with_flag(true),
            agent: RequiredComponent::with_flag(false),
            cluster_checks_runner: RequiredComponent::default(),
        };
        assert!(required.get(Component::ClusterAgent).is_enabled());
        assert!(required.get(Component::NodeAgent).is_configured());
        assert!(!required.get(Component::ClusterChecksRunner).is_configured());
        assert!(required.is_enabled());
    }

    // ========================================================================
    // Registry
    // ========================================================================

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let mut registry = FeatureRegistry::new();
        registry.register(FeatureId::LogCollection, veto).unwrap();
        let err = registry.register(FeatureId::LogCollection, veto).unwrap_err();
        assert_eq!(
            err,
            FeatureError::DuplicateRegistration {
                feature: "log_collection".to_string()
            }
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_default_registry_holds_every_feature_in_order() {
        let registry = default_registry().unwrap();
        assert_eq!(registry.ids().collect::<Vec<_>>(), FeatureId::ALL.to_vec());
        assert_eq!(registry.ids().next(), Some(FeatureId::Default));
    }

    #[test]
    fn test_build_features_with_defaults() {
        let registry = default_registry().unwrap();
        let (features, required) = registry.build_features(&owner("bar", "foo")).unwrap();

        assert_eq!(features.len(), FeatureId::ALL.len());
        assert_eq!(
            features.iter().map(|f| f.id()).collect::<Vec<_>>(),
            FeatureId::ALL.to_vec()
        );
        assert!(required.cluster_agent.is_enabled());
        assert_eq!(required.cluster_agent.containers, vec![CLUSTER_AGENT_CONTAINER]);
        assert!(required.agent.is_enabled());
        assert!(!required.cluster_checks_runner.is_enabled());
    }

    #[test]
    fn test_build_features_unions_requirements() {
        let dda = with_features(FeaturesConfig {
            cluster_checks: Some(ClusterChecksFeatureConfig {
                enabled: Some(true),
                use_cluster_checks_runners: Some(true),
            }),
            log_collection: Some(LogCollectionFeatureConfig {
                enabled: Some(true),
                ..LogCollectionFeatureConfig::default()
            }),
            ..FeaturesConfig::default()
        });
        let (_, required) = default_registry().unwrap().build_features(&dda).unwrap();

        assert!(required.cluster_checks_runner.is_enabled());
        assert_eq!(required.agent.containers, vec![CORE_AGENT_CONTAINER]);
    }

    #[test]
    fn test_any_veto_disables_component() {
        let dda = with_features(FeaturesConfig {
            cluster_checks: Some(ClusterChecksFeatureConfig {
                enabled: Some(true),
                use_cluster_checks_runners: Some(true),
            }),
            ..FeaturesConfig::default()
        });
        let mut registry = FeatureRegistry::new();
        registry
            .register(FeatureId::ClusterChecks, clusterchecks::build)
            .unwrap();
        registry.register(FeatureId::LogCollection, veto).unwrap();

        let (_, required) = registry.build_features(&dda).unwrap();
        assert_eq!(required.cluster_checks_runner.is_required, Some(false));
        assert!(!required.cluster_checks_runner.is_enabled());
    }

    #[test]
    fn test_build_features_propagates_configuration_errors() {
        let mut dda = owner("bar", "foo");
        dda.spec.global = Some(GlobalConfig {
            cluster_agent_token: Some("a".repeat(32)),
            cluster_agent_token_secret: Some(SecretReference {
                secret_name: "token".to_string(),
                key_name: "token".to_string(),
            }),
            ..GlobalConfig::default()
        });
        assert!(default_registry().unwrap().build_features(&dda).is_err());
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    #[test]
    fn test_node_agent_container_follows_strategy() {
        let mut dda = owner("bar", "foo");
        assert!(!single_container_strategy(&dda));
        assert_eq!(node_agent_container(&dda), CORE_AGENT_CONTAINER);

        dda.spec.global = Some(GlobalConfig {
            container_strategy: Some(ContainerStrategy::Single),
            ..GlobalConfig::default()
        });
        assert!(single_container_strategy(&dda));
        assert_eq!(node_agent_container(&dda), UNPRIVILEGED_SINGLE_AGENT_CONTAINER);
    }
}
