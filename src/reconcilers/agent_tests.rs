// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `agent.rs`

#[cfg(test)]
mod tests {
    use crate::component::Component;
    use crate::constants::{
        CORE_AGENT_CONTAINER, TRACE_AGENT_CONTAINER, UNPRIVILEGED_SINGLE_AGENT_CONTAINER,
    };
    use crate::crd::DatadogAgent;
    use crate::errors::Result;
    use crate::feature::{Feature, FeatureId, RequiredComponent, RequiredComponents};
    use crate::labels::{AGENT_PROVIDER, LEGACY_PROVIDER};
    use crate::platform::ObjectKind;
    use crate::podtemplate::PodTemplateChanges;
    use crate::reconcilers::agent::AgentReconciler;
    use crate::reconcilers::protocol::ComponentReconciler;
    use crate::test_helpers::{env_value, owner};
    use serde_json::json;
    use std::collections::BTreeMap;

    #[derive(Debug)]
    struct Marker;

    impl Feature for Marker {
        fn id(&self) -> FeatureId {
            FeatureId::Dogstatsd
        }

        fn configure(&mut self, _owner: &DatadogAgent) -> Result<RequiredComponents> {
            Ok(RequiredComponents::default())
        }

        fn manage_node_agent(&self) -> Result<PodTemplateChanges> {
            let mut changes = PodTemplateChanges::new();
            changes.add_env_var("MODE", "multi");
            Ok(changes)
        }

        fn manage_single_container_node_agent(&self) -> Result<PodTemplateChanges> {
            let mut changes = PodTemplateChanges::new();
            changes.add_env_var("MODE", "single");
            Ok(changes)
        }
    }

    fn container_names(reconciler: &AgentReconciler, required: &RequiredComponent) -> Vec<String> {
        let dda = owner("bar", "foo");
        let names = Component::NodeAgent.names("foo", &dda.spec);
        let template = reconciler.pod_template(&dda, required, &names, "agent:7");
        template
            .spec
            .unwrap()
            .containers
            .into_iter()
            .map(|c| c.name)
            .collect()
    }

    #[test]
    fn test_workload_kind_follows_extended_daemonset_flag() {
        let plain = AgentReconciler::new(false);
        assert_eq!(plain.workload_kind(), ObjectKind::DaemonSet);
        assert_eq!(plain.retired_kinds(), vec![ObjectKind::ExtendedDaemonSet]);

        let extended = AgentReconciler::new(true);
        assert_eq!(extended.workload_kind(), ObjectKind::ExtendedDaemonSet);
        assert_eq!(extended.retired_kinds(), vec![ObjectKind::DaemonSet]);
    }

    #[test]
    fn test_default_pod_holds_requested_containers() {
        let reconciler = AgentReconciler::default();
        assert_eq!(
            container_names(&reconciler, &RequiredComponent::with_flag(true)),
            vec![CORE_AGENT_CONTAINER]
        );
        assert_eq!(
            container_names(
                &reconciler,
                &RequiredComponent::required(&[CORE_AGENT_CONTAINER, TRACE_AGENT_CONTAINER])
            ),
            vec![CORE_AGENT_CONTAINER, TRACE_AGENT_CONTAINER]
        );
    }

    #[test]
    fn test_single_container_strategy() {
        let reconciler = AgentReconciler::default();
        let required = RequiredComponent::required(&[UNPRIVILEGED_SINGLE_AGENT_CONTAINER]);
        assert_eq!(
            container_names(&reconciler, &required),
            vec![UNPRIVILEGED_SINGLE_AGENT_CONTAINER]
        );

        let changes = reconciler.manage_feature(&Marker, &required).unwrap();
        assert_eq!(env_value(&changes, "MODE"), Some("single"));
        let changes = reconciler
            .manage_feature(&Marker, &RequiredComponent::with_flag(true))
            .unwrap();
        assert_eq!(env_value(&changes, "MODE"), Some("multi"));
    }

    #[test]
    fn test_pod_uses_component_service_account() {
        let dda = owner("bar", "foo");
        let names = Component::NodeAgent.names("foo", &dda.spec);
        let template =
            AgentReconciler::default().pod_template(&dda, &RequiredComponent::with_flag(true), &names, "agent:7");
        let pod = template.spec.unwrap();
        assert_eq!(pod.service_account_name.as_deref(), Some("foo-agent"));
        assert_eq!(pod.containers[0].image.as_deref(), Some("agent:7"));
    }

    #[test]
    fn test_workload_specs() {
        let selector = BTreeMap::from([("app".to_string(), "agent".to_string())]);
        let dda = owner("bar", "foo");
        let names = Component::NodeAgent.names("foo", &dda.spec);

        let plain = AgentReconciler::new(false);
        let template = plain.pod_template(&dda, &RequiredComponent::with_flag(true), &names, "agent:7");
        let spec = plain.workload_spec(template.clone(), selector.clone(), Some(3)).unwrap();
        assert_eq!(spec["selector"]["matchLabels"], json!({"app": "agent"}));
        assert_eq!(spec["updateStrategy"]["type"], json!("RollingUpdate"));
        assert!(spec.get("replicas").is_none());

        let extended = AgentReconciler::new(true);
        let spec = extended.workload_spec(template, selector, None).unwrap();
        assert_eq!(spec["selector"]["matchLabels"], json!({"app": "agent"}));
        assert_eq!(spec["template"]["spec"]["containers"][0]["name"], json!(CORE_AGENT_CONTAINER));
        assert_eq!(spec["strategy"]["rollingUpdate"]["maxUnavailable"], json!("10%"));
    }

    #[test]
    fn test_workload_carries_provider_label() {
        let labels = AgentReconciler::default().workload_labels();
        assert_eq!(labels.get(AGENT_PROVIDER).map(String::as_str), Some(LEGACY_PROVIDER));
    }
}
