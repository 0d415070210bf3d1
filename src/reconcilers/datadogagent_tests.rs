// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `datadogagent.rs`

#[cfg(test)]
mod tests {
    use crate::constants::MD5_SPEC_HASH_ANNOTATION;
    use crate::crd::{
        ClusterChecksFeatureConfig, ComponentOverride, Condition, DatadogAgent, DatadogAgentSpec,
        DatadogAgentStatus, FeaturesConfig, GlobalConfig, SecretReference,
    };
    use crate::errors::{OperatorError, PlatformError};
    use crate::feature::default_registry;
    use crate::labels::{AGENT_PROVIDER, K8S_PART_OF, LEGACY_PROVIDER};
    use crate::metrics::gather_metrics;
    use crate::platform::memory::InMemoryPlatform;
    use crate::platform::{from_dynamic, ObjectKey, ObjectKind, PlatformClient};
    use crate::reconcilers::{ReconcileOptions, Reconciler};
    use crate::status_reasons::{
        CONDITION_TYPE_ACTIVE, CONDITION_TYPE_CLUSTER_AGENT_RECONCILE, CONDITION_TYPE_OVERRIDE_CONFLICT,
        CONDITION_TYPE_RECONCILE_ERROR, REASON_DDA_RECONCILE_ERROR, STATUS_FALSE, STATUS_TRUE,
    };
    use crate::test_helpers::{owner, owner_with_spec, OWNER_UID};
    use async_trait::async_trait;
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::Service;
    use kube::api::DynamicObject;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn reconciler(platform: &Arc<InMemoryPlatform>, extended_daemonset: bool) -> Reconciler {
        Reconciler::new(
            platform.clone(),
            default_registry().unwrap(),
            ReconcileOptions {
                extended_daemonset,
                ..ReconcileOptions::default()
            },
        )
    }

    /// Feed the last written status back, as the API server would.
    async fn refresh(platform: &InMemoryPlatform, dda: &mut DatadogAgent) {
        dda.status = platform.owner_status("bar", "foo").await;
    }

    fn condition<'a>(status: &'a DatadogAgentStatus, type_: &str) -> Option<&'a Condition> {
        status.conditions.iter().find(|c| c.r#type == type_)
    }

    fn cluster_checks_runners(enabled: bool) -> DatadogAgentSpec {
        DatadogAgentSpec {
            features: Some(FeaturesConfig {
                cluster_checks: Some(ClusterChecksFeatureConfig {
                    enabled: Some(enabled),
                    use_cluster_checks_runners: Some(true),
                }),
                ..FeaturesConfig::default()
            }),
            ..DatadogAgentSpec::default()
        }
    }

    fn with_override(component: &str, over: ComponentOverride) -> DatadogAgentSpec {
        DatadogAgentSpec {
            overrides: BTreeMap::from([(component.to_string(), over)]),
            ..DatadogAgentSpec::default()
        }
    }

    #[tokio::test]
    async fn test_default_owner_creates_agent_and_cluster_agent() {
        let platform = Arc::new(InMemoryPlatform::new());
        let dda = owner("bar", "foo");

        let outcome = reconciler(&platform, false).reconcile(&dda).await.unwrap();
        assert_eq!(outcome.requeue_after, Duration::from_secs(1));
        assert!(outcome.status_written);

        let daemonset = platform.object(ObjectKind::DaemonSet, "bar", "foo-agent").await.unwrap();
        let labels = daemonset.metadata.labels.clone().unwrap();
        assert_eq!(labels.get(AGENT_PROVIDER).map(String::as_str), Some(LEGACY_PROVIDER));
        assert_eq!(labels.get(K8S_PART_OF).map(String::as_str), Some("bar-foo"));

        let deployment: Deployment = from_dynamic(
            &platform
                .object(ObjectKind::Deployment, "bar", "foo-cluster-agent")
                .await
                .unwrap(),
        )
        .unwrap();
        let reference = &deployment.metadata.owner_references.unwrap()[0];
        assert_eq!(reference.uid, OWNER_UID);
        assert_eq!(reference.kind, "DatadogAgent");
        assert_eq!(reference.controller, Some(true));
        assert_eq!(deployment.spec.unwrap().replicas, Some(1));

        let service: Service = from_dynamic(
            &platform
                .object(ObjectKind::Service, "bar", "foo-cluster-agent")
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(service.spec.unwrap().ports.unwrap()[0].port, 5005);

        assert!(platform
            .object(ObjectKind::PodDisruptionBudget, "bar", "foo-cluster-agent-pdb")
            .await
            .is_some());
        assert!(platform
            .object(ObjectKind::Deployment, "bar", "foo-cluster-checks-runner")
            .await
            .is_none());
        assert!(platform
            .object(ObjectKind::ServiceAccount, "bar", "foo-cluster-checks-runner")
            .await
            .is_none());

        let status = platform.owner_status("bar", "foo").await.unwrap();
        assert_eq!(condition(&status, CONDITION_TYPE_ACTIVE).unwrap().status, STATUS_TRUE);
        assert_eq!(status.observed_generation, Some(1));
        let cluster_agent = status.cluster_agent.unwrap();
        assert_eq!(cluster_agent.workload_name.as_deref(), Some("foo-cluster-agent"));
        assert_eq!(cluster_agent.generated_token.map(|t| t.len()), Some(32));
        assert_eq!(status.agent.unwrap().workload_kind.as_deref(), Some("DaemonSet"));
        assert!(status.cluster_checks_runner.is_none());
    }

    #[tokio::test]
    async fn test_second_pass_is_idempotent() {
        let platform = Arc::new(InMemoryPlatform::new());
        let reconciler = reconciler(&platform, false);
        let mut dda = owner("bar", "foo");

        reconciler.reconcile(&dda).await.unwrap();
        refresh(&platform, &mut dda).await;
        let token = dda
            .status
            .as_ref()
            .and_then(|s| s.cluster_agent.as_ref())
            .and_then(|s| s.generated_token.clone());
        platform.reset_counters().await;

        let outcome = reconciler.reconcile(&dda).await.unwrap();
        assert_eq!(platform.counters().await.mutations(), 0);
        assert_eq!(platform.counters().await.deletes, 0);
        assert_eq!(outcome.requeue_after, Duration::from_secs(15));
        assert_eq!(
            outcome.status.cluster_agent.and_then(|s| s.generated_token),
            token
        );
    }

    #[tokio::test]
    async fn test_forget_owner_drops_feature_series() {
        let platform = Arc::new(InMemoryPlatform::new());
        let reconciler = reconciler(&platform, false);
        reconciler.reconcile(&owner("retired", "foo")).await.unwrap();
        assert!(gather_metrics().unwrap().contains("owner=\"retired/foo\""));

        reconciler.forget_owner("retired", "foo");
        assert!(!gather_metrics().unwrap().contains("owner=\"retired/foo\""));
    }

    #[tokio::test]
    async fn test_outdated_hash_triggers_update() {
        let platform = Arc::new(InMemoryPlatform::new());
        let reconciler = reconciler(&platform, false);
        let mut dda = owner("bar", "foo");

        reconciler.reconcile(&dda).await.unwrap();
        refresh(&platform, &mut dda).await;

        let key = ObjectKey::new(ObjectKind::Deployment, "bar", "foo-cluster-agent");
        assert!(
            platform
                .mutate(&key, |object| {
                    object
                        .metadata
                        .annotations
                        .get_or_insert_with(BTreeMap::new)
                        .insert(MD5_SPEC_HASH_ANNOTATION.to_string(), "outdated".to_string());
                })
                .await
        );
        platform.reset_counters().await;

        let outcome = reconciler.reconcile(&dda).await.unwrap();
        assert_eq!(outcome.requeue_after, Duration::from_secs(1));
        assert_eq!(platform.counters().await.updates, 1);

        let live = platform
            .object(ObjectKind::Deployment, "bar", "foo-cluster-agent")
            .await
            .unwrap();
        let hash = live.metadata.annotations.unwrap()[MD5_SPEC_HASH_ANNOTATION].clone();
        assert_ne!(hash, "outdated");
        assert_eq!(outcome.status.cluster_agent.unwrap().current_hash, Some(hash));
    }

    #[tokio::test]
    async fn test_cluster_checks_runner_follows_feature() {
        let platform = Arc::new(InMemoryPlatform::new());
        let reconciler = reconciler(&platform, false);
        let mut dda = owner_with_spec("bar", "foo", cluster_checks_runners(true));

        reconciler.reconcile(&dda).await.unwrap();
        assert!(platform
            .object(ObjectKind::Deployment, "bar", "foo-cluster-checks-runner")
            .await
            .is_some());
        assert!(platform
            .object(ObjectKind::ServiceAccount, "bar", "foo-cluster-checks-runner")
            .await
            .is_some());
        assert!(platform
            .object(ObjectKind::PodDisruptionBudget, "bar", "foo-cluster-checks-runner-pdb")
            .await
            .is_some());

        refresh(&platform, &mut dda).await;
        dda.spec = cluster_checks_runners(false);
        let outcome = reconciler.reconcile(&dda).await.unwrap();

        assert!(platform
            .object(ObjectKind::Deployment, "bar", "foo-cluster-checks-runner")
            .await
            .is_none());
        assert!(platform
            .object(ObjectKind::ServiceAccount, "bar", "foo-cluster-checks-runner")
            .await
            .is_none());
        assert!(platform
            .object(ObjectKind::PodDisruptionBudget, "bar", "foo-cluster-checks-runner-pdb")
            .await
            .is_none());
        assert!(outcome.status.cluster_checks_runner.is_none());
        assert!(platform
            .object(ObjectKind::Deployment, "bar", "foo-cluster-agent")
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_override_enables_component_with_replicas() {
        let platform = Arc::new(InMemoryPlatform::new());
        let dda = owner_with_spec(
            "bar",
            "foo",
            with_override(
                "clusterChecksRunner",
                ComponentOverride {
                    replicas: Some(2),
                    ..ComponentOverride::default()
                },
            ),
        );

        reconciler(&platform, false).reconcile(&dda).await.unwrap();
        let runner: Deployment = from_dynamic(
            &platform
                .object(ObjectKind::Deployment, "bar", "foo-cluster-checks-runner")
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(runner.spec.unwrap().replicas, Some(2));
    }

    #[tokio::test]
    async fn test_rename_is_refused() {
        let platform = Arc::new(InMemoryPlatform::new());
        let reconciler = reconciler(&platform, false);
        let mut dda = owner("bar", "foo");

        reconciler.reconcile(&dda).await.unwrap();
        refresh(&platform, &mut dda).await;
        dda.spec = with_override(
            "clusterAgent",
            ComponentOverride {
                name: Some("renamed".to_string()),
                ..ComponentOverride::default()
            },
        );

        let err = reconciler.reconcile(&dda).await.unwrap_err();
        assert!(matches!(err, OperatorError::ImmutableRename { .. }));
        assert!(platform
            .object(ObjectKind::Deployment, "bar", "renamed")
            .await
            .is_none());

        let status = platform.owner_status("bar", "foo").await.unwrap();
        assert_eq!(condition(&status, CONDITION_TYPE_ACTIVE).unwrap().status, STATUS_FALSE);
        assert_eq!(
            condition(&status, CONDITION_TYPE_RECONCILE_ERROR).unwrap().status,
            STATUS_TRUE
        );
        assert_eq!(
            condition(&status, CONDITION_TYPE_CLUSTER_AGENT_RECONCILE).unwrap().status,
            STATUS_FALSE
        );
    }

    #[tokio::test]
    async fn test_disabled_cluster_agent_reports_conflict() {
        let platform = Arc::new(InMemoryPlatform::new());
        let reconciler = reconciler(&platform, false);
        let mut dda = owner_with_spec("bar", "foo", cluster_checks_runners(true));

        reconciler.reconcile(&dda).await.unwrap();
        refresh(&platform, &mut dda).await;

        let mut spec = cluster_checks_runners(true);
        spec.overrides.insert(
            "clusterAgent".to_string(),
            ComponentOverride {
                disabled: Some(true),
                ..ComponentOverride::default()
            },
        );
        dda.spec = spec;
        let outcome = reconciler.reconcile(&dda).await.unwrap();

        for name in ["foo-cluster-agent", "foo-cluster-checks-runner"] {
            assert!(platform.object(ObjectKind::Deployment, "bar", name).await.is_none());
        }
        assert!(platform
            .object(ObjectKind::Service, "bar", "foo-cluster-agent")
            .await
            .is_none());
        assert!(platform.object(ObjectKind::DaemonSet, "bar", "foo-agent").await.is_some());

        let conflict = condition(&outcome.status, CONDITION_TYPE_OVERRIDE_CONFLICT).unwrap();
        assert_eq!(conflict.status, STATUS_TRUE);
        assert_eq!(
            conflict.message.as_deref(),
            Some("clusterAgent component is set to disabled")
        );
        assert!(outcome.status.cluster_checks_runner.is_none());
    }

    #[tokio::test]
    async fn test_extended_daemonset_swap() {
        let platform = Arc::new(InMemoryPlatform::new());
        let mut dda = owner("bar", "foo");

        reconciler(&platform, false).reconcile(&dda).await.unwrap();
        refresh(&platform, &mut dda).await;

        let extended = reconciler(&platform, true);
        let outcome = extended.reconcile(&dda).await.unwrap();
        assert_eq!(outcome.requeue_after, Duration::from_secs(5));
        assert!(platform.object(ObjectKind::DaemonSet, "bar", "foo-agent").await.is_none());
        assert!(platform
            .object(ObjectKind::ExtendedDaemonSet, "bar", "foo-agent")
            .await
            .is_none());

        refresh(&platform, &mut dda).await;
        let outcome = extended.reconcile(&dda).await.unwrap();
        assert_eq!(outcome.requeue_after, Duration::from_secs(1));
        assert!(platform
            .object(ObjectKind::ExtendedDaemonSet, "bar", "foo-agent")
            .await
            .is_some());
        assert_eq!(
            outcome.status.agent.unwrap().workload_kind.as_deref(),
            Some("ExtendedDaemonSet")
        );
    }

    #[tokio::test]
    async fn test_status_conflict_requeues_quickly() {
        let platform = Arc::new(InMemoryPlatform::new());
        let reconciler = reconciler(&platform, false);
        let mut dda = owner("bar", "foo");

        reconciler.reconcile(&dda).await.unwrap();
        refresh(&platform, &mut dda).await;
        platform.inject_status_conflicts(1).await;

        let outcome = reconciler.reconcile(&dda).await.unwrap();
        assert!(!outcome.status_written);
        assert_eq!(outcome.requeue_after, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_invalid_token_configuration_is_reported() {
        let platform = Arc::new(InMemoryPlatform::new());
        let dda = owner_with_spec(
            "bar",
            "foo",
            DatadogAgentSpec {
                global: Some(GlobalConfig {
                    cluster_agent_token: Some("0123456789abcdef0123456789abcdef".to_string()),
                    cluster_agent_token_secret: Some(SecretReference {
                        secret_name: "token".to_string(),
                        key_name: "token".to_string(),
                    }),
                    ..GlobalConfig::default()
                }),
                ..DatadogAgentSpec::default()
            },
        );

        let err = reconciler(&platform, false).reconcile(&dda).await.unwrap_err();
        assert!(!err.is_transient());
        assert!(platform.all_objects().await.is_empty());

        let status = platform.owner_status("bar", "foo").await.unwrap();
        let condition = condition(&status, CONDITION_TYPE_RECONCILE_ERROR).unwrap();
        assert_eq!(condition.status, STATUS_TRUE);
        assert_eq!(condition.reason.as_deref(), Some(REASON_DDA_RECONCILE_ERROR));
    }

    /// Platform whose creates always fail with the given error.
    struct RejectingPlatform {
        inner: InMemoryPlatform,
        error: PlatformError,
    }

    #[async_trait]
    impl PlatformClient for RejectingPlatform {
        async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, PlatformError> {
            self.inner.get(key).await
        }

        async fn create(&self, _kind: ObjectKind, _object: &DynamicObject) -> Result<DynamicObject, PlatformError> {
            Err(self.error.clone())
        }

        async fn update(&self, kind: ObjectKind, object: &DynamicObject) -> Result<DynamicObject, PlatformError> {
            self.inner.update(kind, object).await
        }

        async fn delete(&self, key: &ObjectKey) -> Result<(), PlatformError> {
            self.inner.delete(key).await
        }

        async fn list(
            &self,
            kind: ObjectKind,
            namespace: Option<&str>,
            labels: &BTreeMap<String, String>,
        ) -> Result<Vec<DynamicObject>, PlatformError> {
            self.inner.list(kind, namespace, labels).await
        }

        async fn patch_owner_status(
            &self,
            owner: &DatadogAgent,
            status: &DatadogAgentStatus,
        ) -> Result<(), PlatformError> {
            self.inner.patch_owner_status(owner, status).await
        }
    }

    #[tokio::test]
    async fn test_transient_error_requeues_without_status_write() {
        let inner = InMemoryPlatform::new();
        let platform = Arc::new(RejectingPlatform {
            inner: inner.clone(),
            error: PlatformError::AlreadyExists {
                kind: "Deployment".to_string(),
                name: "bar/foo-cluster-agent".to_string(),
            },
        });
        let reconciler = Reconciler::new(platform, default_registry().unwrap(), ReconcileOptions::default());

        let outcome = reconciler.reconcile(&owner("bar", "foo")).await.unwrap();
        assert_eq!(outcome.requeue_after, Duration::from_secs(1));
        assert!(!outcome.status_written);
        assert!(inner.owner_status("bar", "foo").await.is_none());
    }

    #[tokio::test]
    async fn test_server_error_is_reported_in_status() {
        let inner = InMemoryPlatform::new();
        let platform = Arc::new(RejectingPlatform {
            inner: inner.clone(),
            error: PlatformError::Api {
                kind: "Deployment".to_string(),
                name: "bar/foo-cluster-agent".to_string(),
                code: 500,
                message: "admission webhook unavailable".to_string(),
            },
        });
        let reconciler = Reconciler::new(platform, default_registry().unwrap(), ReconcileOptions::default());

        let err = reconciler.reconcile(&owner("bar", "foo")).await.unwrap_err();
        assert!(!err.is_transient());

        let status = inner.owner_status("bar", "foo").await.unwrap();
        let condition = condition(&status, CONDITION_TYPE_RECONCILE_ERROR).unwrap();
        assert_eq!(condition.status, STATUS_TRUE);
        assert!(condition.message.as_deref().unwrap_or_default().contains("admission webhook unavailable"));
    }
}
