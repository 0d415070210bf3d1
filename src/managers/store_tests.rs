// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `store.rs`

#[cfg(test)]
mod tests {
    use crate::constants::MD5_SPEC_HASH_ANNOTATION;
    use crate::labels::{K8S_PART_OF, MANAGED_BY_STORE};
    use crate::managers::store::DependencyStore;
    use crate::ownership::encode_part_of;
    use crate::platform::memory::InMemoryPlatform;
    use crate::platform::{to_dynamic, ObjectKey, ObjectKind, PlatformClient};
    use crate::test_helpers::{owner, OWNER_UID};
    use k8s_openapi::api::core::v1::{ConfigMap, Service, ServiceAccount, ServicePort, ServiceSpec};
    use k8s_openapi::api::rbac::v1::ClusterRole;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn config_map(name: &str, value: &str) -> ConfigMap {
        let mut data = BTreeMap::new();
        data.insert("key".to_string(), value.to_string());
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            data: Some(data),
            ..ConfigMap::default()
        }
    }

    fn service(port: i32) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some("foo-cluster-agent".to_string()),
                ..ObjectMeta::default()
            },
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    port,
                    ..ServicePort::default()
                }]),
                ..ServiceSpec::default()
            }),
            ..Service::default()
        }
    }

    #[test]
    fn test_add_stamps_labels_owner_and_hash() {
        let mut store = DependencyStore::new(&owner("bar", "foo")).unwrap();
        store
            .add_or_update(ObjectKind::ConfigMap, &config_map("cfg", "v1"))
            .unwrap();

        let queued = store.get(ObjectKind::ConfigMap, "bar", "cfg").unwrap();
        let labels = queued.metadata.labels.as_ref().unwrap();
        assert_eq!(labels.get(MANAGED_BY_STORE).map(String::as_str), Some("true"));
        assert_eq!(labels.get(K8S_PART_OF), Some(&encode_part_of("bar", "foo")));
        assert_eq!(queued.metadata.namespace.as_deref(), Some("bar"));
        assert_eq!(
            queued.metadata.owner_references.as_ref().unwrap()[0].uid,
            OWNER_UID
        );
        assert!(queued
            .metadata
            .annotations
            .as_ref()
            .unwrap()
            .contains_key(MD5_SPEC_HASH_ANNOTATION));
    }

    #[test]
    fn test_cross_namespace_and_cluster_scoped_use_part_of_only() {
        let mut store = DependencyStore::new(&owner("bar", "foo")).unwrap();
        let mut elsewhere = config_map("cfg", "v1");
        elsewhere.metadata.namespace = Some("kube-system".to_string());
        store.add_or_update(ObjectKind::ConfigMap, &elsewhere).unwrap();
        store
            .add_or_update(
                ObjectKind::ClusterRole,
                &ClusterRole {
                    metadata: ObjectMeta {
                        name: Some("foo-agent".to_string()),
                        namespace: Some("bar".to_string()),
                        ..ObjectMeta::default()
                    },
                    ..ClusterRole::default()
                },
            )
            .unwrap();

        let cm = store.get(ObjectKind::ConfigMap, "kube-system", "cfg").unwrap();
        assert!(cm.metadata.owner_references.is_none());

        let role = store.get(ObjectKind::ClusterRole, "", "foo-agent").unwrap();
        assert!(role.metadata.owner_references.is_none());
        assert!(role.metadata.namespace.is_none());
    }

    #[test]
    fn test_hash_tracks_content() {
        let mut store = DependencyStore::new(&owner("bar", "foo")).unwrap();
        let hash = |store: &DependencyStore| {
            store
                .get(ObjectKind::ConfigMap, "bar", "cfg")
                .unwrap()
                .metadata
                .annotations
                .as_ref()
                .unwrap()[MD5_SPEC_HASH_ANNOTATION]
                .clone()
        };

        store.add_or_update(ObjectKind::ConfigMap, &config_map("cfg", "v1")).unwrap();
        let first = hash(&store);
        store.add_or_update(ObjectKind::ConfigMap, &config_map("cfg", "v1")).unwrap();
        assert_eq!(hash(&store), first);
        store.add_or_update(ObjectKind::ConfigMap, &config_map("cfg", "v2")).unwrap();
        assert_ne!(hash(&store), first);
    }

    #[test]
    fn test_get_or_create_defaults_identity() {
        let store = DependencyStore::new(&owner("bar", "foo")).unwrap();
        let sa: ServiceAccount = store
            .get_or_create(ObjectKind::ServiceAccount, "", "foo-agent")
            .unwrap();
        assert_eq!(sa.metadata.name.as_deref(), Some("foo-agent"));
        assert_eq!(sa.metadata.namespace.as_deref(), Some("bar"));
    }

    #[test]
    fn test_add_requires_name() {
        let mut store = DependencyStore::new(&owner("bar", "foo")).unwrap();
        assert!(store
            .add_or_update(ObjectKind::ConfigMap, &ConfigMap::default())
            .is_err());
    }

    #[tokio::test]
    async fn test_apply_is_idempotent() {
        let platform = InMemoryPlatform::new();
        let mut store = DependencyStore::new(&owner("bar", "foo")).unwrap();
        store.add_or_update(ObjectKind::ConfigMap, &config_map("cfg", "v1")).unwrap();
        store.add_or_update(ObjectKind::Service, &service(5005)).unwrap();

        let first = store.apply(&platform).await.unwrap();
        assert_eq!(first.created, 2);

        platform.reset_counters().await;
        let second = store.apply(&platform).await.unwrap();
        assert!(!second.mutated());
        assert_eq!(platform.counters().await.mutations(), 0);
    }

    #[tokio::test]
    async fn test_apply_updates_changed_object_and_keeps_foreign_labels() {
        let platform = InMemoryPlatform::new();
        let mut store = DependencyStore::new(&owner("bar", "foo")).unwrap();
        store.add_or_update(ObjectKind::ConfigMap, &config_map("cfg", "v1")).unwrap();
        store.apply(&platform).await.unwrap();

        let key = ObjectKey::new(ObjectKind::ConfigMap, "bar", "cfg");
        platform
            .mutate(&key, |cm| {
                cm.metadata
                    .labels
                    .get_or_insert_with(BTreeMap::new)
                    .insert("added-by".to_string(), "kubectl".to_string());
            })
            .await;

        store.add_or_update(ObjectKind::ConfigMap, &config_map("cfg", "v2")).unwrap();
        let outcome = store.apply(&platform).await.unwrap();
        assert_eq!(outcome.updated, 1);

        let live = platform.object(ObjectKind::ConfigMap, "bar", "cfg").await.unwrap();
        assert_eq!(live.data["data"]["key"], "v2");
        assert!(live.metadata.labels.unwrap().contains_key("added-by"));
    }

    #[tokio::test]
    async fn test_service_update_preserves_cluster_ip() {
        let platform = InMemoryPlatform::new();
        let mut store = DependencyStore::new(&owner("bar", "foo")).unwrap();
        store.add_or_update(ObjectKind::Service, &service(5005)).unwrap();
        store.apply(&platform).await.unwrap();
        let assigned = platform
            .object(ObjectKind::Service, "bar", "foo-cluster-agent")
            .await
            .unwrap()
            .data["spec"]["clusterIP"]
            .clone();

        store.add_or_update(ObjectKind::Service, &service(5006)).unwrap();
        let outcome = store.apply(&platform).await.unwrap();
        assert_eq!(outcome.updated, 1);

        let live = platform
            .object(ObjectKind::Service, "bar", "foo-cluster-agent")
            .await
            .unwrap();
        assert_eq!(live.data["spec"]["clusterIP"], assigned);
        assert_eq!(live.data["spec"]["ports"][0]["port"], 5006);
    }

    #[tokio::test]
    async fn test_cleanup_deletes_only_attributable_objects() {
        let platform = InMemoryPlatform::new();
        let dda = owner("bar", "foo");

        let mut previous = DependencyStore::new(&dda).unwrap();
        previous.add_or_update(ObjectKind::ConfigMap, &config_map("stale", "v1")).unwrap();
        previous.add_or_update(ObjectKind::ConfigMap, &config_map("kept", "v1")).unwrap();
        previous.apply(&platform).await.unwrap();

        // Carries the store label but belongs to another owner
        let mut foreign = config_map("foreign", "v1");
        foreign.metadata.namespace = Some("bar".to_string());
        let mut labels = BTreeMap::new();
        labels.insert(MANAGED_BY_STORE.to_string(), "true".to_string());
        labels.insert(K8S_PART_OF.to_string(), encode_part_of("bar", "other"));
        foreign.metadata.labels = Some(labels);
        platform
            .seed(ObjectKind::ConfigMap, to_dynamic(&foreign).unwrap())
            .await;

        let mut current = DependencyStore::new(&dda).unwrap();
        current.add_or_update(ObjectKind::ConfigMap, &config_map("kept", "v1")).unwrap();

        let deleted = current.cleanup(&platform).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(platform.object(ObjectKind::ConfigMap, "bar", "stale").await.is_none());
        assert!(platform.object(ObjectKind::ConfigMap, "bar", "kept").await.is_some());
        assert!(platform.object(ObjectKind::ConfigMap, "bar", "foreign").await.is_some());
    }

    #[tokio::test]
    async fn test_cleanup_uses_part_of_for_cluster_scoped() {
        let platform = InMemoryPlatform::new();
        let dda = owner("bar", "foo");

        let mut previous = DependencyStore::new(&dda).unwrap();
        previous
            .add_or_update(
                ObjectKind::ClusterRole,
                &ClusterRole {
                    metadata: ObjectMeta {
                        name: Some("foo-cluster-checks-runner".to_string()),
                        ..ObjectMeta::default()
                    },
                    ..ClusterRole::default()
                },
            )
            .unwrap();
        previous.apply(&platform).await.unwrap();

        let current = DependencyStore::new(&dda).unwrap();
        assert_eq!(current.cleanup(&platform).await.unwrap(), 1);
        assert!(platform.objects(ObjectKind::ClusterRole).await.is_empty());
        assert!(platform
            .get(&ObjectKey::new(ObjectKind::ClusterRole, "", "foo-cluster-checks-runner"))
            .await
            .unwrap()
            .is_none());
    }
}
