// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `platform/mod.rs`

#[cfg(test)]
mod tests {
    use crate::platform::{from_dynamic, to_dynamic, ObjectKey, ObjectKind};
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    #[test]
    fn test_cluster_scoped_kinds() {
        let cluster_scoped: Vec<_> = ObjectKind::ALL
            .iter()
            .filter(|k| !k.is_namespaced())
            .collect();
        assert_eq!(
            cluster_scoped,
            vec![
                &ObjectKind::ClusterRole,
                &ObjectKind::ClusterRoleBinding,
                &ObjectKind::ApiService
            ]
        );
    }

    #[test]
    fn test_key_drops_namespace_for_cluster_scoped() {
        let key = ObjectKey::new(ObjectKind::ClusterRole, "bar", "foo-agent");
        assert_eq!(key.namespace, "");
        assert_eq!(key.to_string(), "foo-agent");

        let key = ObjectKey::new(ObjectKind::Role, "bar", "foo-agent");
        assert_eq!(key.to_string(), "bar/foo-agent");
    }

    #[test]
    fn test_api_resources() {
        let eds = ObjectKind::ExtendedDaemonSet.api_resource();
        assert_eq!(eds.group, "datadoghq.com");
        assert_eq!(eds.version, "v1alpha1");
        assert_eq!(eds.plural, "extendeddaemonsets");

        let pdb = ObjectKind::PodDisruptionBudget.api_resource();
        assert_eq!(pdb.api_version, "policy/v1");
        assert_eq!(pdb.kind, "PodDisruptionBudget");

        let api_service = ObjectKind::ApiService.api_resource();
        assert_eq!(api_service.api_version, "apiregistration.k8s.io/v1");
        assert_eq!(api_service.plural, "apiservices");
    }

    #[test]
    fn test_dynamic_conversion_keeps_payload() {
        let mut data = BTreeMap::new();
        data.insert("key".to_string(), "value".to_string());
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some("foo-config".to_string()),
                namespace: Some("bar".to_string()),
                ..ObjectMeta::default()
            },
            data: Some(data),
            ..ConfigMap::default()
        };

        let dynamic = to_dynamic(&cm).unwrap();
        assert_eq!(dynamic.types.as_ref().map(|t| t.kind.as_str()), Some("ConfigMap"));
        assert_eq!(dynamic.data["data"]["key"], "value");
        assert_eq!(
            ObjectKey::of(ObjectKind::ConfigMap, &dynamic),
            ObjectKey::new(ObjectKind::ConfigMap, "bar", "foo-config")
        );

        let back: ConfigMap = from_dynamic(&dynamic).unwrap();
        assert_eq!(back, cm);
    }
}
