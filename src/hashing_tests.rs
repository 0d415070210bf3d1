// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `hashing.rs`

#[cfg(test)]
mod tests {
    use crate::constants::MD5_SPEC_HASH_ANNOTATION;
    use crate::crd::{ClusterChecksFeatureConfig, DatadogAgentSpec, FeaturesConfig};
    use crate::hashing::{
        checksum_annotation_key, content_hash, hash_annotation, is_same_hash,
        set_hash_annotation, workload_hash,
    };
    use serde_json::json;
    use std::collections::{BTreeMap, HashMap};

    fn spec(use_runners: bool) -> DatadogAgentSpec {
        DatadogAgentSpec {
            features: Some(FeaturesConfig {
                cluster_checks: Some(ClusterChecksFeatureConfig {
                    enabled: Some(true),
                    use_cluster_checks_runners: Some(use_runners),
                }),
                ..FeaturesConfig::default()
            }),
            ..DatadogAgentSpec::default()
        }
    }

    #[test]
    fn test_hash_is_deterministic() {
        let first = content_hash(&spec(true)).unwrap();
        let second = content_hash(&spec(true)).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 32);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hash_changes_with_covered_field() {
        assert_ne!(
            content_hash(&spec(true)).unwrap(),
            content_hash(&spec(false)).unwrap()
        );
    }

    #[test]
    fn test_hash_of_known_value() {
        // md5("{}")
        assert_eq!(
            content_hash(&json!({})).unwrap(),
            "99914b932bd37a50b983c5e7c90ae93b"
        );
    }

    #[test]
    fn test_hash_ignores_map_insertion_order() {
        let mut a = HashMap::new();
        a.insert("zeta", 1);
        a.insert("alpha", 2);
        let mut b = HashMap::new();
        b.insert("alpha", 2);
        b.insert("zeta", 1);

        assert_eq!(content_hash(&a).unwrap(), content_hash(&b).unwrap());
    }

    #[test]
    fn test_workload_hash_covers_labels() {
        let mut labels = BTreeMap::new();
        labels.insert("team".to_string(), "a".to_string());
        let first = workload_hash(&json!({"replicas": 1}), &labels).unwrap();

        labels.insert("team".to_string(), "b".to_string());
        let second = workload_hash(&json!({"replicas": 1}), &labels).unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn test_hash_annotation_helpers() {
        let mut annotations = BTreeMap::new();
        set_hash_annotation(&mut annotations, "abc");

        assert_eq!(
            annotations.get(MD5_SPEC_HASH_ANNOTATION),
            Some(&"abc".to_string())
        );
        assert_eq!(hash_annotation(Some(&annotations)), Some("abc"));
        assert!(is_same_hash("abc", Some(&annotations)));
        assert!(!is_same_hash("def", Some(&annotations)));
        assert!(!is_same_hash("abc", None));
    }

    #[test]
    fn test_checksum_annotation_key() {
        assert_eq!(
            checksum_annotation_key("kubernetes_state_core"),
            "checksum/kubernetes_state_core-custom-config"
        );
    }
}
