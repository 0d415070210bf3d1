// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `labels.rs`

#[cfg(test)]
mod tests {
    use crate::labels::{
        default_labels, is_operator_managed, selector_labels, AGENT_COMPONENT,
        AGENT_COMPONENT_NAME, K8S_COMPONENT, K8S_INSTANCE, K8S_MANAGED_BY, K8S_PART_OF,
        K8S_VERSION, MANAGED_BY_OPERATOR,
    };

    #[test]
    fn test_default_labels_with_component() {
        let labels = default_labels("foo", "bar-foo", "cluster-agent", "7.60.0");

        assert_eq!(labels.get(K8S_INSTANCE), Some(&"foo".to_string()));
        assert_eq!(labels.get(K8S_PART_OF), Some(&"bar-foo".to_string()));
        assert_eq!(labels.get(K8S_COMPONENT), Some(&"cluster-agent".to_string()));
        assert_eq!(labels.get(AGENT_COMPONENT), Some(&"cluster-agent".to_string()));
        assert_eq!(labels.get(K8S_VERSION), Some(&"7.60.0".to_string()));
        assert_eq!(
            labels.get(K8S_MANAGED_BY),
            Some(&MANAGED_BY_OPERATOR.to_string())
        );
    }

    #[test]
    fn test_default_labels_without_component_or_version() {
        let labels = default_labels("foo", "bar-foo", "", "");

        assert!(!labels.contains_key(K8S_COMPONENT));
        assert!(!labels.contains_key(K8S_VERSION));
        assert!(is_operator_managed(&labels));
    }

    #[test]
    fn test_selector_labels() {
        let labels = selector_labels("foo", "agent");

        assert_eq!(labels.len(), 2);
        assert_eq!(labels.get(AGENT_COMPONENT_NAME), Some(&"foo-agent".to_string()));
    }

    #[test]
    fn test_is_operator_managed_rejects_foreign_labels() {
        let mut labels = default_labels("foo", "bar-foo", "agent", "");
        labels.insert(K8S_MANAGED_BY.to_string(), "helm".to_string());

        assert!(!is_operator_managed(&labels));
    }
}
