// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common label constants and the default label set stamped on managed objects.
//!
//! Every object the operator produces carries the same base labels so that
//! workloads can select their pods and cleanup can recognise what it owns.

use std::collections::BTreeMap;

// ============================================================================
// Kubernetes Standard Labels
// https://kubernetes.io/docs/concepts/overview/working-with-objects/common-labels/
// ============================================================================

/// Standard label for the component name within the architecture (e.g., "cluster-agent")
pub const K8S_COMPONENT: &str = "app.kubernetes.io/component";

/// Standard label for the tool being used to manage the operation of an application
pub const K8S_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Standard label for the name of the application
pub const K8S_NAME: &str = "app.kubernetes.io/name";

/// Standard label for a unique name identifying the instance of an application
pub const K8S_INSTANCE: &str = "app.kubernetes.io/instance";

/// Standard label for the name of a higher-level application this one is part of.
///
/// Holds the encoded `namespace/name` of the owning `DatadogAgent`.
pub const K8S_PART_OF: &str = "app.kubernetes.io/part-of";

/// Standard label for the current version of the application
pub const K8S_VERSION: &str = "app.kubernetes.io/version";

// ============================================================================
// Kubernetes Standard Label Values
// ============================================================================

/// Value for `app.kubernetes.io/name`
pub const APP_NAME_DATADOG_AGENT: &str = "datadog-agent-deployment";

/// Value for `app.kubernetes.io/managed-by`
pub const MANAGED_BY_OPERATOR: &str = "datadog-operator";

// ============================================================================
// Operator-Specific Labels
// ============================================================================

/// Label selecting the pods of a component (`{owner}-{suffix}`)
pub const AGENT_COMPONENT_NAME: &str = "agent.datadoghq.com/name";

/// Label carrying the component suffix ("agent", "cluster-agent", ...)
pub const AGENT_COMPONENT: &str = "agent.datadoghq.com/component";

/// Label marking objects that were queued in the dependency store
pub const MANAGED_BY_STORE: &str = "operator.datadoghq.com/managed-by-store";

/// Value of [`MANAGED_BY_STORE`]
pub const MANAGED_BY_STORE_VALUE: &str = "true";

/// Label marking which workload kind the node agent runs as
pub const AGENT_PROVIDER: &str = "agent.datadoghq.com/provider";

/// Value of [`AGENT_PROVIDER`] when no provider-specific workload is built
pub const LEGACY_PROVIDER: &str = "legacy";

/// Build the default label set shared by every managed object.
///
/// # Arguments
///
/// * `owner_name` - Name of the owning `DatadogAgent`
/// * `part_of` - Encoded part-of value of the owner
/// * `component_suffix` - Component suffix, or empty for objects not tied to a component
/// * `version` - Agent version running in the component
///
/// # Returns
///
/// A `BTreeMap` of label keys to values
#[must_use]
pub fn default_labels(
    owner_name: &str,
    part_of: &str,
    component_suffix: &str,
    version: &str,
) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(K8S_NAME.to_string(), APP_NAME_DATADOG_AGENT.to_string());
    labels.insert(K8S_INSTANCE.to_string(), owner_name.to_string());
    labels.insert(K8S_PART_OF.to_string(), part_of.to_string());
    labels.insert(K8S_MANAGED_BY.to_string(), MANAGED_BY_OPERATOR.to_string());
    if !version.is_empty() {
        labels.insert(K8S_VERSION.to_string(), version.to_string());
    }
    if !component_suffix.is_empty() {
        labels.insert(K8S_COMPONENT.to_string(), component_suffix.to_string());
        labels.insert(AGENT_COMPONENT.to_string(), component_suffix.to_string());
    }
    labels
}

/// Build the pod selector labels of a component workload.
///
/// These are the only labels used in `spec.selector.matchLabels`; changing
/// them forces the workload to be recreated.
#[must_use]
pub fn selector_labels(owner_name: &str, component_suffix: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(K8S_INSTANCE.to_string(), owner_name.to_string());
    labels.insert(
        AGENT_COMPONENT_NAME.to_string(),
        format!("{owner_name}-{component_suffix}"),
    );
    labels
}

/// Returns `true` when the object labels show it was created by this operator.
#[must_use]
pub fn is_operator_managed(labels: &BTreeMap<String, String>) -> bool {
    labels.get(K8S_MANAGED_BY).map(String::as_str) == Some(MANAGED_BY_OPERATOR)
}

#[cfg(test)]
#[path = "labels_tests.rs"]
mod labels_tests;
