// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Policy rule building blocks shared by features.

use k8s_openapi::api::rbac::v1::PolicyRule;

// ============================================================================
// API groups
// ============================================================================

pub const CORE_API_GROUP: &str = "";
pub const APPS_API_GROUP: &str = "apps";
pub const BATCH_API_GROUP: &str = "batch";
pub const AUTOSCALING_API_GROUP: &str = "autoscaling";
pub const POLICY_API_GROUP: &str = "policy";
pub const STORAGE_API_GROUP: &str = "storage.k8s.io";
pub const COORDINATION_API_GROUP: &str = "coordination.k8s.io";
pub const DATADOG_API_GROUP: &str = "datadoghq.com";
pub const OPENSHIFT_QUOTA_API_GROUP: &str = "quota.openshift.io";

// ============================================================================
// Verbs
// ============================================================================

pub const GET: &str = "get";
pub const LIST: &str = "list";
pub const WATCH: &str = "watch";
pub const CREATE: &str = "create";
pub const UPDATE: &str = "update";
pub const DELETE: &str = "delete";

// ============================================================================
// Well-known resource names
// ============================================================================

/// Config map in which the cluster agent stores the cluster id.
pub const CLUSTER_ID_RESOURCE_NAME: &str = "datadog-cluster-id";

/// Leader election config map used by agents older than 7.37.
pub const LEGACY_LEADER_ELECTION_RESOURCE_NAME: &str = "datadog-leader-election";

/// Namespace whose UID the cluster agent uses as cluster id fallback.
pub const KUBE_SYSTEM_NAMESPACE: &str = "kube-system";

/// Leader election config map and lease of an owner.
#[must_use]
pub fn leader_election_resource_name(owner_name: &str) -> String {
    format!("{owner_name}-leader-election")
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

/// Rule on `resources` of `group`.
#[must_use]
pub fn rule(group: &str, resources: &[&str], verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(vec![group.to_string()]),
        resources: Some(owned(resources)),
        verbs: owned(verbs),
        ..PolicyRule::default()
    }
}

/// Rule restricted to the named objects.
#[must_use]
pub fn named_rule(group: &str, resources: &[&str], names: &[&str], verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        resource_names: Some(owned(names)),
        ..rule(group, resources, verbs)
    }
}

/// Rule on non-resource URLs.
#[must_use]
pub fn non_resource_rule(urls: &[&str], verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        non_resource_urls: Some(owned(urls)),
        verbs: owned(verbs),
        ..PolicyRule::default()
    }
}

/// Leader election rules for the config map and lease named after the owner.
#[must_use]
pub fn leader_election_rules(owner_name: &str) -> Vec<PolicyRule> {
    let lease = leader_election_resource_name(owner_name);
    vec![
        named_rule(
            CORE_API_GROUP,
            &["configmaps"],
            &[LEGACY_LEADER_ELECTION_RESOURCE_NAME, &lease],
            &[GET, UPDATE],
        ),
        rule(CORE_API_GROUP, &["configmaps"], &[CREATE]),
        rule(COORDINATION_API_GROUP, &["leases"], &[CREATE]),
        named_rule(COORDINATION_API_GROUP, &["leases"], &[&lease], &[GET, UPDATE]),
    ]
}
