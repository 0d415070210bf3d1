// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Component metadata registry.
//!
//! The operator manages three independently-lifecycled components. This
//! module resolves, for each of them, the names of every object it produces,
//! honoring the per-component override block of the owner. All functions are
//! pure: absent input yields the computed defaults.

use crate::constants::{
    CLUSTER_AGENT_SUFFIX, CLUSTER_CHECKS_RUNNER_SUFFIX, NODE_AGENT_SUFFIX, PDB_SUFFIX,
};
use crate::crd::{ComponentOverride, DatadogAgentSpec};
use crate::status_reasons::{
    CONDITION_TYPE_AGENT_RECONCILE, CONDITION_TYPE_CLUSTER_AGENT_RECONCILE,
    CONDITION_TYPE_CLUSTER_CHECKS_RUNNER_RECONCILE,
};
use std::fmt;

/// One of the three sub-deployments managed for a `DatadogAgent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Component {
    /// Per-node agent (`DaemonSet` or `ExtendedDaemonSet`)
    NodeAgent,
    /// Cluster-wide agent (`Deployment`)
    ClusterAgent,
    /// Runner executing dispatched cluster checks (`Deployment`)
    ClusterChecksRunner,
}

impl Component {
    /// Components in reconcile order. The cluster agent goes first since the
    /// other two connect to it.
    pub const RECONCILE_ORDER: [Component; 3] = [
        Component::ClusterAgent,
        Component::NodeAgent,
        Component::ClusterChecksRunner,
    ];

    /// Name suffix shared by the component's default object names.
    #[must_use]
    pub fn suffix(self) -> &'static str {
        match self {
            Self::NodeAgent => NODE_AGENT_SUFFIX,
            Self::ClusterAgent => CLUSTER_AGENT_SUFFIX,
            Self::ClusterChecksRunner => CLUSTER_CHECKS_RUNNER_SUFFIX,
        }
    }

    /// Key of the component in `spec.override`.
    #[must_use]
    pub fn override_key(self) -> &'static str {
        match self {
            Self::NodeAgent => "nodeAgent",
            Self::ClusterAgent => "clusterAgent",
            Self::ClusterChecksRunner => "clusterChecksRunner",
        }
    }

    /// Status condition type reporting this component.
    #[must_use]
    pub fn condition_type(self) -> &'static str {
        match self {
            Self::NodeAgent => CONDITION_TYPE_AGENT_RECONCILE,
            Self::ClusterAgent => CONDITION_TYPE_CLUSTER_AGENT_RECONCILE,
            Self::ClusterChecksRunner => CONDITION_TYPE_CLUSTER_CHECKS_RUNNER_RECONCILE,
        }
    }

    /// Returns the override block for this component, if any.
    #[must_use]
    pub fn override_of(self, spec: &DatadogAgentSpec) -> Option<&ComponentOverride> {
        spec.overrides.get(self.override_key())
    }

    /// Returns true when the override disables this component.
    #[must_use]
    pub fn disabled_by_override(self, spec: &DatadogAgentSpec) -> bool {
        self.override_of(spec)
            .and_then(|o| o.disabled)
            .unwrap_or(false)
    }

    /// Default workload name, `{owner}-{suffix}`.
    #[must_use]
    pub fn default_workload_name(self, owner_name: &str) -> String {
        format!("{owner_name}-{}", self.suffix())
    }

    /// Effective workload name; a non-empty override name wins.
    #[must_use]
    pub fn workload_name(self, owner_name: &str, spec: &DatadogAgentSpec) -> String {
        self.override_of(spec)
            .and_then(|o| o.name.as_deref())
            .filter(|n| !n.is_empty())
            .map_or_else(|| self.default_workload_name(owner_name), str::to_string)
    }

    /// Effective service account name; a non-empty override wins.
    #[must_use]
    pub fn service_account_name(self, owner_name: &str, spec: &DatadogAgentSpec) -> String {
        self.override_of(spec)
            .and_then(|o| o.service_account_name.as_deref())
            .filter(|n| !n.is_empty())
            .map_or_else(|| self.default_workload_name(owner_name), str::to_string)
    }

    /// Name of the component's namespaced role and role binding.
    #[must_use]
    pub fn rbac_resource_name(self, owner_name: &str) -> String {
        self.default_workload_name(owner_name)
    }

    /// Name of the component's cluster role and cluster role binding.
    ///
    /// Cluster-scoped names carry the owner namespace so that owners sharing
    /// a name in different namespaces never write to the same object.
    #[must_use]
    pub fn cluster_rbac_resource_name(self, owner_namespace: &str, owner_name: &str) -> String {
        format!("{owner_namespace}-{}", self.default_workload_name(owner_name))
    }

    /// Service name, or an empty string when the component has no service.
    #[must_use]
    pub fn service_name(self, owner_name: &str) -> String {
        match self {
            Self::ClusterAgent => self.default_workload_name(owner_name),
            Self::NodeAgent | Self::ClusterChecksRunner => String::new(),
        }
    }

    /// Disruption budget name, or an empty string when unsupported.
    #[must_use]
    pub fn pdb_name(self, owner_name: &str) -> String {
        match self {
            Self::ClusterAgent | Self::ClusterChecksRunner => {
                format!("{}-{PDB_SUFFIX}", self.default_workload_name(owner_name))
            }
            Self::NodeAgent => String::new(),
        }
    }

    /// Resolve every name of the component at once.
    #[must_use]
    pub fn names(self, owner_name: &str, spec: &DatadogAgentSpec) -> ComponentNames {
        ComponentNames {
            default_workload: self.default_workload_name(owner_name),
            workload: self.workload_name(owner_name, spec),
            service_account: self.service_account_name(owner_name, spec),
            rbac: self.rbac_resource_name(owner_name),
            service: self.service_name(owner_name),
            pdb: self.pdb_name(owner_name),
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.override_key())
    }
}

/// Names of every object produced for one component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentNames {
    pub default_workload: String,
    pub workload: String,
    pub service_account: String,
    pub rbac: String,
    /// Empty when the component has no service.
    pub service: String,
    /// Empty when the component has no disruption budget.
    pub pdb: String,
}

#[cfg(test)]
#[path = "component_tests.rs"]
mod component_tests;
