// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Feature registry and feature lifecycle.
//!
//! A feature is an independently authored unit that contributes configuration
//! to one or more component pod templates. Every pass builds fresh feature
//! instances from the [`FeatureRegistry`] and drives them through a fixed
//! lifecycle:
//!
//! 1. [`Feature::configure`] reads the owner spec and returns the
//!    [`RequiredComponents`] of the feature
//! 2. [`Feature::manage_dependencies`] queues auxiliary objects through the
//!    [`ResourceManagers`]
//! 3. the `manage_*` calls return pod template instructions for each
//!    component that exists
//!
//! A disabled feature is still driven through every step and answers with
//! empty requirements and empty instruction lists.
//!
//! # Example
//!
//! ```rust,no_run
//! use dd_operator::crd::{DatadogAgent, DatadogAgentSpec};
//! use dd_operator::feature::default_registry;
//!
//! let registry = default_registry().unwrap();
//! let owner = DatadogAgent::new("foo", DatadogAgentSpec::default());
//! let (features, required) = registry.build_features(&owner).unwrap();
//! assert!(required.cluster_agent.is_enabled());
//! assert_eq!(features.len(), registry.len());
//! ```

pub mod admissioncontroller;
pub mod clusterchecks;
pub mod dogstatsd;
pub mod enabledefault;
pub mod eventcollection;
pub mod externalmetrics;
pub mod kubernetesstatecore;
pub mod logcollection;
pub mod orchestratorexplorer;
pub mod rbac;

use crate::component::Component;
use crate::constants::{CORE_AGENT_CONTAINER, UNPRIVILEGED_SINGLE_AGENT_CONTAINER};
use crate::crd::{ContainerStrategy, DatadogAgent};
use crate::errors::{FeatureError, Result};
use crate::managers::ResourceManagers;
use crate::metrics::{owner_label, record_feature_enabled};
use crate::podtemplate::PodTemplateChanges;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

// ============================================================================
// Feature identifiers
// ============================================================================

/// Identifier of a built-in feature.
///
/// Features are configured and applied in declaration order, so `Default`
/// always runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FeatureId {
    Default,
    ClusterChecks,
    EventCollection,
    KubernetesStateCore,
    LogCollection,
    Dogstatsd,
    ExternalMetrics,
    OrchestratorExplorer,
    AdmissionController,
}

impl FeatureId {
    /// Every built-in feature.
    pub const ALL: [FeatureId; 9] = [
        FeatureId::Default,
        FeatureId::ClusterChecks,
        FeatureId::EventCollection,
        FeatureId::KubernetesStateCore,
        FeatureId::LogCollection,
        FeatureId::Dogstatsd,
        FeatureId::ExternalMetrics,
        FeatureId::OrchestratorExplorer,
        FeatureId::AdmissionController,
    ];

    /// Stable string id, also used in checksum annotation keys.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::ClusterChecks => "cluster_checks",
            Self::EventCollection => "event_collection",
            Self::KubernetesStateCore => "kubernetes_state_core",
            Self::LogCollection => "log_collection",
            Self::Dogstatsd => "dogstatsd",
            Self::ExternalMetrics => "external_metrics",
            Self::OrchestratorExplorer => "orchestrator_explorer",
            Self::AdmissionController => "admission_controller",
        }
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Required components
// ============================================================================

/// What one feature needs from one component.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequiredComponent {
    /// `None` when the feature has no opinion, `Some(false)` to veto the component.
    pub is_required: Option<bool>,
    /// Containers the feature needs in the component pod.
    pub containers: Vec<String>,
}

impl RequiredComponent {
    /// Component required with the given containers.
    #[must_use]
    pub fn required(containers: &[&str]) -> Self {
        Self {
            is_required: Some(true),
            containers: containers.iter().map(|c| (*c).to_string()).collect(),
        }
    }

    /// Component explicitly set to `required`.
    #[must_use]
    pub fn with_flag(required: bool) -> Self {
        Self {
            is_required: Some(required),
            containers: Vec::new(),
        }
    }

    /// Returns true when the component must exist.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.is_required == Some(true) || !self.containers.is_empty()
    }

    /// Returns true when the feature expressed any opinion on the component.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.is_required.is_some() || !self.containers.is_empty()
    }

    /// Returns true when the only container requested is the unprivileged
    /// single agent container.
    #[must_use]
    pub fn single_container_strategy_enabled(&self) -> bool {
        self.containers.len() == 1 && self.containers[0] == UNPRIVILEGED_SINGLE_AGENT_CONTAINER
    }

    /// Merge another requirement into this one.
    ///
    /// An absent flag defers to the other side. When both sides carry a flag,
    /// any `false` wins. Containers are unioned, keeping first-seen order.
    pub fn merge(&mut self, other: &RequiredComponent) -> &mut Self {
        self.is_required = match (self.is_required, other.is_required) {
            (None, flag) | (flag, None) => flag,
            (Some(a), Some(b)) => Some(a && b),
        };
        for container in &other.containers {
            if !self.containers.contains(container) {
                self.containers.push(container.clone());
            }
        }
        self
    }
}

/// Requirements of a feature (or of all features) on every component.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequiredComponents {
    pub cluster_agent: RequiredComponent,
    pub agent: RequiredComponent,
    pub cluster_checks_runner: RequiredComponent,
}

impl RequiredComponents {
    /// Requirement on `component`.
    #[must_use]
    pub fn get(&self, component: Component) -> &RequiredComponent {
        match component {
            Component::NodeAgent => &self.agent,
            Component::ClusterAgent => &self.cluster_agent,
            Component::ClusterChecksRunner => &self.cluster_checks_runner,
        }
    }

    pub fn get_mut(&mut self, component: Component) -> &mut RequiredComponent {
        match component {
            Component::NodeAgent => &mut self.agent,
            Component::ClusterAgent => &mut self.cluster_agent,
            Component::ClusterChecksRunner => &mut self.cluster_checks_runner,
        }
    }

    /// Returns true when any component is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.cluster_agent.is_enabled() || self.agent.is_enabled() || self.cluster_checks_runner.is_enabled()
    }

    /// Returns true when any component is configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.cluster_agent.is_configured()
            || self.agent.is_configured()
            || self.cluster_checks_runner.is_configured()
    }

    /// Merge every component requirement of `other` into `self`.
    pub fn merge(&mut self, other: &RequiredComponents) -> &mut Self {
        self.cluster_agent.merge(&other.cluster_agent);
        self.agent.merge(&other.agent);
        self.cluster_checks_runner.merge(&other.cluster_checks_runner);
        self
    }
}

// ============================================================================
// Feature trait
// ============================================================================

/// A pluggable unit contributing configuration to component pod templates.
///
/// Every method besides [`Feature::id`] and [`Feature::configure`] defaults to
/// a no-op, so a feature only implements the components it touches.
pub trait Feature: Send + Sync + fmt::Debug {
    /// Identifier of the feature.
    fn id(&self) -> FeatureId;

    /// Capture the feature settings from the owner and return what the
    /// feature needs.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the owner spec is inconsistent.
    fn configure(&mut self, owner: &DatadogAgent) -> Result<RequiredComponents>;

    /// Queue auxiliary objects (config maps, secrets, RBAC) in the managers.
    ///
    /// # Errors
    ///
    /// Returns an error if an object cannot be queued.
    fn manage_dependencies(
        &self,
        _managers: &mut ResourceManagers,
        _components: &RequiredComponents,
    ) -> Result<()> {
        Ok(())
    }

    /// Instructions for the cluster agent pod template.
    ///
    /// # Errors
    ///
    /// Returns an error if the instructions cannot be built.
    fn manage_cluster_agent(&self) -> Result<PodTemplateChanges> {
        Ok(PodTemplateChanges::new())
    }

    /// Instructions for the multi-container node agent pod template.
    ///
    /// # Errors
    ///
    /// Returns an error if the instructions cannot be built.
    fn manage_node_agent(&self) -> Result<PodTemplateChanges> {
        Ok(PodTemplateChanges::new())
    }

    /// Instructions for the single-container node agent pod template.
    ///
    /// # Errors
    ///
    /// Returns an error if the instructions cannot be built.
    fn manage_single_container_node_agent(&self) -> Result<PodTemplateChanges> {
        Ok(PodTemplateChanges::new())
    }

    /// Instructions for the cluster checks runner pod template.
    ///
    /// # Errors
    ///
    /// Returns an error if the instructions cannot be built.
    fn manage_cluster_checks_runner(&self) -> Result<PodTemplateChanges> {
        Ok(PodTemplateChanges::new())
    }
}

/// Builds a fresh, unconfigured feature.
pub type FeatureConstructor = fn() -> Box<dyn Feature>;

// ============================================================================
// Registry
// ============================================================================

/// Closed mapping from [`FeatureId`] to constructor, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct FeatureRegistry {
    constructors: BTreeMap<FeatureId, FeatureConstructor>,
}

impl FeatureRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`FeatureError::DuplicateRegistration`] if `id` is already registered.
    pub fn register(&mut self, id: FeatureId, constructor: FeatureConstructor) -> Result<(), FeatureError> {
        if self.constructors.contains_key(&id) {
            return Err(FeatureError::DuplicateRegistration {
                feature: id.to_string(),
            });
        }
        self.constructors.insert(id, constructor);
        Ok(())
    }

    /// Registered ids, in application order.
    pub fn ids(&self) -> impl Iterator<Item = FeatureId> + '_ {
        self.constructors.keys().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }

    /// Build and configure a fresh instance of every registered feature.
    ///
    /// Returns the configured features, in application order, together with
    /// the union of their requirements.
    ///
    /// # Errors
    ///
    /// Returns the first configuration error raised by a feature.
    pub fn build_features(
        &self,
        owner: &DatadogAgent,
    ) -> Result<(Vec<Box<dyn Feature>>, RequiredComponents)> {
        let owner_label = owner_label(&owner.namespace().unwrap_or_default(), &owner.name_any());
        let mut features = Vec::with_capacity(self.constructors.len());
        let mut required = RequiredComponents::default();

        for (id, constructor) in &self.constructors {
            let mut feature = constructor();
            let feature_required = feature.configure(owner)?;
            let enabled = feature_required.is_enabled();
            debug!(feature = %id, enabled, "Configured feature");
            record_feature_enabled(&owner_label, id.as_str(), enabled);

            required.merge(&feature_required);
            features.push(feature);
        }

        Ok((features, required))
    }
}

/// Registry holding every built-in feature.
///
/// # Errors
///
/// Returns [`FeatureError::DuplicateRegistration`] if a built-in id is
/// registered twice.
pub fn default_registry() -> Result<FeatureRegistry, FeatureError> {
    let mut registry = FeatureRegistry::new();
    registry.register(FeatureId::Default, enabledefault::build)?;
    registry.register(FeatureId::ClusterChecks, clusterchecks::build)?;
    registry.register(FeatureId::EventCollection, eventcollection::build)?;
    registry.register(FeatureId::KubernetesStateCore, kubernetesstatecore::build)?;
    registry.register(FeatureId::LogCollection, logcollection::build)?;
    registry.register(FeatureId::Dogstatsd, dogstatsd::build)?;
    registry.register(FeatureId::ExternalMetrics, externalmetrics::build)?;
    registry.register(FeatureId::OrchestratorExplorer, orchestratorexplorer::build)?;
    registry.register(FeatureId::AdmissionController, admissioncontroller::build)?;
    Ok(registry)
}

// ============================================================================
// Helpers shared by features
// ============================================================================

/// Returns true when the owner asks for the single-container node agent.
#[must_use]
pub fn single_container_strategy(owner: &DatadogAgent) -> bool {
    owner
        .spec
        .global
        .as_ref()
        .and_then(|g| g.container_strategy)
        == Some(ContainerStrategy::Single)
}

/// Node agent container a feature should request for the owner's strategy.
#[must_use]
pub fn node_agent_container(owner: &DatadogAgent) -> &'static str {
    if single_container_strategy(owner) {
        UNPRIVILEGED_SINGLE_AGENT_CONTAINER
    } else {
        CORE_AGENT_CONTAINER
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod mod_tests;
