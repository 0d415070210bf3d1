// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Top-level `DatadogAgent` reconcile loop.
//!
//! One pass:
//!
//! 1. build fresh features from the registry and union their requirements
//! 2. let every feature queue its dependencies in the resource managers
//! 3. reconcile the cluster agent, the node agent and the cluster checks runner
//! 4. apply the queued dependencies, then delete the ones no longer queued
//! 5. write the owner status, once, when it changed
//!
//! The requeue delay is the smallest one requested during the pass, or the
//! configured default when nothing asked for an earlier look.

use super::agent::AgentReconciler;
use super::clusteragent::ClusterAgentReconciler;
use super::clusterchecksrunner::ClusterChecksRunnerReconciler;
use super::protocol::{reconcile_component, ComponentContext, ComponentReconciler};
use super::status::DatadogAgentStatusUpdater;
use super::Requeue;
use crate::component::Component;
use crate::constants::{
    DEFAULT_REQUEUE_SECS, KIND_DATADOG_AGENT, MUTATION_REQUEUE_SECS, STATUS_CONFLICT_REQUEUE_SECS,
    TRANSIENT_REQUEUE_SECS,
};
use crate::crd::{DatadogAgent, DatadogAgentStatus};
use crate::errors::Result;
use crate::feature::enabledefault::generated_token;
use crate::feature::{FeatureId, FeatureRegistry, RequiredComponents};
use crate::managers::ResourceManagers;
use crate::metrics::{
    forget_owner_features, owner_label, record_error, record_reconciliation_error, record_reconciliation_requeue,
    record_reconciliation_success,
};
use crate::platform::PlatformClient;
use crate::status_reasons::{
    CONDITION_TYPE_ACTIVE, CONDITION_TYPE_RECONCILE_ERROR, REASON_DDA_RECONCILE_ERROR, REASON_DDA_RECONCILE_OK,
    REASON_RECONCILE_FAILED, REASON_RECONCILE_SUCCEEDED, STATUS_FALSE, STATUS_TRUE,
};
use kube::ResourceExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Process-wide reconcile settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Run the node agent as an `ExtendedDaemonSet`.
    pub extended_daemonset: bool,
    /// Requeue delay of a pass that asked for nothing sooner.
    pub default_requeue: Duration,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            extended_daemonset: false,
            default_requeue: Duration::from_secs(DEFAULT_REQUEUE_SECS),
        }
    }
}

/// Result of a pass that did not fail.
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub requeue_after: Duration,
    /// Owner status at the end of the pass.
    pub status: DatadogAgentStatus,
    /// Whether the status was written.
    pub status_written: bool,
}

/// Reconciles `DatadogAgent` owners against a platform.
///
/// # Example
///
/// ```rust,no_run
/// use dd_operator::feature::default_registry;
/// use dd_operator::platform::memory::InMemoryPlatform;
/// use dd_operator::reconcilers::{ReconcileOptions, Reconciler};
/// use std::sync::Arc;
///
/// let reconciler = Reconciler::new(
///     Arc::new(InMemoryPlatform::new()),
///     default_registry().unwrap(),
///     ReconcileOptions::default(),
/// );
/// ```
pub struct Reconciler {
    platform: Arc<dyn PlatformClient>,
    registry: FeatureRegistry,
    options: ReconcileOptions,
}

impl Reconciler {
    #[must_use]
    pub fn new(platform: Arc<dyn PlatformClient>, registry: FeatureRegistry, options: ReconcileOptions) -> Self {
        Self {
            platform,
            registry,
            options,
        }
    }

    #[must_use]
    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    #[must_use]
    pub fn platform(&self) -> &Arc<dyn PlatformClient> {
        &self.platform
    }

    /// Drop the per-owner metric series of an owner that was deleted.
    pub fn forget_owner(&self, namespace: &str, name: &str) {
        info!(namespace = %namespace, name = %name, "DatadogAgent is gone, dropping its metrics");
        forget_owner_features(&owner_label(namespace, name), self.registry.ids().map(FeatureId::as_str));
    }

    fn component_reconciler(&self, component: Component) -> Box<dyn ComponentReconciler> {
        match component {
            Component::ClusterAgent => Box::new(ClusterAgentReconciler),
            Component::NodeAgent => Box::new(AgentReconciler::new(self.options.extended_daemonset)),
            Component::ClusterChecksRunner => Box::new(ClusterChecksRunnerReconciler),
        }
    }

    /// Run one reconcile pass for `owner`.
    ///
    /// Transient platform errors are turned into a short requeue without
    /// touching status. Any other failure is recorded in the `Active` and
    /// `DatadogAgentReconcileError` conditions, then returned.
    ///
    /// # Errors
    ///
    /// Returns validation and invariant errors of the pass, and status write
    /// errors other than conflicts.
    pub async fn reconcile(&self, owner: &DatadogAgent) -> Result<ReconcileOutcome> {
        let start = Instant::now();
        let namespace = owner.namespace().unwrap_or_default();
        let name = owner.name_any();
        info!(namespace = %namespace, name = %name, "Reconciling DatadogAgent");

        let mut status = DatadogAgentStatusUpdater::new(owner);
        match self.run_pass(owner, &mut status).await {
            Ok(mut requeue) => {
                status.set_condition(
                    CONDITION_TYPE_ACTIVE,
                    STATUS_TRUE,
                    REASON_RECONCILE_SUCCEEDED,
                    "DatadogAgent reconciled",
                );
                status.set_condition(CONDITION_TYPE_RECONCILE_ERROR, STATUS_FALSE, REASON_DDA_RECONCILE_OK, "");
                status.set_observed_generation(owner.metadata.generation);

                let status_written = match status.apply(self.platform.as_ref()).await {
                    Ok(written) => written,
                    Err(e) if e.is_conflict() => {
                        warn!(namespace = %namespace, name = %name, "DatadogAgent changed while reconciling, retrying");
                        record_reconciliation_requeue(KIND_DATADOG_AGENT, "status_conflict");
                        requeue = requeue.merge(Requeue::after_secs(STATUS_CONFLICT_REQUEUE_SECS));
                        false
                    }
                    Err(e) => {
                        record_reconciliation_error(KIND_DATADOG_AGENT, start.elapsed());
                        return Err(e.into());
                    }
                };

                let requeue_after = requeue.duration().unwrap_or(self.options.default_requeue);
                record_reconciliation_success(KIND_DATADOG_AGENT, start.elapsed());
                info!(
                    namespace = %namespace,
                    name = %name,
                    requeue_secs = requeue_after.as_secs(),
                    duration_ms = start.elapsed().as_millis(),
                    "Reconciled DatadogAgent"
                );
                Ok(ReconcileOutcome {
                    requeue_after,
                    status: status.into_status(),
                    status_written,
                })
            }
            Err(e) if e.is_transient() => {
                warn!(namespace = %namespace, name = %name, error = %e, "Transient error, retrying shortly");
                record_reconciliation_requeue(KIND_DATADOG_AGENT, e.status_reason());
                Ok(ReconcileOutcome {
                    requeue_after: Duration::from_secs(TRANSIENT_REQUEUE_SECS),
                    status: owner.status.clone().unwrap_or_default(),
                    status_written: false,
                })
            }
            Err(e) => {
                error!(namespace = %namespace, name = %name, error = %e, "Failed to reconcile DatadogAgent");
                let message = e.to_string();
                status.set_condition(CONDITION_TYPE_ACTIVE, STATUS_FALSE, REASON_RECONCILE_FAILED, &message);
                status.set_condition(
                    CONDITION_TYPE_RECONCILE_ERROR,
                    STATUS_TRUE,
                    REASON_DDA_RECONCILE_ERROR,
                    &message,
                );
                if let Err(status_err) = status.apply(self.platform.as_ref()).await {
                    warn!(namespace = %namespace, name = %name, error = %status_err, "Failed to record reconcile error in status");
                }
                record_reconciliation_error(KIND_DATADOG_AGENT, start.elapsed());
                record_error(KIND_DATADOG_AGENT, e.status_reason());
                Err(e)
            }
        }
    }

    async fn run_pass(&self, owner: &DatadogAgent, status: &mut DatadogAgentStatusUpdater) -> Result<Requeue> {
        let (features, mut required) = self.registry.build_features(owner)?;
        enable_overridden_components(owner, &mut required);
        debug!(
            cluster_agent = required.cluster_agent.is_enabled(),
            agent = required.agent.is_enabled(),
            cluster_checks_runner = required.cluster_checks_runner.is_enabled(),
            "Resolved required components"
        );

        let mut managers = ResourceManagers::new(owner)?;
        for feature in &features {
            feature.manage_dependencies(&mut managers, &required)?;
        }

        let ctx = ComponentContext {
            platform: self.platform.as_ref(),
            owner,
            features: &features,
            required: &required,
        };
        let mut requeue = Requeue::none();
        for component in Component::RECONCILE_ORDER {
            let reconciler = self.component_reconciler(component);
            let next = reconcile_component(reconciler.as_ref(), &ctx, &mut managers, status).await?;
            requeue = requeue.merge(next);
        }

        let applied = managers.store().apply(ctx.platform).await?;
        if applied.mutated() {
            requeue = requeue.merge(Requeue::after_secs(MUTATION_REQUEUE_SECS));
        }
        let removed = managers.store().cleanup(ctx.platform).await?;
        debug!(
            created = applied.created,
            updated = applied.updated,
            removed,
            "Applied dependencies"
        );

        if let Some(token) = generated_token(owner, &managers) {
            status.set_generated_token(token);
        }
        status.flush_override_conflicts();
        Ok(requeue)
    }
}

/// An override block that does not disable its component asks for it, unless
/// a feature vetoed it.
fn enable_overridden_components(owner: &DatadogAgent, required: &mut RequiredComponents) {
    for component in Component::RECONCILE_ORDER {
        if component.override_of(&owner.spec).is_none() || component.disabled_by_override(&owner.spec) {
            continue;
        }
        let slot = required.get_mut(component);
        if slot.is_required.is_none() {
            slot.is_required = Some(true);
        }
    }
}

#[cfg(test)]
#[path = "datadogagent_tests.rs"]
mod datadogagent_tests;
