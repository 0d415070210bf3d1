// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Status condition helpers and the `DatadogAgent` status updater.
//!
//! # Condition Format
//!
//! Conditions follow the standard Kubernetes layout:
//! - `type`: the aspect being reported (e.g., `Active`, `ClusterAgentReconcile`)
//! - `status`: "True", "False", or "Unknown"
//! - `reason`: a programmatic identifier
//! - `message`: a human-readable explanation
//! - `lastTransitionTime`: RFC3339 timestamp of the last status flip
//!
//! # Example
//!
//! ```rust
//! use dd_operator::reconcilers::status::create_condition;
//!
//! let condition = create_condition(
//!     "ClusterAgentReconcile",
//!     "True",
//!     "reconcile_succeed",
//!     "CreateSucceeded",
//! );
//! assert_eq!(condition.status, "True");
//! ```

use crate::component::Component;
use crate::crd::{ComponentStatus, Condition, DatadogAgent, DatadogAgentStatus};
use crate::errors::PlatformError;
use crate::platform::PlatformClient;
use crate::status_reasons::{CONDITION_TYPE_OVERRIDE_CONFLICT, REASON_OVERRIDE_CONFLICT, STATUS_TRUE};
use chrono::Utc;
use kube::ResourceExt;
use tracing::debug;

/// Create a new condition stamped with the current time.
#[must_use]
pub fn create_condition(condition_type: &str, status: &str, reason: &str, message: &str) -> Condition {
    Condition {
        r#type: condition_type.to_string(),
        status: status.to_string(),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        last_transition_time: Some(Utc::now().to_rfc3339()),
    }
}

/// Find a condition by type.
#[must_use]
pub fn find_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

/// Update or add a condition in a conditions list (in-memory, no API call).
///
/// The `lastTransitionTime` of an existing condition is kept when its status
/// does not change.
pub fn update_condition_in_memory(
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.r#type == condition_type) {
        let last_transition_time = if existing.status == status {
            existing
                .last_transition_time
                .clone()
                .unwrap_or_else(|| Utc::now().to_rfc3339())
        } else {
            Utc::now().to_rfc3339()
        };

        existing.status = status.to_string();
        existing.reason = Some(reason.to_string());
        existing.message = Some(message.to_string());
        existing.last_transition_time = Some(last_transition_time);
    } else {
        conditions.push(create_condition(condition_type, status, reason, message));
    }
}

/// Compare two condition lists, ignoring order and `lastTransitionTime`.
#[must_use]
pub fn conditions_equal(current: &[Condition], new: &[Condition]) -> bool {
    if current.len() != new.len() {
        return false;
    }

    new.iter().all(|new_cond| {
        find_condition(current, &new_cond.r#type).is_some_and(|curr_cond| {
            curr_cond.status == new_cond.status
                && curr_cond.reason == new_cond.reason
                && curr_cond.message == new_cond.message
        })
    })
}

/// Collects every status change of one reconcile pass and writes them in a
/// single call at the end.
///
/// # Example
///
/// ```rust,ignore
/// let mut status = DatadogAgentStatusUpdater::new(&owner);
/// status.set_condition("Active", "True", "ReconcileSucceeded", "");
/// status.apply(platform.as_ref()).await?;
/// ```
#[derive(Debug, Clone)]
pub struct DatadogAgentStatusUpdater {
    owner: DatadogAgent,
    current_status: Option<DatadogAgentStatus>,
    new_status: DatadogAgentStatus,
    override_conflicts: Vec<Component>,
}

impl DatadogAgentStatusUpdater {
    /// Start from the status currently stored on the owner.
    #[must_use]
    pub fn new(owner: &DatadogAgent) -> Self {
        let current_status = owner.status.clone();
        Self {
            new_status: current_status.clone().unwrap_or_default(),
            current_status,
            owner: owner.clone(),
            override_conflicts: Vec::new(),
        }
    }

    pub fn set_condition(&mut self, condition_type: &str, status: &str, reason: &str, message: &str) {
        update_condition_in_memory(
            &mut self.new_status.conditions,
            condition_type,
            status,
            reason,
            message,
        );
    }

    pub fn remove_condition(&mut self, condition_type: &str) {
        self.new_status.conditions.retain(|c| c.r#type != condition_type);
    }

    /// Status of `component` as it stands in this pass.
    #[must_use]
    pub fn component(&self, component: Component) -> Option<&ComponentStatus> {
        self.component_slot(component).as_ref()
    }

    /// Replace, or clear with `None`, the status of `component`.
    pub fn set_component(&mut self, component: Component, status: Option<ComponentStatus>) {
        *self.component_slot_mut(component) = status;
    }

    /// Remember that an override disabled `component` although a feature requires it.
    pub fn record_override_conflict(&mut self, component: Component) {
        if !self.override_conflicts.contains(&component) {
            self.override_conflicts.push(component);
        }
    }

    /// Turn the conflicts recorded in this pass into the override conflict
    /// condition, removing it when there were none.
    pub fn flush_override_conflicts(&mut self) {
        if self.override_conflicts.is_empty() {
            self.remove_condition(CONDITION_TYPE_OVERRIDE_CONFLICT);
            return;
        }
        let message = self
            .override_conflicts
            .iter()
            .map(|c| format!("{c} component is set to disabled"))
            .collect::<Vec<_>>()
            .join("; ");
        self.set_condition(
            CONDITION_TYPE_OVERRIDE_CONFLICT,
            STATUS_TRUE,
            REASON_OVERRIDE_CONFLICT,
            &message,
        );
    }

    /// Keep the generated cluster agent token in status so later passes reuse it.
    pub fn set_generated_token(&mut self, token: String) {
        self.new_status
            .cluster_agent
            .get_or_insert_with(ComponentStatus::default)
            .generated_token = Some(token);
    }

    pub fn set_observed_generation(&mut self, generation: Option<i64>) {
        self.new_status.observed_generation = generation;
    }

    #[must_use]
    pub fn status(&self) -> &DatadogAgentStatus {
        &self.new_status
    }

    #[must_use]
    pub fn into_status(self) -> DatadogAgentStatus {
        self.new_status
    }

    /// Returns true when the collected status differs from the stored one,
    /// ignoring condition order and transition times.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        let Some(current) = &self.current_status else {
            return true;
        };
        if !conditions_equal(&current.conditions, &self.new_status.conditions) {
            return true;
        }

        let without_conditions = |status: &DatadogAgentStatus| DatadogAgentStatus {
            conditions: Vec::new(),
            ..status.clone()
        };
        without_conditions(current) != without_conditions(&self.new_status)
    }

    /// Write the collected status when it changed.
    ///
    /// Returns true when a write was made.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::Conflict`] when the owner changed since it was
    /// read, or any other error of the status write.
    pub async fn apply(&self, platform: &dyn PlatformClient) -> Result<bool, PlatformError> {
        if !self.has_changes() {
            debug!(
                namespace = %self.owner.namespace().unwrap_or_default(),
                name = %self.owner.name_any(),
                "DatadogAgent status unchanged, skipping update"
            );
            return Ok(false);
        }

        platform.patch_owner_status(&self.owner, &self.new_status).await?;
        debug!(
            namespace = %self.owner.namespace().unwrap_or_default(),
            name = %self.owner.name_any(),
            conditions = self.new_status.conditions.len(),
            "Updated DatadogAgent status"
        );
        Ok(true)
    }

    fn component_slot(&self, component: Component) -> &Option<ComponentStatus> {
        match component {
            Component::NodeAgent => &self.new_status.agent,
            Component::ClusterAgent => &self.new_status.cluster_agent,
            Component::ClusterChecksRunner => &self.new_status.cluster_checks_runner,
        }
    }

    fn component_slot_mut(&mut self, component: Component) -> &mut Option<ComponentStatus> {
        match component {
            Component::NodeAgent => &mut self.new_status.agent,
            Component::ClusterAgent => &mut self.new_status.cluster_agent,
            Component::ClusterChecksRunner => &mut self.new_status.cluster_checks_runner,
        }
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod status_tests;
