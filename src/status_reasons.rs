// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Status condition types and reasons written on `DatadogAgent` resources.
//!
//! # Condition Layout
//!
//! Every reconcile pass writes:
//!
//! - one encompassing `Active` condition, `True` when the pass succeeded
//! - a `DatadogAgentReconcileError` condition carrying the last error message
//! - one condition per reconciled component (`ClusterAgentReconcile`, ...)
//!
//! # Example Status
//!
//! ```yaml
//! status:
//!   conditions:
//!     - type: Active
//!       status: "True"
//!       reason: ReconcileSucceeded
//!     - type: DatadogAgentReconcileError
//!       status: "False"
//!       reason: DatadogAgent_reconcile_ok
//!     - type: ClusterAgentReconcile
//!       status: "True"
//!       reason: reconcile_succeed
//! ```

// ============================================================================
// Condition Types
// ============================================================================

/// Encompassing condition reflecting the outcome of the latest pass
pub const CONDITION_TYPE_ACTIVE: &str = "Active";

/// Condition holding the message of the latest reconcile error
pub const CONDITION_TYPE_RECONCILE_ERROR: &str = "DatadogAgentReconcileError";

/// Condition of the node agent component
pub const CONDITION_TYPE_AGENT_RECONCILE: &str = "AgentReconcile";

/// Condition of the cluster agent component
pub const CONDITION_TYPE_CLUSTER_AGENT_RECONCILE: &str = "ClusterAgentReconcile";

/// Condition of the cluster checks runner component
pub const CONDITION_TYPE_CLUSTER_CHECKS_RUNNER_RECONCILE: &str = "ClusterChecksRunnerReconcile";

/// Condition raised when an override disables a component a feature requires
pub const CONDITION_TYPE_OVERRIDE_CONFLICT: &str = "OverrideReconcileConflict";

// ============================================================================
// Condition Status Values
// ============================================================================

/// Condition status `True`
pub const STATUS_TRUE: &str = "True";

/// Condition status `False`
pub const STATUS_FALSE: &str = "False";

// ============================================================================
// Reasons
// ============================================================================

/// The pass completed without error.
pub const REASON_RECONCILE_SUCCEEDED: &str = "ReconcileSucceeded";

/// The pass failed; the message carries the error.
pub const REASON_RECONCILE_FAILED: &str = "ReconcileFailed";

/// Reason of `DatadogAgentReconcileError=False`.
pub const REASON_DDA_RECONCILE_OK: &str = "DatadogAgent_reconcile_ok";

/// Reason of `DatadogAgentReconcileError=True`.
pub const REASON_DDA_RECONCILE_ERROR: &str = "DatadogAgent_reconcile_error";

/// A component was reconciled.
pub const REASON_COMPONENT_SUCCEEDED: &str = "reconcile_succeed";

/// A feature failed while building a component.
pub const REASON_COMPONENT_FAILED: &str = "reconcile_failed";

/// The override disabled a component that features require.
pub const REASON_OVERRIDE_CONFLICT: &str = "OverrideConflict";

// ============================================================================
// Component Status Summaries
// ============================================================================

/// Summary after a workload was created
pub const SUMMARY_CREATE_SUCCEEDED: &str = "CreateSucceeded";

/// Summary after a workload was updated
pub const SUMMARY_UPDATE_SUCCEEDED: &str = "UpdateSucceeded";

/// Summary when the live workload already matches the desired hash
pub const SUMMARY_UP_TO_DATE: &str = "UpToDate";

/// Summary after the workload was deleted for a kind or selector change
pub const SUMMARY_DELETED_FOR_RECREATE: &str = "DeletedForRecreate";

// ============================================================================
// Component Rollout States
// ============================================================================

/// Workload is rolling out for the first time
pub const STATE_PROGRESSING: &str = "Progressing";

/// Every desired pod is ready and up to date
pub const STATE_RUNNING: &str = "Running";

/// Workload is rolling out a new template
pub const STATE_UPDATING: &str = "Updating";

/// Workload wants pods but none are available
pub const STATE_FAILED: &str = "Failed";
