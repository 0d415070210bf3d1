// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the agent operator.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// API Constants
// ============================================================================

/// API group for the `DatadogAgent` CRD
pub const API_GROUP: &str = "datadoghq.com";

/// Kind name for the `DatadogAgent` resource
pub const KIND_DATADOG_AGENT: &str = "DatadogAgent";

/// API version of the `ExtendedDaemonSet` workload
pub const EDS_API_VERSION: &str = "v1alpha1";

/// Kind name of the `ExtendedDaemonSet` workload
pub const KIND_EXTENDED_DAEMONSET: &str = "ExtendedDaemonSet";

/// Plural resource name of the `ExtendedDaemonSet` workload
pub const EDS_PLURAL: &str = "extendeddaemonsets";

// ============================================================================
// Operator Identity
// ============================================================================

/// Field manager / controller name used for API writes and the managed-by label
pub const OPERATOR_NAME: &str = "datadog-operator";

/// Name used for the tokio worker threads
pub const RUNTIME_THREAD_NAME: &str = "dd-operator";

/// Number of tokio worker threads
pub const RUNTIME_WORKER_THREADS: usize = 4;

// ============================================================================
// Annotations
// ============================================================================

/// Annotation holding the MD5 digest of a managed object's desired state
pub const MD5_SPEC_HASH_ANNOTATION: &str = "agent.datadoghq.com/agentspechash";

/// Prefix of the per-feature custom configuration checksum annotation
pub const CHECKSUM_ANNOTATION_PREFIX: &str = "checksum";

/// Suffix of the per-feature custom configuration checksum annotation
pub const CHECKSUM_ANNOTATION_SUFFIX: &str = "custom-config";

/// Substring identifying operator-owned label and annotation keys that survive merges
pub const OPERATOR_KEY_MARKER: &str = "datadoghq.com";

// ============================================================================
// Component Suffixes and Container Names
// ============================================================================

/// Default name suffix of the node agent workload
pub const NODE_AGENT_SUFFIX: &str = "agent";

/// Default name suffix of the cluster agent workload
pub const CLUSTER_AGENT_SUFFIX: &str = "cluster-agent";

/// Default name suffix of the cluster checks runner workload
pub const CLUSTER_CHECKS_RUNNER_SUFFIX: &str = "cluster-checks-runner";

/// Suffix appended to the disruption budget name of a component
pub const PDB_SUFFIX: &str = "pdb";

/// Main container of the node agent pod
pub const CORE_AGENT_CONTAINER: &str = "agent";

/// Trace agent container of the node agent pod
pub const TRACE_AGENT_CONTAINER: &str = "trace-agent";

/// Process agent container of the node agent pod
pub const PROCESS_AGENT_CONTAINER: &str = "process-agent";

/// Single unprivileged container used instead of the multi-container node agent
pub const UNPRIVILEGED_SINGLE_AGENT_CONTAINER: &str = "unprivileged-single-agent";

/// Main container of the cluster agent pod
pub const CLUSTER_AGENT_CONTAINER: &str = "cluster-agent";

/// Main container of the cluster checks runner pod
pub const CLUSTER_CHECKS_RUNNER_CONTAINER: &str = "agent";

// ============================================================================
// Images
// ============================================================================

/// Default registry for agent images
pub const DEFAULT_REGISTRY: &str = "gcr.io/datadoghq";

/// Default node agent / cluster checks runner image name
pub const DEFAULT_AGENT_IMAGE_NAME: &str = "agent";

/// Default node agent / cluster checks runner image tag
pub const DEFAULT_AGENT_IMAGE_TAG: &str = "7.60.0";

/// Default cluster agent image name
pub const DEFAULT_CLUSTER_AGENT_IMAGE_NAME: &str = "cluster-agent";

/// Default cluster agent image tag
pub const DEFAULT_CLUSTER_AGENT_IMAGE_TAG: &str = "7.60.0";

// ============================================================================
// Ports
// ============================================================================

/// Port the cluster agent listens on for node agent requests
pub const CLUSTER_AGENT_PORT: i32 = 5005;

/// Port name of the cluster agent API
pub const CLUSTER_AGENT_PORT_NAME: &str = "agentport";

/// Default `DogStatsD` UDP port
pub const DOGSTATSD_PORT: i32 = 8125;

/// Port name of the `DogStatsD` listener
pub const DOGSTATSD_PORT_NAME: &str = "dogstatsdport";

// ============================================================================
// Workload Defaults
// ============================================================================

/// Default cluster agent replica count
pub const DEFAULT_CLUSTER_AGENT_REPLICAS: i32 = 1;

/// Default cluster checks runner replica count
pub const DEFAULT_CLUSTER_CHECKS_RUNNER_REPLICAS: i32 = 1;

/// `minAvailable` of the cluster agent disruption budget
pub const CLUSTER_AGENT_PDB_MIN_AVAILABLE: i32 = 1;

/// `maxUnavailable` of the cluster checks runner disruption budget
pub const CLUSTER_CHECKS_RUNNER_PDB_MAX_UNAVAILABLE: i32 = 1;

// ============================================================================
// Credentials
// ============================================================================

/// Key of the API key inside credential secrets
pub const API_KEY_SECRET_KEY: &str = "api_key";

/// Key of the application key inside credential secrets
pub const APP_KEY_SECRET_KEY: &str = "app_key";

/// Key of the cluster agent token inside its secret
pub const TOKEN_SECRET_KEY: &str = "token";

// ============================================================================
// Requeue Timing
// ============================================================================

/// Steady-state requeue period (seconds) when a pass changed nothing
pub const DEFAULT_REQUEUE_SECS: u64 = 15;

/// Requeue delay (seconds) after a workload was created or updated
pub const MUTATION_REQUEUE_SECS: u64 = 1;

/// Requeue delay (seconds) after a workload kind swap deleted the previous kind
pub const STRATEGY_SWAP_REQUEUE_SECS: u64 = 5;

/// Requeue delay (seconds) after a write conflict on the owner status
pub const STATUS_CONFLICT_REQUEUE_SECS: u64 = 1;

/// Requeue delay (seconds) after a transient platform error (not found, conflict)
pub const TRANSIENT_REQUEUE_SECS: u64 = 1;

/// Requeue delay (seconds) applied by the controller error policy
pub const ERROR_REQUEUE_SECS: u64 = 30;

// ============================================================================
// HTTP Server
// ============================================================================

/// Default bind address of the metrics and health server
pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:8080";

/// Path serving Prometheus metrics
pub const METRICS_PATH: &str = "/metrics";

/// Liveness probe path
pub const HEALTHZ_PATH: &str = "/healthz";

/// Readiness probe path
pub const READYZ_PATH: &str = "/readyz";
