// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definition for the `DatadogAgent` owner resource.
//!
//! A single `DatadogAgent` describes the whole agent deployment of a cluster:
//! global settings, the features to enable, and per-component overrides. The
//! operator turns it into workloads, services, RBAC objects, config maps,
//! secrets and disruption budgets for three components:
//!
//! - the node agent (one pod per node)
//! - the cluster agent
//! - the cluster checks runner
//!
//! # Example
//!
//! ```rust,no_run
//! use dd_operator::crd::{ClusterChecksFeatureConfig, DatadogAgentSpec, FeaturesConfig};
//!
//! let spec = DatadogAgentSpec {
//!     features: Some(FeaturesConfig {
//!         cluster_checks: Some(ClusterChecksFeatureConfig {
//!             enabled: Some(true),
//!             use_cluster_checks_runners: Some(true),
//!         }),
//!         ..FeaturesConfig::default()
//!     }),
//!     ..DatadogAgentSpec::default()
//! };
//! ```

use k8s_openapi::api::core::v1::{EnvVar, KeyToPath};
use kube::{CustomResource, CustomResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `DatadogAgent` describes the desired agent deployment of a cluster.
///
/// # Example
///
/// ```yaml
/// apiVersion: datadoghq.com/v2alpha1
/// kind: DatadogAgent
/// metadata:
///   name: datadog
///   namespace: monitoring
/// spec:
///   global:
///     clusterName: prod-eu
///     credentials:
///       apiSecret:
///         secretName: datadog-keys
///         keyName: api-key
///   features:
///     clusterChecks:
///       enabled: true
///       useClusterChecksRunners: true
///   override:
///     clusterAgent:
///       replicas: 2
/// ```
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "datadoghq.com",
    version = "v2alpha1",
    kind = "DatadogAgent",
    namespaced,
    shortname = "dda",
    doc = "DatadogAgent deploys the Datadog node agent, cluster agent and cluster checks runner with the features enabled in its spec."
)]
#[kube(status = "DatadogAgentStatus")]
#[serde(rename_all = "camelCase")]
pub struct DatadogAgentSpec {
    /// Settings shared by every component.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global: Option<GlobalConfig>,

    /// Features to enable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<FeaturesConfig>,

    /// Per-component overrides keyed by `nodeAgent`, `clusterAgent` or `clusterChecksRunner`.
    #[serde(default, rename = "override", skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<String, ComponentOverride>,
}

/// Settings shared by every component.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GlobalConfig {
    /// Name of the cluster, reported as `DD_CLUSTER_NAME`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,

    /// Datadog intake site (e.g., "datadoghq.eu").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,

    /// Image registry used when an override does not name a full image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,

    /// API and application keys.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<DatadogCredentials>,

    /// Plaintext token shared by the cluster agent and node agents.
    ///
    /// Mutually exclusive with `clusterAgentTokenSecret`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_agent_token: Option<String>,

    /// Existing secret holding the cluster agent token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_agent_token_secret: Option<SecretReference>,

    /// Drop non-resource URL rules from the generated cluster roles.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_non_resource_rules: Option<bool>,

    /// How node agent processes are laid out in the pod.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_strategy: Option<ContainerStrategy>,

    /// Tags attached to every metric, reported as `DD_TAGS`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Node agent container layout.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ContainerStrategy {
    /// One container per agent process.
    #[default]
    Optimized,
    /// Every process in a single unprivileged container.
    Single,
}

/// API and application keys.
///
/// For each key, either the plaintext value or a secret reference may be
/// set, never both.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatadogCredentials {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<SecretReference>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_secret: Option<SecretReference>,
}

/// Reference to a key inside an existing `Secret` in the owner namespace.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    pub secret_name: String,
    pub key_name: String,
}

/// Features that can be enabled on the agent deployment.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeaturesConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_checks: Option<ClusterChecksFeatureConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_collection: Option<EventCollectionFeatureConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub kube_state_metrics_core: Option<KubeStateMetricsCoreFeatureConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_collection: Option<LogCollectionFeatureConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dogstatsd: Option<DogstatsdFeatureConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_metrics_server: Option<ExternalMetricsServerFeatureConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub orchestrator_explorer: Option<OrchestratorExplorerFeatureConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub admission_controller: Option<AdmissionControllerFeatureConfig>,
}

/// Cluster checks dispatching by the cluster agent.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterChecksFeatureConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Run dispatched checks in the cluster checks runner instead of node agents.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_cluster_checks_runners: Option<bool>,
}

/// Kubernetes event collection by the cluster agent.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventCollectionFeatureConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collect_kubernetes_events: Option<bool>,
}

/// The kubernetes_state_core check.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubeStateMetricsCoreFeatureConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Custom check configuration replacing the generated one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conf: Option<CustomConfig>,
}

/// Log collection by the node agent.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogCollectionFeatureConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_collect_all: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_collect_using_files: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_logs_path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_logs_path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_symlinks_path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_storage_path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_files_limit: Option<i32>,
}

/// `DogStatsD` listener of the node agent.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DogstatsdFeatureConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_detection_enabled: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_port_config: Option<HostPortConfig>,
}

/// Exposes a container port on the node.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HostPortConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
}

/// External metrics provider served by the cluster agent to the HPA controller.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalMetricsServerFeatureConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Serve metrics from `DatadogMetric` objects. Defaults to true.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_datadog_metrics: Option<bool>,

    /// Let the cluster agent serve `WatermarkPodAutoscaler` objects.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wpa_controller: Option<bool>,

    /// Port the provider listens on. Defaults to 8443.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    /// Register the `v1beta1.external.metrics.k8s.io` APIService. Defaults to true.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub register_api_service: Option<bool>,

    /// Datadog endpoint queried for metric values.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,
}

/// Orchestrator explorer (live Kubernetes resources view).
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorExplorerFeatureConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Custom check configuration replacing the generated one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conf: Option<CustomConfig>,

    /// Scrub sensitive values from container specs. Defaults to true.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scrub_containers: Option<bool>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_tags: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dd_url: Option<String>,

    /// Custom resources to collect, as `group/version/resource`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_resources: Vec<String>,
}

/// Admission controller run by the cluster agent.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionControllerFeatureConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Inject configuration into pods without the admission label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mutate_unlabelled: Option<bool>,

    /// Name of the webhook `Service`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    /// How injected pods reach the agent: `hostip`, `service` or `socket`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_communication_mode: Option<String>,

    /// `Ignore` or `Fail`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_policy: Option<String>,

    /// Name of the webhook configuration the cluster agent manages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_name: Option<String>,

    /// Registry of injected library images. Defaults to `global.registry`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
}

/// User-supplied configuration, either inline or from an existing `ConfigMap`.
///
/// `configData` and `configMap` are mutually exclusive.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CustomConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_data: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_map: Option<ConfigMapConfig>,
}

/// Reference to an existing `ConfigMap`.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapConfig {
    pub name: String,

    /// Keys to project; all keys are mounted when empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<KeyToPath>,
}

/// Override applied to one component after features have run.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentOverride {
    /// Workload name replacing `{owner}-{suffix}`. Cannot change once created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<AgentImageConfig>,

    /// Environment variables added to every container.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    /// Labels added to the pod template.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Annotations added to the pod template.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,

    /// Remove the component even when a feature requires it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,

    /// Per-container overrides keyed by container name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub containers: BTreeMap<String, ContainerOverride>,
}

/// Image used by a component.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentImageConfig {
    /// Image name, or a full `registry/name:tag` reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// Override applied to a single container.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerOverride {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

/// Condition represents an observation of a resource's current state.
///
/// Conditions are used in status subresources to communicate the state of
/// a resource to users and controllers.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., `Active`, `DatadogAgentReconcileError`).
    pub r#type: String,

    /// Status of the condition: True, False, or Unknown.
    pub status: String,

    /// Brief CamelCase reason for the condition's last transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message indicating details about the transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the condition transitioned from one status to another (RFC3339 format).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

/// `DatadogAgent` status
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatadogAgentStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Node agent workload status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<ComponentStatus>,

    /// Cluster agent workload status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_agent: Option<ComponentStatus>,

    /// Cluster checks runner workload status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_checks_runner: Option<ComponentStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Observed state of one component workload.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    /// Pods the workload wants running.
    pub desired: i32,

    /// Pods currently scheduled.
    pub current: i32,

    /// Pods passing readiness.
    pub ready: i32,

    /// Pods available for at least `minReadySeconds`.
    pub available: i32,

    /// Pods running the latest template.
    pub up_to_date: i32,

    /// Rollout state: Progressing, Running, Updating or Failed.
    #[serde(default)]
    pub state: String,

    /// Short human-readable summary (e.g., "Running (2/2/2)").
    #[serde(default)]
    pub status: String,

    /// Content hash of the last applied template.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_hash: Option<String>,

    /// Name of the workload, fixed once created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workload_name: Option<String>,

    /// Kind of the workload (Deployment, DaemonSet or ExtendedDaemonSet).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workload_kind: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update: Option<String>,

    /// Cluster agent token generated by the operator when none is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_token: Option<String>,
}

/// Render the `DatadogAgent` CRD as YAML.
///
/// # Errors
///
/// Returns an error if the CRD cannot be serialized.
pub fn crd_yaml() -> Result<String, serde_yaml::Error> {
    serde_yaml::to_string(&DatadogAgent::crd())
}

#[cfg(test)]
#[path = "crd_tests.rs"]
mod crd_tests;
