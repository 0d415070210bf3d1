// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the agent operator.
//!
//! Every metric carries the `datadog_operator_` prefix.
//!
//! # Metrics Categories
//!
//! - **Reconciliation Metrics** - Track reconcile passes, their outcome and duration
//! - **Resource Lifecycle Metrics** - Track managed object creation, updates, and deletions
//! - **Error Metrics** - Track errors by class
//! - **Feature Metrics** - Track which features are enabled per owner
//!
//! # Example
//!
//! ```rust,no_run
//! use dd_operator::metrics::record_reconciliation_success;
//!
//! record_reconciliation_success("DatadogAgent", std::time::Duration::from_secs(1));
//! ```

use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::LazyLock;
use std::time::Duration;

// ============================================================================
// Metric Name Constants
// ============================================================================

/// Namespace prefix for all operator metrics
const METRICS_NAMESPACE: &str = "datadog_operator";

// ============================================================================
// Global Metrics Registry
// ============================================================================

/// Global Prometheus metrics registry
///
/// All metrics are registered in this registry and exposed via `/metrics` endpoint.
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

fn counter_vec(name: &str, help: &str, labels: &[&str]) -> CounterVec {
    let opts = Opts::new(format!("{METRICS_NAMESPACE}_{name}"), help);
    let counter = CounterVec::new(opts, labels).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
}

// ============================================================================
// Reconciliation Metrics
// ============================================================================

/// Total number of reconcile passes by resource type and status
///
/// Labels:
/// - `resource_type`: Kind of the owner (`DatadogAgent`)
/// - `status`: Outcome (`success`, `error`, `requeue`)
pub static RECONCILIATION_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    counter_vec(
        "reconciliations_total",
        "Total number of reconciliations by resource type and status",
        &["resource_type", "status"],
    )
});

/// Duration of reconcile passes in seconds
pub static RECONCILIATION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_reconciliation_duration_seconds"),
        "Duration of reconciliation operations in seconds",
    )
    .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]);
    let histogram = HistogramVec::new(opts, &["resource_type"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

/// Requeues by reason
///
/// Labels:
/// - `resource_type`: Kind of the owner
/// - `reason`: `default`, `mutation`, `strategy_swap`, `status_conflict`, `transient`
pub static REQUEUE_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    counter_vec(
        "requeues_total",
        "Total number of requeues by reason",
        &["resource_type", "reason"],
    )
});

// ============================================================================
// Resource Lifecycle Metrics
// ============================================================================

/// Managed objects created, by kind
pub static RESOURCES_CREATED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    counter_vec(
        "resources_created_total",
        "Total number of managed objects created",
        &["resource_type"],
    )
});

/// Managed objects updated, by kind
pub static RESOURCES_UPDATED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    counter_vec(
        "resources_updated_total",
        "Total number of managed objects updated",
        &["resource_type"],
    )
});

/// Managed objects deleted, by kind
pub static RESOURCES_DELETED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    counter_vec(
        "resources_deleted_total",
        "Total number of managed objects deleted",
        &["resource_type"],
    )
});

// ============================================================================
// Error Metrics
// ============================================================================

/// Errors by resource type and class
///
/// Labels:
/// - `resource_type`: Kind of the owner
/// - `error_type`: `transient`, `validation`, `invariant`, or a condition reason
pub static ERRORS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    counter_vec(
        "errors_total",
        "Total number of errors by resource type and error category",
        &["resource_type", "error_type"],
    )
});

// ============================================================================
// Feature Metrics
// ============================================================================

/// 1 when the feature is enabled on the owner, 0 otherwise
///
/// Labels:
/// - `owner`: `namespace/name` of the `DatadogAgent`
/// - `feature`: Feature id
pub static FEATURE_ENABLED: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_feature_enabled"),
        "Whether a feature is enabled on a DatadogAgent",
    );
    let gauge = GaugeVec::new(opts, &["owner", "feature"]).unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

// ============================================================================
// Helper Functions
// ============================================================================

/// Record a successful reconciliation
///
/// # Arguments
/// * `resource_type` - The kind of resource reconciled
/// * `duration` - Duration of the reconciliation
pub fn record_reconciliation_success(resource_type: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[resource_type, "success"])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[resource_type])
        .observe(duration.as_secs_f64());
}

/// Record a failed reconciliation
///
/// # Arguments
/// * `resource_type` - The kind of resource reconciled
/// * `duration` - Duration of the reconciliation before failure
pub fn record_reconciliation_error(resource_type: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[resource_type, "error"])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[resource_type])
        .observe(duration.as_secs_f64());
}

/// Record a reconciliation requeue
pub fn record_reconciliation_requeue(resource_type: &str, reason: &str) {
    RECONCILIATION_TOTAL
        .with_label_values(&[resource_type, "requeue"])
        .inc();
    REQUEUE_TOTAL
        .with_label_values(&[resource_type, reason])
        .inc();
}

/// Record managed object creation
pub fn record_resource_created(resource_type: &str) {
    RESOURCES_CREATED_TOTAL
        .with_label_values(&[resource_type])
        .inc();
}

/// Record managed object update
pub fn record_resource_updated(resource_type: &str) {
    RESOURCES_UPDATED_TOTAL
        .with_label_values(&[resource_type])
        .inc();
}

/// Record managed object deletion
pub fn record_resource_deleted(resource_type: &str) {
    RESOURCES_DELETED_TOTAL
        .with_label_values(&[resource_type])
        .inc();
}

/// Record an error
///
/// # Arguments
/// * `resource_type` - The kind of resource where error occurred
/// * `error_type` - Category of error
pub fn record_error(resource_type: &str, error_type: &str) {
    ERRORS_TOTAL
        .with_label_values(&[resource_type, error_type])
        .inc();
}

/// Owner label value of per-owner series: `<namespace>/<name>`
#[must_use]
pub fn owner_label(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// Record whether a feature is enabled on an owner
///
/// # Arguments
/// * `owner` - Owner label, see [`owner_label`]
/// * `feature` - Feature id
/// * `enabled` - Whether the feature is enabled
pub fn record_feature_enabled(owner: &str, feature: &str, enabled: bool) {
    FEATURE_ENABLED
        .with_label_values(&[owner, feature])
        .set(if enabled { 1.0 } else { 0.0 });
}

/// Drop the feature series of an owner that no longer exists
pub fn forget_owner_features<'a>(owner: &str, features: impl IntoIterator<Item = &'a str>) {
    for feature in features {
        // Err only means the series was never recorded
        let _ = FEATURE_ENABLED.remove_label_values(&[owner, feature]);
    }
}

/// Gather and encode all metrics in Prometheus text format
///
/// # Errors
/// Returns error if encoding fails
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_successful_pass_counts_and_times() {
        record_reconciliation_success("DatadogAgentSuccess", Duration::from_millis(500));

        let passes = RECONCILIATION_TOTAL.with_label_values(&["DatadogAgentSuccess", "success"]);
        assert!(passes.get() >= 1.0);
        assert!(RECONCILIATION_DURATION_SECONDS
            .with_label_values(&["DatadogAgentSuccess"])
            .get_sample_count()
            >= 1);
    }

    #[test]
    fn test_record_requeue_reason() {
        record_reconciliation_requeue("TestRequeue", "strategy_swap");

        let counter = REQUEUE_TOTAL.with_label_values(&["TestRequeue", "strategy_swap"]);
        assert!(counter.get() > 0.0);
    }

    #[test]
    fn test_feature_series_are_per_namespace_and_forgotten() {
        let team_a = owner_label("team-a", "agents");
        let team_b = owner_label("team-b", "agents");
        record_feature_enabled(&team_a, "event_collection", true);
        record_feature_enabled(&team_b, "event_collection", false);

        assert!((FEATURE_ENABLED.with_label_values(&[&team_a, "event_collection"]).get() - 1.0).abs() < f64::EPSILON);

        forget_owner_features(&team_a, ["event_collection", "cluster_checks"]);
        let text = gather_metrics().unwrap();
        assert!(!text.contains("owner=\"team-a/agents\""));
        assert!(text.contains("owner=\"team-b/agents\""));
    }

    #[test]
    fn test_record_feature_enabled_toggles() {
        record_feature_enabled("bar/foo", "cluster_checks", true);
        assert!((FEATURE_ENABLED.with_label_values(&["bar/foo", "cluster_checks"]).get() - 1.0).abs() < f64::EPSILON);

        record_feature_enabled("bar/foo", "cluster_checks", false);
        assert!(FEATURE_ENABLED.with_label_values(&["bar/foo", "cluster_checks"]).get().abs() < f64::EPSILON);
    }

    #[test]
    fn test_exposition_lists_operator_metrics() {
        record_reconciliation_success("DatadogAgentGather", Duration::from_millis(100));
        record_resource_created("ConfigMap");

        let text = gather_metrics().unwrap();
        for name in [
            "datadog_operator_reconciliations_total",
            "datadog_operator_resources_created_total",
        ] {
            assert!(text.contains(name), "missing {name}");
        }
    }
}
