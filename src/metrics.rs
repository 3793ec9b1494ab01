// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the kflex operator.
//!
//! All metrics carry the prefix `kflex_kubestellar_org_` (prometheus-safe
//! version of "kflex.kubestellar.org").
//!
//! # Metrics Categories
//!
//! - **Reconciliation Metrics** - Outcomes and durations per control plane type
//! - **Sub-resource Metrics** - Objects created by the ensure primitives
//! - **Post-create Hook Metrics** - Hooks applied and failed
//! - **Leader Election Metrics** - Leadership state of this replica
//!
//! # Example
//!
//! ```rust,no_run
//! use kflex::metrics::record_reconciliation_success;
//!
//! record_reconciliation_success("k8s", std::time::Duration::from_secs(1));
//! ```

use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::LazyLock;
use std::time::Duration;

/// Namespace prefix for all kflex metrics (prometheus-safe)
const METRICS_NAMESPACE: &str = "kflex_kubestellar_org";

/// Global Prometheus metrics registry, exposed on `/metrics`.
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Reconciliation Metrics
// ============================================================================

/// Total number of reconciliations by control plane type and outcome
///
/// Labels:
/// - `cp_type`: Control plane type (`k8s`, `ocm`, ...) or `PostCreateHook`
/// - `status`: Outcome (`success`, `error`, `paused`)
pub static RECONCILIATION_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_reconciliations_total"),
        "Total number of reconciliations by control plane type and status",
    );
    let counter = CounterVec::new(opts, &["cp_type", "status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Duration of reconciliations in seconds
pub static RECONCILIATION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_reconciliation_duration_seconds"),
        "Duration of reconciliations in seconds by control plane type",
    )
    .buckets(vec![0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]);
    let histogram = HistogramVec::new(opts, &["cp_type"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

/// Total number of failed reconciliations by error class
///
/// Labels:
/// - `cp_type`: Control plane type
/// - `error_class`: `transient` or `terminal`
pub static ERRORS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_errors_total"),
        "Total number of reconcile errors by control plane type and error class",
    );
    let counter = CounterVec::new(opts, &["cp_type", "error_class"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Sub-resource Metrics
// ============================================================================

/// Total number of sub-resources created, by kind
pub static RESOURCES_CREATED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_resources_created_total"),
        "Total number of sub-resources created by kind",
    );
    let counter = CounterVec::new(opts, &["kind"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Post-create Hook Metrics
// ============================================================================

/// Total number of post-create hook applications by hook and outcome
///
/// Labels:
/// - `hook`: `PostCreateHook` name
/// - `status`: `applied` or `failed`
pub static HOOKS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_post_create_hooks_total"),
        "Total number of post-create hook applications by hook and status",
    );
    let counter = CounterVec::new(opts, &["hook", "status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Leader Election Metrics
// ============================================================================

/// Total number of leader election events (`acquired`, `lost`)
pub static LEADER_ELECTIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_leader_elections_total"),
        "Total number of leader election events by status",
    );
    let counter = CounterVec::new(opts, &["status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Current leader election status (1 = leader, 0 = follower)
pub static LEADER_STATUS: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_leader_status"),
        "Current leader election status (1 = leader, 0 = follower)",
    );
    let gauge = GaugeVec::new(opts, &["pod_name"]).unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

// ============================================================================
// Helper Functions
// ============================================================================

/// Record a successful reconciliation
///
/// # Arguments
/// * `cp_type` - Control plane type reconciled
/// * `duration` - Duration of the reconciliation
pub fn record_reconciliation_success(cp_type: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[cp_type, "success"])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[cp_type])
        .observe(duration.as_secs_f64());
}

/// Record a failed reconciliation
///
/// # Arguments
/// * `cp_type` - Control plane type reconciled
/// * `duration` - Duration of the reconciliation before failure
/// * `transient` - Whether the error was classified as transient
pub fn record_reconciliation_error(cp_type: &str, duration: Duration, transient: bool) {
    RECONCILIATION_TOTAL
        .with_label_values(&[cp_type, "error"])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[cp_type])
        .observe(duration.as_secs_f64());
    let class = if transient { "transient" } else { "terminal" };
    ERRORS_TOTAL.with_label_values(&[cp_type, class]).inc();
}

/// Record a reconciliation skipped because the control plane is paused
pub fn record_reconciliation_paused(cp_type: &str) {
    RECONCILIATION_TOTAL
        .with_label_values(&[cp_type, "paused"])
        .inc();
}

/// Record sub-resource creation
pub fn record_resource_created(kind: &str) {
    RESOURCES_CREATED_TOTAL.with_label_values(&[kind]).inc();
}

/// Record a post-create hook application
///
/// # Arguments
/// * `hook` - Hook name
/// * `applied` - `true` when every template was applied
pub fn record_hook(hook: &str, applied: bool) {
    let status = if applied { "applied" } else { "failed" };
    HOOKS_TOTAL.with_label_values(&[hook, status]).inc();
}

/// Record leader election acquired
pub fn record_leader_elected(pod_name: &str) {
    LEADER_ELECTIONS_TOTAL
        .with_label_values(&["acquired"])
        .inc();
    LEADER_STATUS.with_label_values(&[pod_name]).set(1.0);
}

/// Record leader election lost
pub fn record_leader_lost(pod_name: &str) {
    LEADER_ELECTIONS_TOTAL.with_label_values(&["lost"]).inc();
    LEADER_STATUS.with_label_values(&[pod_name]).set(0.0);
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
