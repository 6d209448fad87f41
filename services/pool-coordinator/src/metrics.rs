//! Prometheus metrics exposition
//!
//! Metric names served on `/metrics`:
//!
//! - `pool_signals_total` (counter): label `outcome`
//! - `pool_selections_total` (counter): label `outcome`
//! - `pool_activations_total` (counter): label `outcome`
//! - `pool_reconcile_transitions_total` (counter): label `transition`
//! - `pool_reconcile_duration_seconds` (histogram)
//! - `pool_accounts` (gauge): label `state`
//!
//! The transition counter, sweep histogram, and state gauges are emitted
//! by the reconcile sweep itself; this module records the per-request
//! outcomes.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// Configures `pool_reconcile_duration_seconds` with explicit buckets so it
/// renders as a Prometheus histogram (with `_bucket` lines) rather than the
/// default summary. A sweep is file IO over a small map, so the buckets
/// cover 1ms to 2.5s.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(
                "pool_reconcile_duration_seconds".to_string(),
            ),
            &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5],
        )
        .expect("failed to set histogram buckets")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record an ingested signal with its outcome label.
pub fn record_signal(outcome: &str) {
    metrics::counter!("pool_signals_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record a selection attempt with its outcome label.
pub fn record_selection(outcome: &str) {
    metrics::counter!("pool_selections_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record an activation attempt with its outcome label.
pub fn record_activation(outcome: &str) {
    metrics::counter!("pool_activations_total", "outcome" => outcome.to_string()).increment(1);
}
