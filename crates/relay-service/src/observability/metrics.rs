//! Metrics definitions for the relay service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `relay_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Message handling is in-memory fan-out; p99 target < 10ms
        .set_buckets_for_metric(
            Matcher::Prefix("relay_message".to_string()),
            &[
                0.0005, 0.001, 0.0025, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250,
            ],
        )
        .map_err(|e| format!("Failed to set message latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Gauges
// ============================================================================

/// Metric: `relay_rooms_active`
pub fn set_rooms_active(count: usize) {
    // usize to f64 conversion is safe for realistic room counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("relay_rooms_active").set(count as f64);
}

/// Metric: `relay_connections_active`
pub fn set_connections_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("relay_connections_active").set(count as f64);
}

/// Metric: `relay_participants_active`
pub fn set_participants_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("relay_participants_active").set(count as f64);
}

/// Metric: `relay_actor_mailbox_depth`
/// Labels: `actor_type` (registry, room, connection)
pub fn set_actor_mailbox_depth(actor_type: &'static str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("relay_actor_mailbox_depth", "actor_type" => actor_type).set(depth as f64);
}

// ============================================================================
// Counters
// ============================================================================

/// Metric: `relay_joins_total`
/// Labels: `outcome` (accepted, full, in_progress, not_found, conflict, error)
pub fn record_join(outcome: &'static str) {
    counter!("relay_joins_total", "outcome" => outcome).increment(1);
}

/// Metric: `relay_signals_relayed_total`
/// Labels: `kind` (offer, answer, candidate)
pub fn record_signal_relayed(kind: &'static str) {
    counter!("relay_signals_relayed_total", "kind" => kind).increment(1);
}

/// Metric: `relay_signals_dropped_total`
/// Labels: `kind` (offer, answer, candidate)
pub fn record_signal_dropped(kind: &'static str) {
    counter!("relay_signals_dropped_total", "kind" => kind).increment(1);
}

/// Metric: `relay_host_elections_total`
pub fn record_host_election() {
    counter!("relay_host_elections_total").increment(1);
}

/// Metric: `relay_actor_panics_total`
/// Labels: `actor_type`
pub fn record_actor_panic(actor_type: &'static str) {
    counter!("relay_actor_panics_total", "actor_type" => actor_type).increment(1);
}

// ============================================================================
// Histograms
// ============================================================================

/// Metric: `relay_message_latency_seconds`
/// Labels: `event` (bounded by the client event set)
pub fn record_message_latency(event: &'static str, duration: Duration) {
    histogram!("relay_message_latency_seconds", "event" => event).record(duration.as_secs_f64());
}
