//! Application metrics for Prometheus monitoring.
//!
//! This module provides:
//! - Prometheus metrics recorder initialization
//! - Metric definitions (counters and gauges)
//! - Helper functions for recording metrics

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        return false;
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("Failed to set global metrics recorder (already set)");
        return false;
    }

    if PROMETHEUS_HANDLE.set(handle).is_err() {
        tracing::warn!("Failed to store Prometheus handle (already set)");
    }

    describe_metrics();

    tracing::info!("Prometheus metrics initialized");
    true
}

fn describe_metrics() {
    describe_counter!(
        "cleanup_requests_total",
        "Cleanup requests handled, by outcome"
    );
    describe_gauge!(
        "relay_connections_active",
        "WebSocket relay connections currently open"
    );
    describe_gauge!(
        "bridge_channels_open",
        "Channels with at least one live subscriber"
    );
    describe_gauge!(
        "bridge_subscribers",
        "Live subscribers across all channels"
    );
    describe_counter!(
        "registry_ping_failures_total",
        "Registry health checks that failed"
    );
    describe_gauge!(
        "orphaned_artifacts",
        "Jobs with stored artifacts but no registry record at the last check"
    );
}

/// Render current metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

pub fn record_cleanup(outcome: &str) {
    counter!("cleanup_requests_total", "outcome" => outcome.to_string()).increment(1);
}

pub fn relay_opened() {
    gauge!("relay_connections_active").increment(1.0);
}

pub fn relay_closed() {
    gauge!("relay_connections_active").decrement(1.0);
}

pub fn record_bridge(channels: usize, subscribers: usize) {
    gauge!("bridge_channels_open").set(channels as f64);
    gauge!("bridge_subscribers").set(subscribers as f64);
}

pub fn record_ping_failure() {
    counter!("registry_ping_failures_total").increment(1);
}

pub fn record_orphans(count: usize) {
    gauge!("orphaned_artifacts").set(count as f64);
}
