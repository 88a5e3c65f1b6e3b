//! Metrics collection and export.
//!
//! Uses the `metrics` crate for instrumentation and exports to
//! Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "ripple_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "ripple_connections_active";
    pub const STREAM_EVENTS_TOTAL: &str = "ripple_stream_events_total";
    pub const CONNECTION_ERRORS_TOTAL: &str = "ripple_connection_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of cable connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active cable connections"
    );
    metrics::describe_counter!(
        names::STREAM_EVENTS_TOTAL,
        "Total number of dispatched stream events by method"
    );
    metrics::describe_counter!(
        names::CONNECTION_ERRORS_TOTAL,
        "Total number of connections ended by an error"
    );

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a dispatched stream event.
pub fn record_stream_event(method: &str) {
    counter!(names::STREAM_EVENTS_TOTAL, "method" => method.to_string()).increment(1);
}

/// Record a connection that ended with an error.
pub fn record_connection_error() {
    counter!(names::CONNECTION_ERRORS_TOTAL).increment(1);
}

/// Metrics guard that records the connection lifecycle.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        counter!(names::CONNECTIONS_TOTAL).increment(1);
        gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_guard() {
        // Just test that it doesn't panic.
        let _guard = ConnectionMetricsGuard::new();
        record_stream_event("SUB");
        record_connection_error();
    }
}
