//! Metrics collection and export for the Parley client.
//!
//! Uses the `metrics` crate for instrumentation and optionally exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const EVENTS_INBOUND: &str = "parley_events_inbound_total";
    pub const EVENTS_OUTBOUND: &str = "parley_events_outbound_total";
    pub const EVENTS_DROPPED: &str = "parley_events_dropped_total";
    pub const RECONNECTS_TOTAL: &str = "parley_reconnects_total";
    pub const CONNECTED: &str = "parley_connected";
    pub const LEDGER_SIZE: &str = "parley_ledger_messages";
}

/// Describe the client's metrics.
pub fn init_metrics() {
    metrics::describe_counter!(names::EVENTS_INBOUND, "Server events received, by event name");
    metrics::describe_counter!(names::EVENTS_OUTBOUND, "Events sent to the server, by event name");
    metrics::describe_counter!(
        names::EVENTS_DROPPED,
        "Server events that had no effect, by reason"
    );
    metrics::describe_counter!(names::RECONNECTS_TOTAL, "Reconnection attempts");
    metrics::describe_gauge!(names::CONNECTED, "1 while a connection is open");
    metrics::describe_gauge!(names::LEDGER_SIZE, "Messages currently in the ledger");
}

/// Start the Prometheus metrics endpoint.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("127.0.0.1:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record an inbound event.
pub fn record_inbound(event: &str) {
    counter!(names::EVENTS_INBOUND, "event" => event.to_string()).increment(1);
}

/// Record an outbound event.
pub fn record_outbound(event: &str) {
    counter!(names::EVENTS_OUTBOUND, "event" => event.to_string()).increment(1);
}

/// Record an inbound event that was dropped.
pub fn record_dropped(reason: &'static str) {
    counter!(names::EVENTS_DROPPED, "reason" => reason).increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect() {
    counter!(names::RECONNECTS_TOTAL).increment(1);
}

/// Update the connection gauge.
pub fn set_connected(connected: bool) {
    gauge!(names::CONNECTED).set(if connected { 1.0 } else { 0.0 });
}

/// Update the ledger size gauge.
pub fn set_ledger_size(count: usize) {
    gauge!(names::LEDGER_SIZE).set(count as f64);
}
