//! Metrics collection and exposition.
//!
//! # Metrics
//! - `lifecycle_shutdown_initiated_total` (counter)
//! - `lifecycle_termination_hook_result_total` (counter): by result
//! - `lifecycle_forced_termination_total` (counter): by reason
//! - `lifecycle_pending_tasks` (gauge)
//! - `drain_tracked_connections` (gauge): by listener
//! - `drain_connections_closed_total` (counter): by listener, reason
//! - `drain_rejected_connections_total` (counter): by listener
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so the library is
//!   usable without an exporter
//! - Prometheus exporter is optional and owns its own HTTP listener

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

const SHUTDOWN_INITIATED: &str = "lifecycle_shutdown_initiated_total";
const HOOK_RESULT: &str = "lifecycle_termination_hook_result_total";
const FORCED_TERMINATION: &str = "lifecycle_forced_termination_total";
const PENDING_TASKS: &str = "lifecycle_pending_tasks";
const TRACKED_CONNECTIONS: &str = "drain_tracked_connections";
const CONNECTIONS_CLOSED: &str = "drain_connections_closed_total";
const REJECTED_CONNECTIONS: &str = "drain_rejected_connections_total";

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_shutdown_initiated() {
    metrics::counter!(SHUTDOWN_INITIATED).increment(1);
}

pub fn record_hook_result(result: &'static str) {
    metrics::counter!(HOOK_RESULT, "result" => result).increment(1);
}

pub fn record_forced_termination(reason: &'static str) {
    metrics::counter!(FORCED_TERMINATION, "reason" => reason).increment(1);
}

pub fn set_pending_tasks(count: usize) {
    metrics::gauge!(PENDING_TASKS).set(count as f64);
}

pub fn set_tracked_connections(listener: &str, count: usize) {
    metrics::gauge!(TRACKED_CONNECTIONS, "listener" => listener.to_string()).set(count as f64);
}

pub fn record_connection_closed(listener: &str, reason: &'static str) {
    metrics::counter!(
        CONNECTIONS_CLOSED,
        "listener" => listener.to_string(),
        "reason" => reason
    )
    .increment(1);
}

pub fn record_rejected_connection(listener: &str) {
    metrics::counter!(REJECTED_CONNECTIONS, "listener" => listener.to_string()).increment(1);
}
