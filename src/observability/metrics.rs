//! Metrics collection and exposition.
//!
//! # Metrics
//! - `endpoint_binds_total` (counter): listen sockets bound, by endpoint and backend
//! - `endpoint_unbinds_total` (counter): listen sockets released, by endpoint
//! - `endpoint_accepts_total` (counter): connections handed to a worker
//! - `endpoint_accept_errors_total` (counter): failed `accept` calls
//! - `endpoint_active_connections` (gauge): connections currently being served

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::net::backend::BackendKind;

/// Install the Prometheus recorder and serve it on `addr`.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "metrics endpoint listening");
    Ok(())
}

pub fn listen_socket_bound(endpoint: &str, backend: BackendKind) {
    counter!(
        "endpoint_binds_total",
        "endpoint" => endpoint.to_string(),
        "backend" => backend.as_str()
    )
    .increment(1);
}

pub fn listen_socket_released(endpoint: &str) {
    counter!("endpoint_unbinds_total", "endpoint" => endpoint.to_string()).increment(1);
}

pub fn connection_accepted(endpoint: &str) {
    counter!("endpoint_accepts_total", "endpoint" => endpoint.to_string()).increment(1);
}

pub fn accept_error(endpoint: &str) {
    counter!("endpoint_accept_errors_total", "endpoint" => endpoint.to_string()).increment(1);
}

pub fn active_connections(endpoint: &str, count: u64) {
    gauge!("endpoint_active_connections", "endpoint" => endpoint.to_string()).set(count as f64);
}
