//! Metrics collection and exposition.
//!
//! # Metrics
//! - `tunnel_proxy_requests_total` (counter): proxied requests by upstream, status
//! - `tunnel_proxy_request_duration_seconds` (histogram): proxy latency by upstream
//! - `tunnel_csr_approvals_total` (counter): approver decisions by result
//! - `tunnel_certificate_rotations_total` (counter): rotations by component
//! - `tunnel_listener_serve_failures_total` (counter): serve loops that ended in error

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_proxy_request(upstream: &'static str, status: u16, elapsed: Duration) {
    metrics::counter!(
        "tunnel_proxy_requests_total",
        "upstream" => upstream,
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("tunnel_proxy_request_duration_seconds", "upstream" => upstream)
        .record(elapsed.as_secs_f64());
}

pub fn record_csr_decision(result: &'static str) {
    metrics::counter!("tunnel_csr_approvals_total", "result" => result).increment(1);
}

pub fn record_certificate_rotation(component: &str) {
    metrics::counter!("tunnel_certificate_rotations_total", "component" => component.to_string())
        .increment(1);
}

pub fn record_listener_failure(listener: &'static str) {
    metrics::counter!("tunnel_listener_serve_failures_total", "listener" => listener).increment(1);
}
