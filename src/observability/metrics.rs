//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by route, method, status
//! - `gateway_request_duration_seconds` (histogram): latency by route
//! - `gateway_route_misses_total` (counter): requests no route matched
//! - `gateway_rate_limited_total` (counter): denials by route
//! - `gateway_retries_total` (counter): retries by route and reason
//! - `gateway_circuit_breaker_transitions_total` (counter): state changes by breaker
//! - `gateway_circuit_breaker_rejected_total` (counter): calls refused while open
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so tests need no setup
//! - Prometheus exposition is opt-in from configuration

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder with an HTTP scrape listener.
/// Must be called from within the tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "failed to install metrics exporter"),
    }
}

pub fn record_request(route: &str, method: &str, status: u16, start: Instant) {
    metrics::counter!(
        "gateway_requests_total",
        "route" => route.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("gateway_request_duration_seconds", "route" => route.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_route_miss() {
    metrics::counter!("gateway_route_misses_total").increment(1);
}

pub fn record_rate_limited(route: &str) {
    metrics::counter!("gateway_rate_limited_total", "route" => route.to_string()).increment(1);
}

pub fn record_retry(route: &str, reason: &str) {
    metrics::counter!(
        "gateway_retries_total",
        "route" => route.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

pub fn record_circuit_transition(breaker: &str, state: &'static str) {
    metrics::counter!(
        "gateway_circuit_breaker_transitions_total",
        "breaker" => breaker.to_string(),
        "state" => state
    )
    .increment(1);
}

pub fn record_circuit_rejected(breaker: &str) {
    metrics::counter!("gateway_circuit_breaker_rejected_total", "breaker" => breaker.to_string())
        .increment(1);
}
