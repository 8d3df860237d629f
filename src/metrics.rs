//! Prometheus metrics

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Message direction through the proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Caller → backend
    Request,
    /// Backend → caller
    Response,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Request => "request",
            Direction::Response => "response",
        }
    }
}

/// Setup Prometheus metrics exporter
/// Returns a handle that can be used to retrieve metrics
pub fn setup_metrics() -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    tracing::info!("Prometheus metrics exporter installed");

    Ok(handle)
}

/// Record a call routed to a backend
pub fn record_call_routed(backend: &str, used_default: bool) {
    metrics::counter!("grpc_gateway_calls_routed_total",
        "backend" => backend.to_string(),
        "fallback" => used_default.to_string()
    )
    .increment(1);
}

/// Record a call rejected before dispatch
pub fn record_routing_failure() {
    metrics::counter!("grpc_gateway_routing_failures_total").increment(1);
}

/// Record the terminal status of a call
pub fn record_call_completed(backend: &str, code: tonic::Code) {
    metrics::counter!("grpc_gateway_calls_completed_total",
        "backend" => backend.to_string(),
        "code" => format!("{:?}", code)
    )
    .increment(1);
}

/// Record one message forwarded
pub fn record_message_forwarded(direction: Direction) {
    metrics::counter!("grpc_gateway_messages_forwarded_total",
        "direction" => direction.as_str()
    )
    .increment(1);
}

pub fn increment_in_flight() {
    metrics::gauge!("grpc_gateway_calls_in_flight").increment(1.0);
}

pub fn decrement_in_flight() {
    metrics::gauge!("grpc_gateway_calls_in_flight").decrement(1.0);
}
