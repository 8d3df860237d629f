//! API route definitions

use crate::registry::Registry;
use axum::{Router, routing::get};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use super::handlers;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub routing_header: String,
    pub prometheus_handle: metrics_exporter_prometheus::PrometheusHandle,
}

/// Create the admin API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/backends", get(handlers::list_backends))
        .route("/backends/{name}", get(handlers::get_backend))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}
