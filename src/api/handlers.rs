//! API request handlers

use super::models::{BackendInfo, BackendsResponse, HealthResponse};
use super::routes::AppState;
use crate::error::ApiError;
use crate::registry::Registry;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

/// GET /health - Gateway health check
///
/// Degraded when no backend is registered, since every call would be rejected.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let backends = state.registry.len();
    let (code, status) = if backends == 0 {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    } else {
        (StatusCode::OK, "healthy")
    };

    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            backends,
            timestamp: chrono::Utc::now(),
        }),
    )
}

/// GET /metrics - Prometheus metrics
pub async fn metrics(State(state): State<AppState>) -> String {
    state.prometheus_handle.render()
}

/// GET /backends - List backends in registration order
pub async fn list_backends(State(state): State<AppState>) -> Json<BackendsResponse> {
    let backends = state
        .registry
        .iter()
        .map(|backend| BackendInfo::from_backend(backend, is_default(&state.registry, backend.name())))
        .collect();

    Json(BackendsResponse {
        routing_header: state.routing_header.clone(),
        backends,
    })
}

/// GET /backends/{name} - Get backend details
pub async fn get_backend(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<BackendInfo>, ApiError> {
    let backend = state
        .registry
        .lookup(&name)
        .ok_or_else(|| ApiError::NotFound(format!("Backend '{}' not found", name)))?;

    Ok(Json(BackendInfo::from_backend(
        backend,
        is_default(&state.registry, &name),
    )))
}

fn is_default(registry: &Registry, name: &str) -> bool {
    registry
        .default_backend()
        .is_some_and(|backend| backend.name() == name)
}
