//! Error types for the proxy core and the admin API

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tonic::Status;

/// Failures while building the backend registry at startup
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Backend name cannot be empty")]
    EmptyName,

    #[error("Backend '{0}' is already registered")]
    Duplicate(String),

    #[error("Invalid address for backend '{name}': {reason}")]
    InvalidAddress { name: String, reason: String },

    #[error("Failed to connect to backend '{name}' at {address}: {source}")]
    Connect {
        name: String,
        address: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("Default backend '{0}' is not registered")]
    UnknownDefault(String),
}

/// Failures while picking a backend for a call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("No backends registered")]
    NoBackends,

    #[error("No backend selected for call")]
    MissingContext,

    #[error("Invalid routing header '{0}'")]
    InvalidHeader(String),
}

impl From<RoutingError> for Status {
    fn from(err: RoutingError) -> Self {
        Status::internal(err.to_string())
    }
}

/// Failures while setting up or running the proxy listener
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error("Invalid TLS configuration: {0}")]
    Tls(#[source] tonic::transport::Error),

    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("Listener error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures while forwarding an accepted call
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("Backend '{backend}' unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("Inbound call cancelled")]
    UpstreamCancel,

    #[error("Stream error: {0}")]
    StreamIo(Status),
}

impl ForwardError {
    /// Terminal status reported to the caller
    pub fn into_status(self) -> Status {
        match self {
            ForwardError::BackendUnavailable { .. } => Status::unavailable(self.to_string()),
            ForwardError::UpstreamCancel => Status::cancelled(self.to_string()),
            // Surface the original code, keep its trailers
            ForwardError::StreamIo(status) => status,
        }
    }
}

impl From<ForwardError> for Status {
    fn from(err: ForwardError) -> Self {
        err.into_status()
    }
}

/// Admin API error types
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };

        let body = Json(ErrorResponse {
            error: message,
            timestamp: chrono::Utc::now(),
        });

        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    timestamp: chrono::DateTime<chrono::Utc>,
}
