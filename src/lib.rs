//! gRPC Gateway - transparent gRPC reverse proxy
//!
//! A single listener accepts calls for any service/method, picks a backend per
//! call from request metadata, and forwards headers, messages, half-close,
//! cancellation and the final status without decoding payloads.

pub mod api;
pub mod config;
pub mod demo;
pub mod error;
pub mod grpc;
pub mod metrics;
pub mod registry;

pub use config::{BackendConfig, GatewayConfig, TlsConfig};
pub use error::{ForwardError, RegistryError, RoutingError, ServerError};
pub use grpc::{ServerOptions, start_grpc_server};
pub use registry::{Backend, Registry, RegistryBuilder};
