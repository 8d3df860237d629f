//! Transparent gRPC proxy
//!
//! Accepts calls for any service/method, routes each call to a backend chosen
//! from its metadata, and forwards it without decoding payloads.

pub mod codec;
pub mod context;
pub mod dispatcher;
pub mod forward;
pub mod routing;
pub mod server;

pub use codec::RawCodec;
pub use context::{CallContext, RoutingDecision};
pub use dispatcher::{GenericDispatcher, MethodDescriptor, MethodKind};
pub use forward::{CallState, ForwardCall};
pub use routing::{DEFAULT_ROUTING_HEADER, RoutingInterceptor, RoutingResolver};
pub use server::{ServerOptions, TlsPem, proxy_routes, proxy_server, serve_proxy, start_grpc_server};
