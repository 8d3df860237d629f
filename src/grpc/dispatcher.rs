//! Catch-all handler: turns any inbound method path into a forwarded call

use bytes::Bytes;
use std::convert::Infallible;
use std::task::{Context, Poll};
use tonic::Status;
use tonic::body::Body as GrpcBody;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::codegen::{Body, BoxFuture, StdError, http};
use tower::Service;

use super::codec::RawCodec;
use super::context::CallContext;
use super::forward::ForwardCall;
use crate::error::RoutingError;

/// Declared shape of a method's streams
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    /// Not known to the proxy; any of the four call shapes is accepted
    Unknown,
    Unary,
    Streaming,
}

/// Schema-less description of one call, built fresh per call
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    full_name: String,
    path: PathAndQuery,
    kind: MethodKind,
}

impl MethodDescriptor {
    /// Describe the method behind an inbound request path
    pub fn for_path(path: &str) -> Result<Self, Status> {
        let full_name = normalize_method_name(path).to_string();
        let path = PathAndQuery::try_from(format!("/{}", full_name))
            .map_err(|e| Status::internal(format!("Invalid method path '{}': {}", path, e)))?;

        Ok(Self {
            full_name,
            path,
            kind: MethodKind::Unknown,
        })
    }

    /// `package.Service/Method`, without a leading separator
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Path used for the outbound call
    pub fn path(&self) -> &PathAndQuery {
        &self.path
    }

    pub fn kind(&self) -> MethodKind {
        self.kind
    }

    pub fn service(&self) -> Option<&str> {
        self.full_name.rsplit_once('/').map(|(service, _)| service)
    }

    pub fn method(&self) -> Option<&str> {
        self.full_name.rsplit_once('/').map(|(_, method)| method)
    }

    pub fn request_codec(&self) -> RawCodec {
        RawCodec
    }

    pub fn response_codec(&self) -> RawCodec {
        RawCodec
    }
}

/// Strip a single leading '/' from a method path
pub fn normalize_method_name(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}

/// Tower service answering every gRPC path
///
/// Expects a [`CallContext`] in the request extensions, placed there by the
/// routing interceptor. Without one the call fails with INTERNAL and no
/// backend call is attempted.
#[derive(Debug, Clone)]
pub struct GenericDispatcher {
    max_message_size: usize,
}

impl GenericDispatcher {
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }
}

impl<B> Service<http::Request<B>> for GenericDispatcher
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<GrpcBody>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, mut req: http::Request<B>) -> Self::Future {
        let context = CallContext::take(req.extensions_mut());
        let max_message_size = self.max_message_size;

        Box::pin(async move {
            let path = req.uri().path();

            let Some(context) = context else {
                tracing::error!(method = path, "No backend selected for call");
                return Ok(Status::from(RoutingError::MissingContext).into_http());
            };

            let descriptor = match MethodDescriptor::for_path(path) {
                Ok(descriptor) => descriptor,
                Err(status) => return Ok(status.into_http()),
            };

            let mut grpc = tonic::server::Grpc::new(descriptor.request_codec())
                .max_decoding_message_size(max_message_size)
                .max_encoding_message_size(max_message_size);

            let call = ForwardCall::new(descriptor, context.into_decision(), max_message_size);
            Ok(grpc.streaming(call, req).await)
        })
    }
}
