//! Per-call backend selection from request metadata

use std::sync::Arc;
use tonic::metadata::{Ascii, MetadataKey, MetadataMap};
use tonic::service::Interceptor;
use tonic::{Request, Status};

use super::context::{CallContext, RoutingDecision};
use crate::error::RoutingError;
use crate::registry::Registry;

/// Header consulted when no other name is configured
pub const DEFAULT_ROUTING_HEADER: &str = "x-backend-target";

/// Picks a backend for a call
///
/// Policy, in order: a header value naming a registered backend wins; anything
/// else (absent, non-ASCII, unknown name) falls back to the registry default.
/// Names are matched exactly, without case folding.
#[derive(Clone, Debug)]
pub struct RoutingResolver {
    registry: Arc<Registry>,
    header: String,
}

impl RoutingResolver {
    pub fn new(registry: Arc<Registry>, header: &str) -> Result<Self, RoutingError> {
        let header = header.to_ascii_lowercase();
        MetadataKey::<Ascii>::from_bytes(header.as_bytes())
            .map_err(|_| RoutingError::InvalidHeader(header.clone()))?;

        Ok(Self { registry, header })
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Resolve the backend for a call from its request metadata
    pub fn resolve(&self, metadata: &MetadataMap) -> Result<RoutingDecision, RoutingError> {
        let requested = metadata
            .get(self.header.as_str())
            .and_then(|value| value.to_str().ok());

        if let Some(name) = requested
            && let Some(backend) = self.registry.lookup(name)
        {
            return Ok(RoutingDecision::new(backend.clone(), false));
        }

        let backend = self
            .registry
            .default_backend()
            .ok_or(RoutingError::NoBackends)?;

        if let Some(name) = requested {
            tracing::debug!(
                requested = name,
                backend = backend.name(),
                "Unknown routing target, using default backend"
            );
        }

        Ok(RoutingDecision::new(backend.clone(), true))
    }
}

/// Runs the resolver before dispatch and attaches the decision to the call
#[derive(Clone, Debug)]
pub struct RoutingInterceptor {
    resolver: RoutingResolver,
}

impl RoutingInterceptor {
    pub fn new(resolver: RoutingResolver) -> Self {
        Self { resolver }
    }
}

impl Interceptor for RoutingInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        let decision = self.resolver.resolve(request.metadata()).map_err(|e| {
            crate::metrics::record_routing_failure();
            tracing::error!(error = %e, "Rejecting call, no route");
            Status::from(e)
        })?;

        tracing::debug!(
            backend = decision.backend().name(),
            used_default = decision.used_default(),
            "Routed call"
        );

        request
            .extensions_mut()
            .insert(CallContext::new(decision));
        Ok(request)
    }
}
