//! Per-call routing decision and the carrier that hands it to the dispatcher

use tonic::codegen::http::Extensions;

use crate::registry::Backend;

/// Backend chosen for one call, fixed before any message is exchanged
#[derive(Clone, Debug)]
pub struct RoutingDecision {
    backend: Backend,
    used_default: bool,
}

impl RoutingDecision {
    pub fn new(backend: Backend, used_default: bool) -> Self {
        Self {
            backend,
            used_default,
        }
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// True when the routing header was absent or named no registered backend
    pub fn used_default(&self) -> bool {
        self.used_default
    }
}

/// Carries a [`RoutingDecision`] from the routing interceptor to the dispatcher
///
/// Created once per call and placed in that call's request extensions. The
/// dispatcher removes it with [`CallContext::take`], so a decision can neither
/// be read twice nor leak into another call. There are no setters.
#[derive(Clone, Debug)]
pub struct CallContext {
    decision: RoutingDecision,
}

impl CallContext {
    pub fn new(decision: RoutingDecision) -> Self {
        Self { decision }
    }

    /// Remove the carrier from a request's extensions
    pub fn take(extensions: &mut Extensions) -> Option<Self> {
        extensions.remove::<Self>()
    }

    pub fn decision(&self) -> &RoutingDecision {
        &self.decision
    }

    pub fn into_decision(self) -> RoutingDecision {
        self.decision
    }
}
