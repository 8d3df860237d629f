//! Backend registry: long-lived connections keyed by name
//!
//! Populated once at startup through [`RegistryBuilder`], then frozen. Every call
//! shares the same channels, so lookups never lock and never connect.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};

use crate::error::RegistryError;

/// A named backend and its shared, multiplexed connection
/// Cheap to clone (all fields are Arc internally)
#[derive(Clone, Debug)]
pub struct Backend {
    name: Arc<str>,
    address: Arc<str>,
    channel: Channel,
}

impl Backend {
    pub fn new(name: impl Into<Arc<str>>, address: impl Into<Arc<str>>, channel: Channel) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            channel,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Handle to the shared HTTP/2 connection
    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }
}

/// Read-only set of backends, in registration order
#[derive(Debug)]
pub struct Registry {
    backends: Vec<Backend>,
    index: HashMap<Arc<str>, usize>,
    default_index: Option<usize>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Exact, case-sensitive lookup by name
    pub fn lookup(&self, name: &str) -> Option<&Backend> {
        self.index.get(name).map(|&i| &self.backends[i])
    }

    /// Backend used when a call names no registered backend
    ///
    /// The explicitly configured default if one was given, otherwise the first
    /// backend registered. `None` only when the registry is empty.
    pub fn default_backend(&self) -> Option<&Backend> {
        self.default_index.map(|i| &self.backends[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Backend> {
        self.backends.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.backends.iter().map(Backend::name)
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

/// Collects backends during startup
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    backends: Vec<Backend>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect to `address` and register it under `name`
    ///
    /// Connection failures are returned as-is; nothing is retried here.
    pub async fn register(&mut self, name: &str, address: &str) -> Result<(), RegistryError> {
        self.check_name(name)?;

        let endpoint = endpoint(name, address)?;
        let channel = endpoint
            .connect()
            .await
            .map_err(|source| RegistryError::Connect {
                name: name.to_string(),
                address: address.to_string(),
                source,
            })?;

        tracing::info!(backend = name, address, "Registered backend");

        self.backends.push(Backend::new(name, address, channel));
        Ok(())
    }

    /// Register an already established channel
    pub fn register_channel(
        &mut self,
        name: &str,
        address: &str,
        channel: Channel,
    ) -> Result<(), RegistryError> {
        self.check_name(name)?;
        self.backends.push(Backend::new(name, address, channel));
        Ok(())
    }

    /// Freeze the registry
    ///
    /// `default` names the fallback backend; when `None` the first registered
    /// backend is used.
    pub fn build(self, default: Option<&str>) -> Result<Registry, RegistryError> {
        let index: HashMap<Arc<str>, usize> = self
            .backends
            .iter()
            .enumerate()
            .map(|(i, backend)| (backend.name.clone(), i))
            .collect();

        let default_index = match default {
            Some(name) => Some(
                *index
                    .get(name)
                    .ok_or_else(|| RegistryError::UnknownDefault(name.to_string()))?,
            ),
            None if self.backends.is_empty() => None,
            None => Some(0),
        };

        if let Some(i) = default_index {
            tracing::info!(
                backend = %self.backends[i].name,
                backends = self.backends.len(),
                "Backend registry ready"
            );
        } else {
            tracing::warn!("Backend registry is empty, every call will be rejected");
        }

        Ok(Registry {
            backends: self.backends,
            index,
            default_index,
        })
    }

    fn check_name(&self, name: &str) -> Result<(), RegistryError> {
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.backends.iter().any(|b| b.name() == name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        Ok(())
    }
}

/// Build a plaintext endpoint with keepalive tuning for long-lived backend channels
pub fn endpoint(name: &str, address: &str) -> Result<Endpoint, RegistryError> {
    let uri = if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    };

    let endpoint = Endpoint::from_shared(uri)
        .map_err(|e| RegistryError::InvalidAddress {
            name: name.to_string(),
            reason: e.to_string(),
        })?
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .http2_keep_alive_interval(Duration::from_secs(30))
        .keep_alive_timeout(Duration::from_secs(10))
        .connect_timeout(Duration::from_secs(5));

    Ok(endpoint)
}
