//! Configuration structures and loading logic

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use tonic::metadata::{Ascii, MetadataKey};

/// Main gateway configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub grpc_port: u16,
    pub api_port: u16,
    pub routing_header: String,

    /// Backend used when the routing header is absent or unknown
    /// If None, the first backend listed is used
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_backend: Option<String>,

    pub max_message_size_mb: usize,

    /// Registration order matters: the first entry is the implicit default
    pub backends: Vec<BackendConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            grpc_port: default_grpc_port(),
            api_port: default_api_port(),
            routing_header: default_routing_header(),
            default_backend: None,
            max_message_size_mb: default_max_message_size_mb(),
            backends: Vec::new(),
            tls: None,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content).context("Failed to parse TOML config")?
        } else {
            Self::default()
        };

        // Environment variable overrides
        if let Ok(port) = std::env::var("GRPC_GATEWAY_PORT") {
            config.grpc_port = port.parse().context("Invalid GRPC_GATEWAY_PORT value")?;
        }
        if let Ok(port) = std::env::var("GRPC_GATEWAY_API_PORT") {
            config.api_port = port
                .parse()
                .context("Invalid GRPC_GATEWAY_API_PORT value")?;
        }
        if let Ok(header) = std::env::var("GRPC_GATEWAY_ROUTING_HEADER") {
            config.routing_header = header;
        }
        if let Ok(name) = std::env::var("GRPC_GATEWAY_DEFAULT_BACKEND") {
            config.default_backend = Some(name);
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        // Port range validation
        if self.grpc_port < 1024 {
            anyhow::bail!("gRPC port must be >= 1024 (got {})", self.grpc_port);
        }
        if self.api_port < 1024 {
            anyhow::bail!("API port must be >= 1024 (got {})", self.api_port);
        }
        if self.grpc_port == self.api_port {
            anyhow::bail!(
                "gRPC port {} conflicts with API port",
                self.grpc_port
            );
        }

        if self.max_message_size_mb == 0 {
            anyhow::bail!("max_message_size_mb must be at least 1");
        }

        let header = self.routing_header.to_ascii_lowercase();
        if MetadataKey::<Ascii>::from_bytes(header.as_bytes()).is_err() {
            anyhow::bail!("Invalid routing header name '{}'", self.routing_header);
        }

        let mut names = HashSet::new();
        for backend in &self.backends {
            // Name validation
            if backend.name.is_empty() {
                anyhow::bail!("Backend name cannot be empty");
            }
            if !names.insert(backend.name.as_str()) {
                anyhow::bail!("Duplicate backend name: {}", backend.name);
            }

            // Address validation
            crate::registry::endpoint(&backend.name, &backend.address)
                .with_context(|| format!("Backend '{}' has an invalid address", backend.name))?;
        }

        if let Some(default) = &self.default_backend
            && !names.contains(default.as_str())
        {
            anyhow::bail!("Default backend '{}' is not in the backend list", default);
        }

        if let Some(tls) = &self.tls {
            for path in [Some(&tls.cert_path), Some(&tls.key_path), tls.ca_path.as_ref()]
                .into_iter()
                .flatten()
            {
                if !path.exists() {
                    anyhow::bail!("TLS file not found: {:?}", path);
                }
            }
        }

        Ok(())
    }
}

/// A backend reachable by name
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BackendConfig {
    pub name: String,

    /// host:port, or a full http:// URI
    pub address: String,
}

/// PEM files for TLS termination on the gRPC listener
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,

    /// Client CA for mTLS
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_path: Option<PathBuf>,
}

// Default functions
fn default_grpc_port() -> u16 {
    9000
}
fn default_api_port() -> u16 {
    9001
}
fn default_routing_header() -> String {
    crate::grpc::DEFAULT_ROUTING_HEADER.to_string()
}
fn default_max_message_size_mb() -> usize {
    16
}
