//! API response models

use crate::registry::Backend;
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub backends: usize,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// One registered backend
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct BackendInfo {
    pub name: String,
    pub address: String,
    pub default: bool,
}

impl BackendInfo {
    pub fn from_backend(backend: &Backend, default: bool) -> Self {
        Self {
            name: backend.name().to_string(),
            address: backend.address().to_string(),
            default,
        }
    }
}

/// Backend table with the routing header that selects among them
#[derive(Debug, Serialize, Deserialize)]
pub struct BackendsResponse {
    pub routing_header: String,
    pub backends: Vec<BackendInfo>,
}
