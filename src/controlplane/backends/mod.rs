//! File Storage Backend Adapters
//!
//! Provides adapters for the file storage service:
//! - InMemory: simulated service for tests and standalone runs
//! - Http: the service's JSON REST API

pub mod http;
pub mod memory;

pub use http::*;
pub use memory::*;

use crate::domain::ports::FileStorageBackend;
use crate::error::{Error, Result};
use std::sync::Arc;

/// Factory for creating file storage backend adapters
pub struct BackendFactory;

impl BackendFactory {
    /// Create a backend adapter by name
    pub fn create(name: &str, config: BackendConfig) -> Result<Arc<dyn FileStorageBackend>> {
        match name.to_lowercase().as_str() {
            "memory" | "simulated" => Ok(Arc::new(InMemoryBackend::new(config.memory))),
            "http" | "fss" => Ok(Arc::new(HttpBackend::new(config.http)?)),
            _ => Err(Error::Configuration(format!("unknown backend: {}", name))),
        }
    }
}

/// Combined backend configuration
#[derive(Debug, Clone, Default)]
pub struct BackendConfig {
    pub memory: InMemoryBackendConfig,
    pub http: HttpBackendConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory() {
        let backend = BackendFactory::create("memory", BackendConfig::default()).unwrap();
        assert_eq!(backend.backend_name(), "memory");

        assert!(matches!(
            BackendFactory::create("ceph", BackendConfig::default()),
            Err(Error::Configuration(_))
        ));
    }
}
