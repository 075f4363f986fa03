//! Provision State Store
//!
//! Implementations of the [`ProvisionStore`] port:
//! - [`MemoryStore`]: DashMap-backed store for tests and standalone runs
//! - [`FileStore`]: one JSON document per claim, replaced atomically, so
//!   in-flight provisioning survives a process restart

mod file;
mod memory;

pub use file::{FileStore, FileStoreConfig};
pub use memory::MemoryStore;

use crate::domain::ports::ProvisionStore;
use crate::error::{Error, Result};
use std::path::PathBuf;
use std::sync::Arc;

/// Which store implementation to use
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// Records live only as long as the process
    InMemory,
    /// Records are persisted under a directory
    FileSystem { root_path: PathBuf },
}

/// Factory for creating provision stores
pub struct StoreFactory;

impl StoreFactory {
    /// Open a store for the given backend
    pub async fn open(backend: &StoreBackend) -> Result<Arc<dyn ProvisionStore>> {
        match backend {
            StoreBackend::InMemory => Ok(Arc::new(MemoryStore::new())),
            StoreBackend::FileSystem { root_path } => {
                let store = FileStore::open(FileStoreConfig {
                    root_path: root_path.clone(),
                    ..Default::default()
                })
                .await?;
                Ok(Arc::new(store))
            }
        }
    }

    /// Parse a store backend from a name and optional path
    pub fn backend(name: &str, path: Option<PathBuf>) -> Result<StoreBackend> {
        match (name.to_lowercase().as_str(), path) {
            ("memory", _) => Ok(StoreBackend::InMemory),
            ("file", Some(root_path)) => Ok(StoreBackend::FileSystem { root_path }),
            ("file", None) => Err(Error::Configuration(
                "file store requires a state directory".into(),
            )),
            (other, _) => Err(Error::Configuration(format!(
                "unknown store backend: {}",
                other
            ))),
        }
    }
}
