//! Provisioner configuration
//!
//! Every field has a default, so a YAML file only needs the settings it
//! changes. Command-line flags override the file.

use crate::controlplane::backends::{BackendConfig, HttpBackendConfig, InMemoryBackendConfig};
use crate::controlplane::kube::DEFAULT_PROVISIONER_NAME;
use crate::controlplane::reconciler::ReconcilerConfig;
use crate::controlplane::retry::millis;
use crate::domain::tags::Tags;
use crate::error::Result;
use crate::store::{StoreBackend, StoreFactory};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level provisioner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProvisionerConfig {
    /// Provisioner name storage classes refer to
    pub provisioner_name: String,
    /// Region label for published volumes
    pub region: Option<String>,
    pub backend: BackendSettings,
    pub store: StoreSettings,
    pub reconciler: ReconcilerConfig,
    /// Status API bind address
    pub api_addr: SocketAddr,
    /// Metrics bind address
    pub metrics_addr: SocketAddr,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            provisioner_name: DEFAULT_PROVISIONER_NAME.to_string(),
            region: None,
            backend: BackendSettings::default(),
            store: StoreSettings::default(),
            reconciler: ReconcilerConfig::default(),
            api_addr: SocketAddr::from(([0, 0, 0, 0], 8090)),
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

impl ProvisionerConfig {
    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Replace the default export tags with a `key=value,ns.key=value` list
    pub fn set_default_tags(&mut self, raw: &str) -> Result<()> {
        self.reconciler.default_tags = Tags::parse(raw)?;
        Ok(())
    }

    /// Store backend selected by the store settings
    pub fn store_backend(&self) -> Result<StoreBackend> {
        StoreFactory::backend(&self.store.kind, self.store.path.clone())
    }
}

/// File storage backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackendSettings {
    /// Backend implementation (`memory` or `http`)
    pub kind: String,
    /// Base URL of the file storage API
    pub endpoint: String,
    pub compartment_id: String,
    pub auth_token: Option<String>,
    #[serde(with = "millis")]
    pub request_timeout: Duration,
    /// Availability domains simulated by the memory backend
    pub availability_domains: Vec<String>,
}

impl Default for BackendSettings {
    fn default() -> Self {
        let http = HttpBackendConfig::default();
        Self {
            kind: "memory".to_string(),
            endpoint: http.endpoint,
            compartment_id: http.compartment_id,
            auth_token: http.auth_token,
            request_timeout: http.request_timeout,
            availability_domains: InMemoryBackendConfig::default().availability_domains,
        }
    }
}

impl BackendSettings {
    pub fn backend_config(&self, region: Option<&str>) -> BackendConfig {
        let mut memory = InMemoryBackendConfig {
            availability_domains: self.availability_domains.clone(),
            ..Default::default()
        };
        if let Some(region) = region {
            memory.region = region.to_string();
        }

        BackendConfig {
            memory,
            http: HttpBackendConfig {
                endpoint: self.endpoint.clone(),
                compartment_id: self.compartment_id.clone(),
                auth_token: self.auth_token.clone(),
                request_timeout: self.request_timeout,
            },
        }
    }
}

/// Provision state store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Store implementation (`memory` or `file`)
    pub kind: String,
    /// State directory of the file store
    pub path: Option<PathBuf>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            kind: "file".to_string(),
            path: Some(PathBuf::from("/var/lib/fss-provisioner")),
        }
    }
}
