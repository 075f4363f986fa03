//! FSS Provisioner
//!
//! Dynamic volume provisioner backing Kubernetes claims with File Storage
//! Service exports.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │   Claim Watcher (kube)            Status API (axum)                  │
//! │            │                              │                          │
//! │            └──────────────┬───────────────┘                          │
//! │                           ▼                                          │
//! │  ┌──────────────┐   ┌─────────────────────────┐   ┌───────────────┐  │
//! │  │  Admission   │◄──│ Reconciler              │──►│ Status Sink   │  │
//! │  └──────────────┘   │ (keyed work queue,      │   │ (PV + claim   │  │
//! │                     │  worker pool, retries)  │   │  annotations) │  │
//! │                     └──────┬──────────┬───────┘   └───────────────┘  │
//! │                            ▼          ▼                              │
//! │              ┌─────────────────┐  ┌──────────────────────┐           │
//! │              │ Backend Client  │  │ Provision State Store│           │
//! │              │ (memory / HTTP) │  │ (memory / file)      │           │
//! │              └─────────────────┘  └──────────────────────┘           │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`admission`]: Storage class parameter parsing and claim validation
//! - [`controlplane`]: Reconciler, backends, Kubernetes adapter and APIs
//! - [`store`]: Persistent provisioning state
//! - [`domain`]: Core domain types and ports
//! - [`config`]: Provisioner configuration
//! - [`metrics`]: Prometheus metrics
//! - [`error`]: Error types and handling

pub mod admission;
pub mod config;
pub mod controlplane;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod store;

// Re-export commonly used types
pub use admission::Admission;

pub use config::ProvisionerConfig;

pub use controlplane::{
    ApiServer, ApiServerConfig, BackendConfig, BackendFactory, ClaimEvent, ProvisionEvent,
    Reconciler, ReconcilerConfig, RetryConfig,
};

pub use domain::ports::{
    AccessMode, ClaimId, ClaimStatus, ClaimStatusSink, FileStorageBackend, ProvisionPhase,
    ProvisionRecord, ProvisionStore, StorageClassParameters, Volume, VolumeClaimRequest,
};

pub use error::{Error, ErrorAction, Result};

pub use metrics::ProvisionerMetrics;

pub use store::{StoreBackend, StoreFactory};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
