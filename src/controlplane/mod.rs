//! Provisioning Control Plane
//!
//! Drives claims through their provisioning lifecycle against the file
//! storage service and publishes the results.

pub mod api;
pub mod backends;
pub mod kube;
pub mod queue;
pub mod reconciler;
pub mod retry;
pub mod status;

pub use api::*;
pub use backends::*;
pub use queue::KeyedWorkQueue;
pub use reconciler::{ClaimEvent, ProvisionEvent, Reconciler, ReconcilerConfig};
pub use retry::RetryConfig;
pub use status::MemoryStatusSink;
