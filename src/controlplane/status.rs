//! In-process claim status sink
//!
//! Keeps published volumes and claim statuses in memory. Used when the
//! provisioner runs without a cluster and by the reconciler tests.

use crate::domain::ports::{ClaimId, ClaimStatus, ClaimStatusSink, Volume};
use crate::error::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Status sink that records everything it is told
#[derive(Default)]
pub struct MemoryStatusSink {
    volumes: DashMap<String, Volume>,
    statuses: DashMap<ClaimId, ClaimStatus>,
    /// Every status update in arrival order
    history: Mutex<Vec<(ClaimId, ClaimStatus)>>,
    fail_publish: AtomicBool,
}

impl MemoryStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `publish_volume` fail with a retryable error
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn volume(&self, name: &str) -> Option<Volume> {
        self.volumes.get(name).map(|v| v.value().clone())
    }

    /// Published volumes for a claim
    pub fn volumes_for(&self, claim: &ClaimId) -> Vec<Volume> {
        self.volumes
            .iter()
            .filter(|v| &v.value().claim == claim)
            .map(|v| v.value().clone())
            .collect()
    }

    pub fn volume_count(&self) -> usize {
        self.volumes.len()
    }

    pub fn status(&self, claim: &ClaimId) -> Option<ClaimStatus> {
        self.statuses.get(claim).map(|s| s.value().clone())
    }

    /// Status updates received for a claim, oldest first
    pub fn history(&self, claim: &ClaimId) -> Vec<ClaimStatus> {
        self.history
            .lock()
            .iter()
            .filter(|(c, _)| c == claim)
            .map(|(_, s)| s.clone())
            .collect()
    }
}

#[async_trait]
impl ClaimStatusSink for MemoryStatusSink {
    async fn publish_volume(&self, volume: &Volume) -> Result<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(Error::unavailable("status-sink", "publish disabled"));
        }
        info!(volume = %volume.name, claim = %volume.claim, "Published volume");
        self.volumes.insert(volume.name.clone(), volume.clone());
        Ok(())
    }

    async fn retract_volume(&self, claim: &ClaimId, volume_name: &str) -> Result<()> {
        if self.volumes.remove(volume_name).is_some() {
            info!(volume = volume_name, claim = %claim, "Retracted volume");
        }
        Ok(())
    }

    async fn update_status(&self, claim: &ClaimId, status: &ClaimStatus) -> Result<()> {
        self.statuses.insert(claim.clone(), status.clone());
        self.history.lock().push((claim.clone(), status.clone()));
        Ok(())
    }
}
