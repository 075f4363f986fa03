//! In-memory File Storage Backend
//!
//! Simulates the file storage service: mount targets, exports, idempotency
//! tokens and availability domains are tracked in process. Faults and
//! latency can be injected per operation for testing.

use crate::domain::ports::{CreateExportRequest, Export, FileStorageBackend, MountTarget};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

const BACKEND_NAME: &str = "memory";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the in-memory backend
#[derive(Debug, Clone)]
pub struct InMemoryBackendConfig {
    /// Region embedded in generated identifiers
    pub region: String,
    /// Availability domains reported by the backend
    pub availability_domains: Vec<String>,
}

impl Default for InMemoryBackendConfig {
    fn default() -> Self {
        Self {
            region: "phx".to_string(),
            availability_domains: vec![
                "Uocm:PHX-AD-1".to_string(),
                "Uocm:PHX-AD-2".to_string(),
                "Uocm:PHX-AD-3".to_string(),
            ],
        }
    }
}

// =============================================================================
// Fault Injection
// =============================================================================

/// Backend operations that faults can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOperation {
    ListAvailabilityDomains,
    CreateMountTarget,
    GetMountTarget,
    CreateExport,
    DeleteExport,
    DeleteFileSystem,
    DeleteMountTarget,
}

#[derive(Debug, Default)]
struct Faults {
    /// Remaining injected failures per operation (`u32::MAX` = forever)
    failures: HashMap<BackendOperation, u32>,
    /// Artificial latency per operation
    latency: HashMap<BackendOperation, Duration>,
    /// Calls made per operation
    calls: HashMap<BackendOperation, u32>,
}

// =============================================================================
// Backend State
// =============================================================================

#[derive(Debug, Default)]
struct State {
    mount_targets: BTreeMap<String, MountTarget>,
    exports: BTreeMap<String, Export>,
    file_systems: BTreeSet<String>,
    /// Idempotency token -> resource id
    tokens: HashMap<String, String>,
}

// =============================================================================
// In-memory Backend
// =============================================================================

/// Simulated file storage service
pub struct InMemoryBackend {
    config: InMemoryBackendConfig,
    state: RwLock<State>,
    faults: Mutex<Faults>,
    next_id: AtomicU64,
}

impl InMemoryBackend {
    /// Create a new in-memory backend
    pub fn new(config: InMemoryBackendConfig) -> Self {
        Self {
            config,
            state: RwLock::new(State::default()),
            faults: Mutex::new(Faults::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Fail the next `count` calls of `operation` with `BackendUnavailable`
    pub fn fail_next(&self, operation: BackendOperation, count: u32) {
        self.faults.lock().failures.insert(operation, count);
    }

    /// Fail every call of `operation` until cleared
    pub fn fail_always(&self, operation: BackendOperation) {
        self.fail_next(operation, u32::MAX);
    }

    /// Clear injected failures for `operation`
    pub fn clear_failures(&self, operation: BackendOperation) {
        self.faults.lock().failures.remove(&operation);
    }

    /// Delay every call of `operation`
    pub fn set_latency(&self, operation: BackendOperation, latency: Duration) {
        self.faults.lock().latency.insert(operation, latency);
    }

    /// Number of calls made to `operation`, including failed ones
    pub fn calls(&self, operation: BackendOperation) -> u32 {
        self.faults.lock().calls.get(&operation).copied().unwrap_or(0)
    }

    /// Register a pre-existing mount target, as an administrator would
    pub async fn insert_mount_target(&self, mount_target: MountTarget) {
        self.state
            .write()
            .await
            .mount_targets
            .insert(mount_target.id.clone(), mount_target);
    }

    pub async fn mount_target_ids(&self) -> Vec<String> {
        self.state.read().await.mount_targets.keys().cloned().collect()
    }

    pub async fn export_ids(&self) -> Vec<String> {
        self.state.read().await.exports.keys().cloned().collect()
    }

    pub async fn file_system_ids(&self) -> Vec<String> {
        self.state.read().await.file_systems.iter().cloned().collect()
    }

    /// Record the call, apply latency, and consume an injected failure
    async fn enter(&self, operation: BackendOperation) -> Result<()> {
        let (latency, fail) = {
            let mut faults = self.faults.lock();
            *faults.calls.entry(operation).or_insert(0) += 1;

            let latency = faults.latency.get(&operation).copied();
            let fail = match faults.failures.get_mut(&operation) {
                Some(remaining) if *remaining > 0 => {
                    if *remaining != u32::MAX {
                        *remaining -= 1;
                    }
                    true
                }
                _ => false,
            };
            (latency, fail)
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if fail {
            debug!(?operation, "Injected backend failure");
            return Err(Error::unavailable(BACKEND_NAME, format!("{:?} failed", operation)));
        }
        Ok(())
    }

    fn generate_id(&self, kind: &str) -> String {
        let seq = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("ocid1.{}.oc1.{}.{:016x}", kind, self.config.region, seq)
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new(InMemoryBackendConfig::default())
    }
}

#[async_trait]
impl FileStorageBackend for InMemoryBackend {
    fn backend_name(&self) -> &str {
        BACKEND_NAME
    }

    async fn list_availability_domains(&self) -> Result<Vec<String>> {
        self.enter(BackendOperation::ListAvailabilityDomains).await?;
        Ok(self.config.availability_domains.clone())
    }

    async fn create_mount_target(
        &self,
        availability_domain: &str,
        subnet_id: &str,
        token: &str,
    ) -> Result<MountTarget> {
        self.enter(BackendOperation::CreateMountTarget).await?;

        if !self
            .config
            .availability_domains
            .iter()
            .any(|ad| ad == availability_domain)
        {
            return Err(Error::not_found("AvailabilityDomain", availability_domain));
        }

        let mut state = self.state.write().await;
        if let Some(existing) = state
            .tokens
            .get(token)
            .and_then(|id| state.mount_targets.get(id))
        {
            debug!(id = %existing.id, "Replayed mount target creation");
            return Ok(existing.clone());
        }

        let seq = self.next_id.load(Ordering::Relaxed);
        let mount_target = MountTarget {
            id: self.generate_id("mounttarget"),
            availability_domain: availability_domain.to_string(),
            subnet_id: subnet_id.to_string(),
            endpoint: format!("10.0.{}.{}", (seq >> 8) & 0xff, seq & 0xff),
        };

        info!(
            id = %mount_target.id,
            availability_domain,
            subnet_id,
            "Created mount target"
        );

        state
            .tokens
            .insert(token.to_string(), mount_target.id.clone());
        state
            .mount_targets
            .insert(mount_target.id.clone(), mount_target.clone());
        Ok(mount_target)
    }

    async fn get_mount_target(&self, id: &str) -> Result<MountTarget> {
        self.enter(BackendOperation::GetMountTarget).await?;
        self.state
            .read()
            .await
            .mount_targets
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("MountTarget", id))
    }

    async fn create_export(
        &self,
        mount_target_id: &str,
        request: &CreateExportRequest,
        token: &str,
    ) -> Result<Export> {
        self.enter(BackendOperation::CreateExport).await?;

        let mut state = self.state.write().await;
        if let Some(existing) = state.tokens.get(token).and_then(|id| state.exports.get(id)) {
            debug!(id = %existing.id, "Replayed export creation");
            return Ok(existing.clone());
        }

        if !state.mount_targets.contains_key(mount_target_id) {
            return Err(Error::not_found("MountTarget", mount_target_id));
        }

        let path = format!("/{}", request.display_name);
        if state
            .exports
            .values()
            .any(|e| e.mount_target_id == mount_target_id && e.path == path)
        {
            return Err(Error::conflict("Export", path, "path already exported"));
        }

        let export = Export {
            id: self.generate_id("export"),
            file_system_id: self.generate_id("filesystem"),
            mount_target_id: mount_target_id.to_string(),
            path,
        };

        info!(
            id = %export.id,
            mount_target_id,
            path = %export.path,
            "Created export"
        );

        state.tokens.insert(token.to_string(), export.id.clone());
        state.file_systems.insert(export.file_system_id.clone());
        state.exports.insert(export.id.clone(), export.clone());
        Ok(export)
    }

    async fn delete_export(&self, id: &str) -> Result<()> {
        self.enter(BackendOperation::DeleteExport).await?;

        let mut state = self.state.write().await;
        match state.exports.remove(id) {
            Some(_) => {
                state.tokens.retain(|_, v| v.as_str() != id);
                info!(id, "Deleted export");
                Ok(())
            }
            None => Err(Error::not_found("Export", id)),
        }
    }

    async fn delete_file_system(&self, id: &str) -> Result<()> {
        self.enter(BackendOperation::DeleteFileSystem).await?;

        let mut state = self.state.write().await;
        if !state.file_systems.contains(id) {
            return Err(Error::not_found("FileSystem", id));
        }
        if state.exports.values().any(|e| e.file_system_id == id) {
            return Err(Error::conflict("FileSystem", id, "file system is still exported"));
        }

        state.file_systems.remove(id);
        info!(id, "Deleted file system");
        Ok(())
    }

    async fn delete_mount_target(&self, id: &str) -> Result<()> {
        self.enter(BackendOperation::DeleteMountTarget).await?;

        let mut state = self.state.write().await;
        if !state.mount_targets.contains_key(id) {
            return Err(Error::not_found("MountTarget", id));
        }
        if state.exports.values().any(|e| e.mount_target_id == id) {
            return Err(Error::conflict("MountTarget", id, "mount target still has exports"));
        }

        state.mount_targets.remove(id);
        state.tokens.retain(|_, v| v.as_str() != id);
        info!(id, "Deleted mount target");
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn export_request(name: &str) -> CreateExportRequest {
        CreateExportRequest {
            display_name: name.into(),
            availability_domain: "Uocm:PHX-AD-1".into(),
            capacity_bytes: 1 << 30,
            tags: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_create_and_delete() {
        let backend = InMemoryBackend::default();

        let mt = backend
            .create_mount_target("Uocm:PHX-AD-1", "subnet-1", "t-mt")
            .await
            .unwrap();
        assert!(mt.id.starts_with("ocid1.mounttarget.oc1.phx."));

        let export = backend
            .create_export(&mt.id, &export_request("data"), "t-ex")
            .await
            .unwrap();
        assert_eq!(export.path, "/data");
        assert_eq!(backend.get_mount_target(&mt.id).await.unwrap(), mt);

        assert_matches!(
            backend.delete_mount_target(&mt.id).await,
            Err(Error::Conflict { .. })
        );

        assert_matches!(
            backend.delete_file_system(&export.file_system_id).await,
            Err(Error::Conflict { .. })
        );

        backend.delete_export(&export.id).await.unwrap();
        assert_eq!(backend.file_system_ids().await, vec![export.file_system_id.clone()]);
        backend.delete_file_system(&export.file_system_id).await.unwrap();
        backend.delete_mount_target(&mt.id).await.unwrap();
        assert!(backend.mount_target_ids().await.is_empty());
        assert!(backend.file_system_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_double_delete_reports_not_found() {
        let backend = InMemoryBackend::default();
        let mt = backend
            .create_mount_target("Uocm:PHX-AD-1", "subnet-1", "t")
            .await
            .unwrap();

        backend.delete_mount_target(&mt.id).await.unwrap();
        let err = backend.delete_mount_target(&mt.id).await.unwrap_err();
        assert!(err.is_not_found());

        let err = backend.delete_export("ocid1.export.oc1.phx.missing").await.unwrap_err();
        assert!(err.is_not_found());
        let err = backend
            .delete_file_system("ocid1.filesystem.oc1.phx.missing")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_tokens_make_creates_idempotent() {
        let backend = InMemoryBackend::default();

        let first = backend
            .create_mount_target("Uocm:PHX-AD-2", "subnet-1", "claim/mt")
            .await
            .unwrap();
        let replay = backend
            .create_mount_target("Uocm:PHX-AD-2", "subnet-1", "claim/mt")
            .await
            .unwrap();
        assert_eq!(first, replay);
        assert_eq!(backend.mount_target_ids().await.len(), 1);

        let export = backend
            .create_export(&first.id, &export_request("x"), "claim/ex")
            .await
            .unwrap();
        let replay = backend
            .create_export(&first.id, &export_request("x"), "claim/ex")
            .await
            .unwrap();
        assert_eq!(export, replay);
        assert_eq!(backend.export_ids().await.len(), 1);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let backend = InMemoryBackend::default();
        backend.fail_next(BackendOperation::CreateMountTarget, 2);

        for _ in 0..2 {
            assert_matches!(
                backend.create_mount_target("Uocm:PHX-AD-1", "s", "t").await,
                Err(Error::BackendUnavailable { .. })
            );
        }
        assert!(backend
            .create_mount_target("Uocm:PHX-AD-1", "s", "t")
            .await
            .is_ok());
        assert_eq!(backend.calls(BackendOperation::CreateMountTarget), 3);
    }

    #[tokio::test]
    async fn test_unknown_availability_domain() {
        let backend = InMemoryBackend::default();
        assert_matches!(
            backend.create_mount_target("Uocm:IAD-AD-1", "s", "t").await,
            Err(Error::NotFound { .. })
        );
    }
}
