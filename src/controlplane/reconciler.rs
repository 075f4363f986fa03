//! Claim Reconciler
//!
//! Drives each claim through `Pending → Creating → Bound → Releasing →
//! Released`, or into `Failed`. Events are serialized per claim by the keyed
//! work queue, and every completed backend step is persisted before the next
//! one starts, so a restarted provisioner resumes exactly where it stopped.

use crate::admission::Admission;
use crate::controlplane::queue::KeyedWorkQueue;
use crate::controlplane::retry::{millis, RetryConfig};
use crate::domain::ports::{
    ClaimId, ClaimStatus, ClaimStatusSinkRef, CreateExportRequest, FileStorageBackendRef,
    MountTargetOwnership, ProvisionPhase, ProvisionRecord, ProvisionStoreRef,
    StorageClassParameters, Volume, VolumeClaimRequest,
};
use crate::domain::tags::Tags;
use crate::error::{Error, ErrorAction, Result};
use crate::metrics::ProvisionerMetrics;
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const MOUNT_TARGET_STEP: &str = "mount-target";
const EXPORT_STEP: &str = "export";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the reconciler
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconcilerConfig {
    /// Number of worker tasks
    pub workers: usize,
    /// Retry budget and backoff per phase
    pub retry: RetryConfig,
    /// Deadline for a single backend call
    #[serde(with = "millis")]
    pub backend_timeout: Duration,
    /// Subnet for mount targets of automatically provisioned claims
    pub default_subnet_id: Option<String>,
    /// Prefix of export display names
    pub export_name_prefix: String,
    /// Tags applied to every export
    pub default_tags: Tags,
    /// Buffered phase events per subscriber
    pub event_capacity: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            retry: RetryConfig::default(),
            backend_timeout: Duration::from_secs(30),
            default_subnet_id: None,
            export_name_prefix: "fss-".to_string(),
            default_tags: Tags::default(),
            event_capacity: 256,
        }
    }
}

// =============================================================================
// Events
// =============================================================================

/// Work item for a single claim
#[derive(Debug, Clone)]
pub enum ClaimEvent {
    /// Claim observed (created or updated)
    Upsert(VolumeClaimRequest),
    /// Claim deleted
    Delete(ClaimId),
    /// Continue a creation interrupted by a restart
    ResumeCreate(ClaimId),
    /// Continue a release interrupted by a restart
    ResumeRelease(ClaimId),
}

impl ClaimEvent {
    pub fn claim(&self) -> &ClaimId {
        match self {
            ClaimEvent::Upsert(request) => &request.id,
            ClaimEvent::Delete(claim)
            | ClaimEvent::ResumeCreate(claim)
            | ClaimEvent::ResumeRelease(claim) => claim,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, ClaimEvent::Delete(_))
    }
}

/// Broadcast whenever a claim's status changes
#[derive(Debug, Clone)]
pub struct ProvisionEvent {
    pub claim: ClaimId,
    pub status: ClaimStatus,
}

// =============================================================================
// Reconciler
// =============================================================================

/// Reconciles claims against the file storage backend
pub struct Reconciler {
    config: ReconcilerConfig,
    admission: Admission,
    backend: FileStorageBackendRef,
    store: ProvisionStoreRef,
    sink: ClaimStatusSinkRef,
    queue: KeyedWorkQueue<ClaimId, ClaimEvent>,
    events: broadcast::Sender<ProvisionEvent>,
    metrics: Arc<ProvisionerMetrics>,
}

impl Reconciler {
    /// Create a new reconciler
    pub fn new(
        config: ReconcilerConfig,
        backend: FileStorageBackendRef,
        store: ProvisionStoreRef,
        sink: ClaimStatusSinkRef,
    ) -> Result<Arc<Self>> {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let metrics = Arc::new(ProvisionerMetrics::new()?);

        Ok(Arc::new(Self {
            admission: Admission::new(config.default_tags.clone()),
            config,
            backend,
            store,
            sink,
            queue: KeyedWorkQueue::new(),
            events,
            metrics,
        }))
    }

    pub fn metrics(&self) -> Arc<ProvisionerMetrics> {
        self.metrics.clone()
    }

    /// Queue an event for its claim
    pub fn submit(&self, event: ClaimEvent) {
        debug!(claim = %event.claim(), ?event, "Queued claim event");
        self.queue.push(event.claim().clone(), event);
    }

    /// Subscribe to status changes of every claim
    pub fn subscribe(&self) -> broadcast::Receiver<ProvisionEvent> {
        self.events.subscribe()
    }

    /// Number of queued events not yet picked up
    pub fn pending_events(&self) -> usize {
        self.queue.pending_events()
    }

    /// Wait until every queued event has been processed
    pub async fn wait_idle(&self) {
        self.queue.wait_idle().await
    }

    /// Current status of a claim, if it has a record
    pub async fn status(&self, claim: &ClaimId) -> Result<Option<ClaimStatus>> {
        Ok(self.store.find(claim).await?.map(|record| record.status()))
    }

    /// Provision record of a claim, if any
    pub async fn record(&self, claim: &ClaimId) -> Result<Option<ProvisionRecord>> {
        self.store.find(claim).await
    }

    /// All provision records
    pub async fn records(&self) -> Result<Vec<ProvisionRecord>> {
        self.store.list().await
    }

    /// Whether the backend answers health checks
    pub async fn backend_healthy(&self) -> bool {
        match self
            .call("health_check", self.backend.health_check())
            .await
        {
            Ok(healthy) => healthy,
            Err(e) => {
                warn!(backend = self.backend.backend_name(), error = %e, "Backend health check failed");
                false
            }
        }
    }

    /// Re-queue every record a previous run left in flight
    pub async fn recover(&self) -> Result<usize> {
        let mut resumed = 0;
        for record in self.store.list().await? {
            let event = match record.phase {
                ProvisionPhase::Pending | ProvisionPhase::Creating => {
                    ClaimEvent::ResumeCreate(record.claim.clone())
                }
                ProvisionPhase::Releasing => ClaimEvent::ResumeRelease(record.claim.clone()),
                _ => continue,
            };
            info!(claim = %record.claim, phase = %record.phase, "Resuming interrupted provisioning");
            self.submit(event);
            resumed += 1;
        }
        Ok(resumed)
    }

    /// Wait until `claim` reaches `phase` or fails
    ///
    /// A claim without a record and without queued work counts as
    /// `Released`.
    pub async fn wait_for_phase(
        &self,
        claim: &ClaimId,
        phase: ProvisionPhase,
        timeout: Duration,
    ) -> Result<ClaimStatus> {
        let mut events = self.events.subscribe();
        if let Some(status) = self.settled_status(claim, phase).await? {
            return Ok(status);
        }

        let wait = async {
            loop {
                match events.recv().await {
                    Ok(event) if &event.claim == claim && reached(&event.status, phase) => {
                        return Ok(event.status);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(claim = %claim, skipped, "Phase waiter lagged, re-reading store");
                        match self.settled_status(claim, phase).await {
                            Ok(Some(status)) => return Ok(status),
                            Ok(None) => {}
                            Err(e) => return Err(e),
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(Error::Internal("provision event channel closed".into()));
                    }
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| Error::WaitTimeout {
                claim: claim.to_string(),
                phase: phase.to_string(),
                timeout,
            })?
    }

    async fn settled_status(
        &self,
        claim: &ClaimId,
        phase: ProvisionPhase,
    ) -> Result<Option<ClaimStatus>> {
        let scheduled = self.queue.is_scheduled(claim);
        Ok(match self.store.find(claim).await? {
            Some(record) => {
                let status = record.status();
                let settled = status.phase == phase
                    || (!scheduled && status.phase == ProvisionPhase::Failed);
                settled.then_some(status)
            }
            None if phase == ProvisionPhase::Released && !scheduled => Some(ClaimStatus {
                phase: ProvisionPhase::Released,
                last_error: None,
                retry_count: 0,
                volume_name: None,
            }),
            None => None,
        })
    }

    // =========================================================================
    // Workers
    // =========================================================================

    /// Run the worker pool until `shutdown` is cancelled
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let workers = self.config.workers.max(1);
        info!(workers, backend = self.backend.backend_name(), "Starting reconciler");

        let handles = (0..workers).map(|id| tokio::spawn(self.clone().worker(id, shutdown.clone())));
        for result in join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "Reconciler worker panicked");
            }
        }

        info!("Reconciler stopped");
    }

    async fn worker(self: Arc<Self>, id: usize, shutdown: CancellationToken) {
        debug!(worker = id, "Reconciler worker started");
        loop {
            let claim = tokio::select! {
                _ = shutdown.cancelled() => break,
                claim = self.queue.next_key() => match claim {
                    Some(claim) => claim,
                    None => break,
                },
            };

            while let Some(event) = self.queue.pop(&claim) {
                if let Err(e) = self.handle(event).await {
                    error!(worker = id, claim = %claim, error = %e, "Failed to process claim event");
                }
                if shutdown.is_cancelled() {
                    break;
                }
            }
        }
        debug!(worker = id, "Reconciler worker stopped");
    }

    async fn handle(&self, event: ClaimEvent) -> Result<()> {
        match event {
            ClaimEvent::Upsert(request) => self.handle_upsert(request).await,
            ClaimEvent::Delete(claim) => self.handle_delete(&claim).await,
            ClaimEvent::ResumeCreate(claim) => match self.store.find(&claim).await? {
                Some(record)
                    if matches!(record.phase, ProvisionPhase::Pending | ProvisionPhase::Creating) =>
                {
                    self.create(record).await
                }
                _ => Ok(()),
            },
            ClaimEvent::ResumeRelease(claim) => match self.store.find(&claim).await? {
                Some(record) if record.phase == ProvisionPhase::Releasing => {
                    self.release(record).await.map(|_| ())
                }
                _ => Ok(()),
            },
        }
    }

    async fn handle_upsert(&self, request: VolumeClaimRequest) -> Result<()> {
        let claim = request.id.clone();
        let record = match self.store.find(&claim).await? {
            Some(record) => record,
            None => return self.admit_and_create(request).await,
        };

        if is_new_incarnation(&record, &request) {
            info!(claim = %claim, "Claim was recreated, releasing the previous volume first");
            if self.release(record).await? == ProvisionPhase::Released {
                return self.admit_and_create(request).await;
            }
            return Ok(());
        }

        match record.phase {
            ProvisionPhase::Pending | ProvisionPhase::Creating => self.create(record).await,
            ProvisionPhase::Bound => {
                debug!(claim = %claim, "Claim already bound");
                Ok(())
            }
            ProvisionPhase::Failed => {
                debug!(claim = %claim, "Claim failed earlier; it must be deleted to release resources");
                Ok(())
            }
            ProvisionPhase::Releasing | ProvisionPhase::Released => {
                if self.release(record).await? == ProvisionPhase::Released {
                    return self.admit_and_create(request).await;
                }
                Ok(())
            }
        }
    }

    async fn admit_and_create(&self, request: VolumeClaimRequest) -> Result<()> {
        let claim = request.id.clone();
        let admitted = match self.admission.validate(&request) {
            Ok(admitted) => admitted,
            Err(e) => {
                warn!(claim = %claim, error = %e, "Claim rejected");
                self.metrics.record_rejection();
                self.announce(&claim, ClaimStatus::rejected(&e)).await;
                return Ok(());
            }
        };

        let mut record = ProvisionRecord::new(admitted);
        self.metrics.record_transition(ProvisionPhase::Pending);
        self.persist(&mut record).await?;
        self.announce(&claim, record.status()).await;
        self.create(record).await
    }

    // =========================================================================
    // Creation
    // =========================================================================

    async fn create(&self, mut record: ProvisionRecord) -> Result<()> {
        let claim = record.claim.clone();
        if record.phase != ProvisionPhase::Creating {
            self.enter_phase(&mut record, ProvisionPhase::Creating).await?;
        }
        info!(claim = %claim, mode = %record.admitted.parameters, "Provisioning claim");

        let mut backoff = self.config.retry.backoff();
        loop {
            match self.create_steps(&mut record).await {
                Ok(()) => break,
                Err(Error::Cancelled { .. }) => {
                    info!(claim = %claim, "Deletion pending, stopping creation");
                    return Ok(());
                }
                Err(e) if e.is_retryable() => {
                    record.retry_count += 1;
                    record.last_error = Some(e.to_string());
                    self.metrics.record_retry();

                    if self.config.retry.exhausted(record.retry_count) {
                        let exhausted = Error::RetriesExhausted {
                            claim: claim.to_string(),
                            attempts: record.retry_count,
                            last_error: e.to_string(),
                        };
                        return self.fail(record, exhausted).await;
                    }

                    let delay = backoff.next_delay();
                    warn!(
                        claim = %claim,
                        attempt = record.retry_count,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Provisioning step failed, retrying"
                    );
                    self.checkpoint(&mut record).await;
                    if self.backoff_or_delete(&claim, delay).await {
                        info!(claim = %claim, "Deletion arrived during backoff, stopping creation");
                        return Ok(());
                    }
                }
                Err(e) => return self.fail(record, e).await,
            }
        }

        self.enter_phase(&mut record, ProvisionPhase::Bound).await?;
        let volume = record.status().volume_name.unwrap_or_default();
        info!(claim = %claim, volume = %volume, "Claim bound");
        Ok(())
    }

    /// Perform every creation step the record does not show as done
    async fn create_steps(&self, record: &mut ProvisionRecord) -> Result<()> {
        if record.mount_target_id.is_none() {
            let subnet_id = self.subnet_for(&record.admitted.parameters)?;
            let availability_domain = match record.availability_domain.clone() {
                Some(ad) => ad,
                None => {
                    self.check_cancelled(&record.claim)?;
                    let ad = self.select_availability_domain(record).await?;
                    record.availability_domain = Some(ad.clone());
                    self.persist(record).await?;
                    ad
                }
            };

            self.check_cancelled(&record.claim)?;
            let token = idempotency_token(record, MOUNT_TARGET_STEP);
            let mount_target = self
                .call(
                    "create_mount_target",
                    self.backend
                        .create_mount_target(&availability_domain, &subnet_id, &token),
                )
                .await?;
            info!(
                claim = %record.claim,
                mount_target = %mount_target.id,
                availability_domain = %availability_domain,
                "Mount target ready"
            );

            record.mount_target_id = Some(mount_target.id);
            record.mount_target_ownership = Some(MountTargetOwnership::Provisioner);
            record.mount_target_endpoint = Some(mount_target.endpoint);
            self.persist(record).await?;
        }

        let mount_target_id = record
            .mount_target_id
            .clone()
            .ok_or_else(|| Error::Internal(format!("no mount target recorded for {}", record.claim)))?;

        if record.mount_target_endpoint.is_none() || record.availability_domain.is_none() {
            self.check_cancelled(&record.claim)?;
            let mount_target = self
                .call("get_mount_target", self.backend.get_mount_target(&mount_target_id))
                .await?;
            record.mount_target_endpoint = Some(mount_target.endpoint);
            record
                .availability_domain
                .get_or_insert(mount_target.availability_domain);
            self.persist(record).await?;
        }

        if record.export_id.is_none() {
            self.check_cancelled(&record.claim)?;
            let request = CreateExportRequest {
                display_name: self.export_name(record),
                availability_domain: record.availability_domain.clone().unwrap_or_default(),
                capacity_bytes: record.admitted.request.capacity_bytes,
                tags: record.admitted.tags.clone(),
            };
            let token = idempotency_token(record, EXPORT_STEP);
            let export = self
                .call(
                    "create_export",
                    self.backend.create_export(&mount_target_id, &request, &token),
                )
                .await?;
            info!(claim = %record.claim, export = %export.id, path = %export.path, "Export ready");

            record.export_id = Some(export.id);
            record.export_path = Some(export.path);
            record.file_system_id = Some(export.file_system_id);
            self.persist(record).await?;
        }

        self.check_cancelled(&record.claim)?;
        let volume = record
            .volume()
            .ok_or_else(|| Error::Internal(format!("record for {} lacks volume handles", record.claim)))?;
        self.sink.publish_volume(&volume).await
    }

    fn subnet_for(&self, parameters: &StorageClassParameters) -> Result<String> {
        match parameters {
            StorageClassParameters::Subnet { subnet_id } => Ok(subnet_id.clone()),
            StorageClassParameters::Automatic => self.config.default_subnet_id.clone().ok_or_else(|| {
                Error::Configuration(
                    "automatic provisioning requires a default subnet id".into(),
                )
            }),
            StorageClassParameters::MountTarget { mount_target_id } => Err(Error::Internal(format!(
                "mount target {} was not recorded",
                mount_target_id
            ))),
        }
    }

    /// Pick the availability domain for a new mount target
    async fn select_availability_domain(&self, record: &ProvisionRecord) -> Result<String> {
        let mut domains = self
            .call(
                "list_availability_domains",
                self.backend.list_availability_domains(),
            )
            .await?;
        if domains.is_empty() {
            return Err(Error::Configuration(
                "backend reports no availability domains".into(),
            ));
        }
        domains.sort();

        if let Some(zone) = record.admitted.request.zone.as_deref() {
            let wanted = zone.to_lowercase();
            return domains
                .into_iter()
                .find(|ad| ad.to_lowercase().ends_with(&wanted))
                .ok_or_else(|| {
                    Error::InvalidParameters(format!(
                        "zone {} matches no availability domain",
                        zone
                    ))
                });
        }

        // Placement must not change across restarts or upgrades
        let hash = seahash::hash(record.claim.to_string().as_bytes());
        let index = (hash % domains.len() as u64) as usize;
        Ok(domains.swap_remove(index))
    }

    fn export_name(&self, record: &ProvisionRecord) -> String {
        format!(
            "{}{}-{}-{}",
            self.config.export_name_prefix,
            record.claim.namespace,
            record.claim.name,
            incarnation(record).chars().take(8).collect::<String>()
        )
    }

    /// Sleep out a retry delay; returns early with `true` once a deletion
    /// of the claim is queued
    async fn backoff_or_delete(&self, claim: &ClaimId, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            _ = self.queue.wait_pending(claim, ClaimEvent::is_delete) => true,
        }
    }

    fn check_cancelled(&self, claim: &ClaimId) -> Result<()> {
        if self.queue.has_pending(claim, ClaimEvent::is_delete) {
            return Err(Error::Cancelled {
                claim: claim.to_string(),
            });
        }
        Ok(())
    }

    // =========================================================================
    // Release
    // =========================================================================

    async fn handle_delete(&self, claim: &ClaimId) -> Result<()> {
        match self.store.find(claim).await? {
            Some(record) => self.release(record).await.map(|_| ()),
            None => {
                debug!(claim = %claim, "Deleted claim has no provision record");
                Ok(())
            }
        }
    }

    /// Release a record's backend resources, returning the phase it ends in
    async fn release(&self, mut record: ProvisionRecord) -> Result<ProvisionPhase> {
        let claim = record.claim.clone();
        if record.phase != ProvisionPhase::Releasing {
            self.enter_phase(&mut record, ProvisionPhase::Releasing).await?;
        }
        info!(claim = %claim, "Releasing claim");

        let mut backoff = self.config.retry.backoff();
        loop {
            match self.release_steps(&mut record).await {
                Ok(()) => break,
                Err(e) if e.is_retryable() => {
                    record.retry_count += 1;
                    record.last_error = Some(e.to_string());
                    self.metrics.record_retry();

                    if self.config.retry.exhausted(record.retry_count) {
                        let exhausted = Error::RetriesExhausted {
                            claim: claim.to_string(),
                            attempts: record.retry_count,
                            last_error: e.to_string(),
                        };
                        self.fail(record, exhausted).await?;
                        return Ok(ProvisionPhase::Failed);
                    }

                    let delay = backoff.next_delay();
                    warn!(
                        claim = %claim,
                        attempt = record.retry_count,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Release step failed, retrying"
                    );
                    self.checkpoint(&mut record).await;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    self.fail(record, e).await?;
                    return Ok(ProvisionPhase::Failed);
                }
            }
        }

        self.store.delete(&claim).await?;
        record.transition(ProvisionPhase::Released);
        self.metrics.record_transition(ProvisionPhase::Released);
        self.announce(&claim, record.status()).await;
        info!(claim = %claim, "Claim released");
        Ok(ProvisionPhase::Released)
    }

    async fn release_steps(&self, record: &mut ProvisionRecord) -> Result<()> {
        if let Some(export_id) = record.export_id.clone() {
            self.sink
                .retract_volume(&record.claim, &Volume::name_for_export(&export_id))
                .await?;
            already_gone(
                self.call("delete_export", self.backend.delete_export(&export_id))
                    .await,
                "export",
                &export_id,
            )?;

            record.export_id = None;
            record.export_path = None;
            self.persist(record).await?;
        }

        if let Some(file_system_id) = record.file_system_id.clone() {
            already_gone(
                self.call(
                    "delete_file_system",
                    self.backend.delete_file_system(&file_system_id),
                )
                .await,
                "file system",
                &file_system_id,
            )?;

            record.file_system_id = None;
            self.persist(record).await?;
        }

        if record.owns_mount_target() {
            if let Some(mount_target_id) = record.mount_target_id.clone() {
                already_gone(
                    self.call(
                        "delete_mount_target",
                        self.backend.delete_mount_target(&mount_target_id),
                    )
                    .await,
                    "mount target",
                    &mount_target_id,
                )?;

                record.mount_target_id = None;
                record.mount_target_endpoint = None;
                record.mount_target_ownership = None;
                self.persist(record).await?;
            }
        }

        Ok(())
    }

    // =========================================================================
    // Shared Helpers
    // =========================================================================

    async fn fail(&self, mut record: ProvisionRecord, cause: Error) -> Result<()> {
        record.last_error = Some(cause.to_string());
        error!(
            claim = %record.claim,
            phase = %record.phase,
            attempts = record.retry_count,
            error = %cause,
            "Claim failed"
        );
        self.enter_phase(&mut record, ProvisionPhase::Failed).await
    }

    async fn enter_phase(&self, record: &mut ProvisionRecord, phase: ProvisionPhase) -> Result<()> {
        record.transition(phase);
        self.metrics.record_transition(phase);
        self.persist(record).await?;
        self.announce(&record.claim, record.status()).await;
        Ok(())
    }

    async fn persist(&self, record: &mut ProvisionRecord) -> Result<()> {
        record.updated_at = Utc::now();
        self.store.put(&record.claim, record).await
    }

    /// Persist retry progress; a store outage here only delays the count
    async fn checkpoint(&self, record: &mut ProvisionRecord) {
        if let Err(e) = self.persist(record).await {
            warn!(claim = %record.claim, error = %e, "Failed to persist retry state");
        }
        self.announce(&record.claim, record.status()).await;
    }

    async fn announce(&self, claim: &ClaimId, status: ClaimStatus) {
        if let Err(e) = self.sink.update_status(claim, &status).await {
            warn!(claim = %claim, error = %e, "Failed to update claim status");
        }
        // No subscribers is fine
        let _ = self.events.send(ProvisionEvent {
            claim: claim.clone(),
            status,
        });
    }

    /// Run one backend call under the configured deadline
    async fn call<T, F>(&self, operation: &'static str, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.config.backend_timeout, future).await {
            Ok(result) => result,
            Err(_) => Err(Error::BackendTimeout {
                operation: operation.to_string(),
                timeout: self.config.backend_timeout,
            }),
        };
        self.metrics
            .record_backend_call(operation, started.elapsed(), result.is_ok());
        result
    }
}

fn reached(status: &ClaimStatus, phase: ProvisionPhase) -> bool {
    status.phase == phase || status.phase == ProvisionPhase::Failed
}

/// A claim deleted and recreated under the same name gets a new uid
fn is_new_incarnation(record: &ProvisionRecord, request: &VolumeClaimRequest) -> bool {
    match (&record.admitted.request.uid, &request.uid) {
        (Some(recorded), Some(observed)) => recorded != observed,
        _ => false,
    }
}

/// Distinguishes successive claims with the same name
fn incarnation(record: &ProvisionRecord) -> String {
    match &record.admitted.request.uid {
        Some(uid) => uid.replace('-', ""),
        None => format!("{:x}", record.created_at.timestamp_millis()),
    }
}

/// Token that makes a creation step safe to replay
fn idempotency_token(record: &ProvisionRecord, step: &str) -> String {
    format!("{}/{}/{}", record.claim, incarnation(record), step)
}

/// Treat a delete of something already gone as done
fn already_gone(result: Result<()>, kind: &str, id: &str) -> Result<()> {
    match result {
        Err(e) if e.delete_action() == ErrorAction::AlreadySatisfied => {
            debug!(kind, id, error = %e, "Resource already gone");
            Ok(())
        }
        other => other,
    }
}
