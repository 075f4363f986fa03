//! Watches PersistentVolumeClaims and feeds claim events to the reconciler

use super::{SELECTOR_LEGACY_ZONE, SELECTOR_ZONE};
use crate::controlplane::reconciler::{ClaimEvent, Reconciler};
use crate::domain::capacity::parse_capacity;
use crate::domain::ports::{ClaimId, ProvisionPhase, VolumeClaimRequest};
use crate::error::{Error, Result};
use dashmap::DashMap;
use futures::StreamExt;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::api::storage::v1::StorageClass;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, ResourceExt};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Turns claim changes into reconciler events
pub struct ClaimWatcher {
    client: Client,
    reconciler: Arc<Reconciler>,
    provisioner_name: String,
    /// Storage class name -> parameters, `None` for classes of other provisioners
    classes: DashMap<String, Option<BTreeMap<String, String>>>,
}

impl ClaimWatcher {
    pub fn new(client: Client, reconciler: Arc<Reconciler>, provisioner_name: impl Into<String>) -> Self {
        Self {
            client,
            reconciler,
            provisioner_name: provisioner_name.into(),
            classes: DashMap::new(),
        }
    }

    /// Watch claims in every namespace until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let api: Api<PersistentVolumeClaim> = Api::all(self.client.clone());
        let stream = watcher(api, watcher::Config::default()).default_backoff();
        tokio::pin!(stream);

        info!(provisioner = %self.provisioner_name, "Watching PersistentVolumeClaims");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = stream.next() => match event {
                    Some(Ok(watcher::Event::Applied(pvc))) => self.on_applied(&pvc).await,
                    Some(Ok(watcher::Event::Deleted(pvc))) => self.on_deleted(&pvc).await,
                    Some(Ok(watcher::Event::Restarted(pvcs))) => self.on_restarted(&pvcs).await,
                    Some(Err(e)) => warn!(error = %e, "Claim watch error, retrying"),
                    None => return Err(Error::Internal("claim watch stream ended".into())),
                },
            }
        }

        info!("Claim watcher stopped");
        Ok(())
    }

    async fn on_applied(&self, pvc: &PersistentVolumeClaim) {
        let claim = claim_id(pvc);
        if pvc.metadata.deletion_timestamp.is_some() {
            return self.on_deleted(pvc).await;
        }

        let Some(parameters) = self.class_parameters(pvc).await else {
            return;
        };

        match claim_request(pvc, parameters) {
            Ok(request) => self.reconciler.submit(ClaimEvent::Upsert(request)),
            Err(e) => warn!(claim = %claim, error = %e, "Ignoring malformed claim"),
        }
    }

    /// Deletes go to the reconciler unconditionally: a claim without a
    /// record is a no-op there, and the class may be gone or unreadable.
    async fn on_deleted(&self, pvc: &PersistentVolumeClaim) {
        self.reconciler.submit(ClaimEvent::Delete(claim_id(pvc)));
    }

    /// A relist is the full claim set: anything recorded but not listed was
    /// deleted while the watch was down.
    async fn on_restarted(&self, pvcs: &[PersistentVolumeClaim]) {
        debug!(claims = pvcs.len(), "Claim watch restarted");
        for pvc in pvcs {
            self.on_applied(pvc).await;
        }

        let present: HashSet<ClaimId> = pvcs.iter().map(claim_id).collect();
        self.release_vanished(&present).await;
    }

    async fn release_vanished(&self, present: &HashSet<ClaimId>) {
        let records = match self.reconciler.records().await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Failed to list provision records after relist");
                return;
            }
        };

        for record in records {
            if record.phase == ProvisionPhase::Released || present.contains(&record.claim) {
                continue;
            }
            info!(claim = %record.claim, phase = %record.phase, "Claim no longer exists, releasing");
            self.reconciler.submit(ClaimEvent::Delete(record.claim));
        }
    }

    /// Parameters of the claim's storage class when this provisioner serves it
    async fn class_parameters(&self, pvc: &PersistentVolumeClaim) -> Option<BTreeMap<String, String>> {
        let class = pvc.spec.as_ref()?.storage_class_name.as_deref()?;
        if let Some(cached) = self.classes.get(class) {
            return cached.value().clone();
        }

        let api: Api<StorageClass> = Api::all(self.client.clone());
        match api.get_opt(class).await {
            Ok(Some(sc)) => {
                let parameters = (sc.provisioner == self.provisioner_name)
                    .then(|| sc.parameters.clone().unwrap_or_default());
                self.classes.insert(class.to_string(), parameters.clone());
                parameters
            }
            Ok(None) => {
                debug!(storage_class = class, "Storage class not found");
                None
            }
            Err(e) => {
                warn!(storage_class = class, error = %e, "Failed to read storage class");
                None
            }
        }
    }
}

fn claim_id(pvc: &PersistentVolumeClaim) -> ClaimId {
    ClaimId::new(pvc.namespace().unwrap_or_default(), pvc.name_any())
}

/// Build a claim request from a PersistentVolumeClaim and its class parameters
pub fn claim_request(
    pvc: &PersistentVolumeClaim,
    parameters: BTreeMap<String, String>,
) -> Result<VolumeClaimRequest> {
    let spec = pvc
        .spec
        .as_ref()
        .ok_or_else(|| Error::InvalidParameters("claim has no spec".into()))?;

    let storage = spec
        .resources
        .as_ref()
        .and_then(|r| r.requests.as_ref())
        .and_then(|requests| requests.get("storage"))
        .ok_or_else(|| Error::InvalidParameters("claim requests no storage".into()))?;

    let zone = spec
        .selector
        .as_ref()
        .and_then(|s| s.match_labels.as_ref())
        .and_then(|labels| {
            labels
                .get(SELECTOR_ZONE)
                .or_else(|| labels.get(SELECTOR_LEGACY_ZONE))
                .cloned()
        });

    Ok(VolumeClaimRequest {
        id: claim_id(pvc),
        uid: pvc.uid(),
        storage_class: spec.storage_class_name.clone().unwrap_or_default(),
        capacity_bytes: parse_capacity(&storage.0)?,
        access_modes: spec.access_modes.clone().unwrap_or_default(),
        zone,
        annotations: pvc.annotations().clone(),
        parameters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::backends::InMemoryBackend;
    use crate::controlplane::kube::DEFAULT_PROVISIONER_NAME;
    use crate::controlplane::reconciler::ReconcilerConfig;
    use crate::controlplane::retry::RetryConfig;
    use crate::controlplane::status::MemoryStatusSink;
    use crate::domain::ports::ProvisionStore;
    use crate::store::tests::test_record;
    use crate::store::MemoryStore;
    use std::convert::Infallible;
    use std::time::Duration;
    use k8s_openapi::api::core::v1::{PersistentVolumeClaimSpec, VolumeResourceRequirements};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
    use kube::api::ObjectMeta;

    fn pvc(storage: &str, zone: Option<&str>) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some("data".into()),
                namespace: Some("team-a".into()),
                uid: Some("7d2c-11".into()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteMany".into()]),
                storage_class_name: Some("oci-fss".into()),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "storage".to_string(),
                        Quantity(storage.to_string()),
                    )])),
                    ..Default::default()
                }),
                selector: zone.map(|z| LabelSelector {
                    match_labels: Some(BTreeMap::from([(
                        SELECTOR_LEGACY_ZONE.to_string(),
                        z.to_string(),
                    )])),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_claim_request() {
        let parameters = BTreeMap::from([("subnetId".to_string(), "ocid1.subnet.x".to_string())]);
        let request = claim_request(&pvc("50Gi", Some("PHX-AD-1")), parameters).unwrap();

        assert_eq!(request.id, ClaimId::new("team-a", "data"));
        assert_eq!(request.uid.as_deref(), Some("7d2c-11"));
        assert_eq!(request.storage_class, "oci-fss");
        assert_eq!(request.capacity_bytes, 50 << 30);
        assert_eq!(request.access_modes, vec!["ReadWriteMany".to_string()]);
        assert_eq!(request.zone.as_deref(), Some("PHX-AD-1"));
        assert_eq!(request.parameters["subnetId"], "ocid1.subnet.x");
    }

    #[test]
    fn test_claim_request_rejects_bad_capacity() {
        assert!(claim_request(&pvc("lots", None), BTreeMap::new()).is_err());

        let mut no_spec = pvc("1Gi", None);
        no_spec.spec = None;
        assert!(claim_request(&no_spec, BTreeMap::new()).is_err());
    }

    const WAIT: Duration = Duration::from_secs(5);

    /// Kubernetes API that fails every request, so storage class lookups
    /// come back empty
    fn unavailable_api() -> Client {
        let service = tower::service_fn(|_request: hyper::Request<hyper::Body>| async {
            let status = serde_json::json!({
                "kind": "Status",
                "apiVersion": "v1",
                "status": "Failure",
                "message": "etcdserver: request timed out",
                "reason": "InternalError",
                "code": 500,
            });
            let response = hyper::Response::builder()
                .status(500)
                .header("content-type", "application/json")
                .body(hyper::Body::from(status.to_string()))
                .unwrap();
            Ok::<_, Infallible>(response)
        });
        Client::new(service, "default")
    }

    struct Fixture {
        backend: Arc<InMemoryBackend>,
        sink: Arc<MemoryStatusSink>,
        reconciler: Arc<Reconciler>,
        watcher: ClaimWatcher,
        shutdown: CancellationToken,
    }

    impl Fixture {
        fn start(store: Arc<MemoryStore>) -> Self {
            let config = ReconcilerConfig {
                retry: RetryConfig {
                    max_attempts: 5,
                    initial_delay: Duration::from_millis(1),
                    max_delay: Duration::from_millis(5),
                    backoff_multiplier: 2.0,
                    jitter: 0.0,
                },
                default_subnet_id: Some("ocid1.subnet.oc1.phx.default".into()),
                ..Default::default()
            };
            let backend = Arc::new(InMemoryBackend::default());
            let sink = Arc::new(MemoryStatusSink::new());
            let reconciler = Reconciler::new(config, backend.clone(), store, sink.clone()).unwrap();
            let shutdown = CancellationToken::new();
            tokio::spawn(reconciler.clone().run(shutdown.clone()));
            let watcher = ClaimWatcher::new(unavailable_api(), reconciler.clone(), DEFAULT_PROVISIONER_NAME);
            Self {
                backend,
                sink,
                reconciler,
                watcher,
                shutdown,
            }
        }

        async fn bind(&self, pvc: &PersistentVolumeClaim) {
            let request = claim_request(pvc, BTreeMap::new()).unwrap();
            self.reconciler.submit(ClaimEvent::Upsert(request));
            let status = self
                .reconciler
                .wait_for_phase(&claim_id(pvc), ProvisionPhase::Bound, WAIT)
                .await
                .unwrap();
            assert_eq!(status.phase, ProvisionPhase::Bound);
        }

        async fn assert_released(&self, claim: &ClaimId) {
            let status = self
                .reconciler
                .wait_for_phase(claim, ProvisionPhase::Released, WAIT)
                .await
                .unwrap();
            assert_eq!(status.phase, ProvisionPhase::Released);
            assert!(self.sink.volumes_for(claim).is_empty());
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            self.shutdown.cancel();
        }
    }

    fn named(name: &str, uid: &str) -> PersistentVolumeClaim {
        let mut claim = pvc("10Gi", None);
        claim.metadata.name = Some(name.into());
        claim.metadata.uid = Some(uid.into());
        claim
    }

    #[tokio::test]
    async fn test_delete_reaches_reconciler_when_class_lookup_fails() {
        let fixture = Fixture::start(Arc::new(MemoryStore::new()));
        let claim = named("data", "7d2c-11");
        fixture.bind(&claim).await;

        fixture.watcher.on_deleted(&claim).await;
        fixture.assert_released(&claim_id(&claim)).await;
        assert!(fixture.backend.export_ids().await.is_empty());
        assert!(fixture.backend.file_system_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_relist_releases_claims_deleted_while_down() {
        let fixture = Fixture::start(Arc::new(MemoryStore::new()));
        let kept = named("kept", "uid-kept");
        let gone = named("gone", "uid-gone");
        fixture.bind(&kept).await;
        fixture.bind(&gone).await;

        fixture.watcher.on_restarted(&[kept.clone()]).await;
        fixture.assert_released(&claim_id(&gone)).await;
        fixture.reconciler.wait_idle().await;

        let status = fixture
            .reconciler
            .status(&claim_id(&kept))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.phase, ProvisionPhase::Bound);
        assert_eq!(fixture.backend.export_ids().await.len(), 1);
        assert_eq!(fixture.sink.volumes_for(&claim_id(&kept)).len(), 1);
    }

    #[tokio::test]
    async fn test_relist_releases_interrupted_creation_of_vanished_claim() {
        let store = Arc::new(MemoryStore::new());
        let mut record = test_record("team-a", "interrupted");
        record.transition(ProvisionPhase::Creating);
        store.put(&record.claim, &record).await.unwrap();

        let fixture = Fixture::start(store);
        assert_eq!(fixture.reconciler.recover().await.unwrap(), 1);
        fixture.watcher.on_restarted(&[]).await;

        fixture.assert_released(&record.claim).await;
        fixture.reconciler.wait_idle().await;
        assert!(fixture.backend.export_ids().await.is_empty());
        assert!(fixture.backend.file_system_ids().await.is_empty());
        assert!(fixture.backend.mount_target_ids().await.is_empty());
    }
}
