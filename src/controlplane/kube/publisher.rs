//! Publishes provisioning results to the cluster
//!
//! Bound volumes become NFS PersistentVolumes pre-bound to their claim;
//! claim status lands in annotations on the PersistentVolumeClaim.

use super::{
    ANNOTATION_EXPORT_ID, ANNOTATION_LAST_ERROR, ANNOTATION_MOUNT_TARGET_ID, ANNOTATION_PHASE,
    ANNOTATION_PROVISIONED_BY, ANNOTATION_RETRY_COUNT, LABEL_LEGACY_REGION, LABEL_LEGACY_ZONE,
    LABEL_REGION, LABEL_ZONE,
};
use crate::domain::ports::{ClaimId, ClaimStatus, ClaimStatusSink, Volume};
use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    NFSVolumeSource, ObjectReference, PersistentVolume, PersistentVolumeClaim,
    PersistentVolumeSpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{Api, DeleteParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::Client;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Configuration for publishing volumes
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Provisioner name recorded on every volume
    pub provisioner_name: String,
    /// Region label value, if known
    pub region: Option<String>,
}

/// `ClaimStatusSink` backed by the Kubernetes API
pub struct KubeStatusSink {
    client: Client,
    config: PublisherConfig,
}

impl KubeStatusSink {
    pub fn new(client: Client, config: PublisherConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl ClaimStatusSink for KubeStatusSink {
    async fn publish_volume(&self, volume: &Volume) -> Result<()> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        let pv = build_persistent_volume(volume, &self.config);

        match api.create(&PostParams::default(), &pv).await {
            Ok(_) => {
                info!(volume = %volume.name, claim = %volume.claim, "Created PersistentVolume");
                Ok(())
            }
            Err(kube::Error::Api(response)) if response.code == 409 => {
                debug!(volume = %volume.name, "PersistentVolume already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn retract_volume(&self, claim: &ClaimId, volume_name: &str) -> Result<()> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        match api.delete(volume_name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(volume = volume_name, claim = %claim, "Deleted PersistentVolume");
                Ok(())
            }
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_status(&self, claim: &ClaimId, status: &ClaimStatus) -> Result<()> {
        let api: Api<PersistentVolumeClaim> =
            Api::namespaced(self.client.clone(), &claim.namespace);
        let patch = serde_json::json!({
            "metadata": { "annotations": status_annotations(status) }
        });

        match api
            .patch(&claim.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            // The claim is gone; nothing left to annotate
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Build the PersistentVolume for a bound volume
pub fn build_persistent_volume(volume: &Volume, config: &PublisherConfig) -> PersistentVolume {
    let mut annotations = BTreeMap::new();
    annotations.insert(
        ANNOTATION_PROVISIONED_BY.to_string(),
        config.provisioner_name.clone(),
    );
    annotations.insert(ANNOTATION_EXPORT_ID.to_string(), volume.export_id.clone());
    annotations.insert(
        ANNOTATION_MOUNT_TARGET_ID.to_string(),
        volume.mount_target_id.clone(),
    );

    let zone = zone_of(&volume.availability_domain).to_string();
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_ZONE.to_string(), zone.clone());
    labels.insert(LABEL_LEGACY_ZONE.to_string(), zone);
    if let Some(region) = &config.region {
        labels.insert(LABEL_REGION.to_string(), region.clone());
        labels.insert(LABEL_LEGACY_REGION.to_string(), region.clone());
    }

    let mut capacity = BTreeMap::new();
    capacity.insert(
        "storage".to_string(),
        Quantity(volume.capacity_bytes.to_string()),
    );

    PersistentVolume {
        metadata: ObjectMeta {
            name: Some(volume.name.clone()),
            annotations: Some(annotations),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(PersistentVolumeSpec {
            access_modes: Some(volume.access_modes.iter().map(|m| m.to_string()).collect()),
            capacity: Some(capacity),
            claim_ref: Some(ObjectReference {
                api_version: Some("v1".to_string()),
                kind: Some("PersistentVolumeClaim".to_string()),
                namespace: Some(volume.claim.namespace.clone()),
                name: Some(volume.claim.name.clone()),
                uid: volume.claim_uid.clone(),
                ..Default::default()
            }),
            nfs: Some(NFSVolumeSource {
                server: volume.mount_target_endpoint.clone(),
                path: volume.export_path.clone(),
                read_only: None,
            }),
            persistent_volume_reclaim_policy: Some("Delete".to_string()),
            storage_class_name: Some(volume.storage_class.clone()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Annotations recording a claim's provisioning status
pub fn status_annotations(status: &ClaimStatus) -> BTreeMap<String, Option<String>> {
    let mut annotations = BTreeMap::new();
    annotations.insert(ANNOTATION_PHASE.to_string(), Some(status.phase.to_string()));
    annotations.insert(
        ANNOTATION_RETRY_COUNT.to_string(),
        Some(status.retry_count.to_string()),
    );
    // `None` removes a stale error through the merge patch
    annotations.insert(ANNOTATION_LAST_ERROR.to_string(), status.last_error.clone());
    annotations
}

/// Zone part of an availability domain (`Uocm:PHX-AD-1` -> `PHX-AD-1`)
fn zone_of(availability_domain: &str) -> &str {
    availability_domain
        .rsplit_once(':')
        .map(|(_, zone)| zone)
        .unwrap_or(availability_domain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{AccessMode, ProvisionPhase};

    fn volume() -> Volume {
        Volume {
            name: "ocid1.export.oc1.phx.aaaa".into(),
            claim: ClaimId::new("team-a", "data"),
            claim_uid: Some("7d2c".into()),
            storage_class: "oci-fss".into(),
            export_id: "ocid1.export.oc1.phx.AAAA".into(),
            export_path: "/fss-team-a-data-7d2c".into(),
            mount_target_id: "ocid1.mounttarget.oc1.phx.bbbb".into(),
            mount_target_endpoint: "10.0.1.5".into(),
            availability_domain: "Uocm:PHX-AD-1".into(),
            capacity_bytes: 50 << 30,
            access_modes: vec![AccessMode::ReadWriteMany],
        }
    }

    #[test]
    fn test_build_persistent_volume() {
        let config = PublisherConfig {
            provisioner_name: "oracle.com/oci-fss".into(),
            region: Some("us-phoenix-1".into()),
        };
        let pv = build_persistent_volume(&volume(), &config);

        assert_eq!(pv.metadata.name.as_deref(), Some("ocid1.export.oc1.phx.aaaa"));
        let labels = pv.metadata.labels.unwrap();
        assert_eq!(labels[LABEL_ZONE], "PHX-AD-1");
        assert_eq!(labels[LABEL_REGION], "us-phoenix-1");
        let annotations = pv.metadata.annotations.unwrap();
        assert_eq!(annotations[ANNOTATION_PROVISIONED_BY], "oracle.com/oci-fss");
        assert_eq!(annotations[ANNOTATION_EXPORT_ID], "ocid1.export.oc1.phx.AAAA");

        let spec = pv.spec.unwrap();
        let nfs = spec.nfs.unwrap();
        assert_eq!(nfs.server, "10.0.1.5");
        assert_eq!(nfs.path, "/fss-team-a-data-7d2c");
        assert_eq!(spec.capacity.unwrap()["storage"].0, (50i64 << 30).to_string());
        assert_eq!(spec.access_modes.unwrap(), vec!["ReadWriteMany".to_string()]);
        let claim_ref = spec.claim_ref.unwrap();
        assert_eq!(claim_ref.namespace.as_deref(), Some("team-a"));
        assert_eq!(claim_ref.uid.as_deref(), Some("7d2c"));
        assert_eq!(spec.storage_class_name.as_deref(), Some("oci-fss"));
    }

    #[test]
    fn test_region_label_optional() {
        let config = PublisherConfig {
            provisioner_name: "oracle.com/oci-fss".into(),
            region: None,
        };
        let pv = build_persistent_volume(&volume(), &config);
        assert!(!pv.metadata.labels.unwrap().contains_key(LABEL_REGION));
    }

    #[test]
    fn test_status_annotations() {
        let status = ClaimStatus {
            phase: ProvisionPhase::Creating,
            last_error: None,
            retry_count: 2,
            volume_name: None,
        };
        let annotations = status_annotations(&status);
        assert_eq!(annotations[ANNOTATION_PHASE].as_deref(), Some("Creating"));
        assert_eq!(annotations[ANNOTATION_RETRY_COUNT].as_deref(), Some("2"));
        assert_eq!(annotations[ANNOTATION_LAST_ERROR], None);

        let json = serde_json::to_value(&annotations).unwrap();
        assert!(json[ANNOTATION_LAST_ERROR].is_null());
    }

    #[test]
    fn test_zone_of() {
        assert_eq!(zone_of("Uocm:PHX-AD-1"), "PHX-AD-1");
        assert_eq!(zone_of("PHX-AD-2"), "PHX-AD-2");
    }
}
