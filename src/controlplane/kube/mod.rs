//! Kubernetes adapter
//!
//! - `watcher`: PersistentVolumeClaims of this provisioner's storage classes
//!   become claim events
//! - `publisher`: bound volumes become PersistentVolumes, claim status
//!   becomes claim annotations

pub mod publisher;
pub mod watcher;

pub use publisher::{KubeStatusSink, PublisherConfig};
pub use watcher::ClaimWatcher;

/// Default provisioner name storage classes refer to
pub const DEFAULT_PROVISIONER_NAME: &str = "oracle.com/oci-fss";

pub const ANNOTATION_PROVISIONED_BY: &str = "pv.kubernetes.io/provisioned-by";
pub const ANNOTATION_EXPORT_ID: &str = "fss.oraclecloud.com/export-id";
pub const ANNOTATION_MOUNT_TARGET_ID: &str = "fss.oraclecloud.com/mount-target-id";
pub const ANNOTATION_PHASE: &str = "fss.oraclecloud.com/provision-phase";
pub const ANNOTATION_LAST_ERROR: &str = "fss.oraclecloud.com/last-error";
pub const ANNOTATION_RETRY_COUNT: &str = "fss.oraclecloud.com/retry-count";

pub const LABEL_ZONE: &str = "topology.kubernetes.io/zone";
pub const LABEL_REGION: &str = "topology.kubernetes.io/region";
pub const LABEL_LEGACY_ZONE: &str = "failure-domain.beta.kubernetes.io/zone";
pub const LABEL_LEGACY_REGION: &str = "failure-domain.beta.kubernetes.io/region";

/// Claim selector labels naming a zone
pub const SELECTOR_ZONE: &str = LABEL_ZONE;
pub const SELECTOR_LEGACY_ZONE: &str = LABEL_LEGACY_ZONE;
