//! Domain Ports - Core types and trait definitions for the provisioner
//!
//! These traits define the boundaries between the reconciliation logic and
//! external systems: the file storage backend, the provision state store,
//! and the cluster that receives volume and claim status updates.

use crate::domain::tags::Tags;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Claim Identity
// =============================================================================

/// Identity of a volume claim (namespace + name)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClaimId {
    pub namespace: String,
    pub name: String,
}

impl ClaimId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse a `namespace/name` key
    pub fn parse(key: &str) -> Option<Self> {
        let (namespace, name) = key.split_once('/')?;
        if namespace.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self::new(namespace, name))
    }
}

impl std::fmt::Display for ClaimId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// =============================================================================
// Claim Request
// =============================================================================

/// Volume access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    ReadWriteOnce,
    ReadOnlyMany,
    ReadWriteMany,
}

impl std::fmt::Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessMode::ReadWriteOnce => write!(f, "ReadWriteOnce"),
            AccessMode::ReadOnlyMany => write!(f, "ReadOnlyMany"),
            AccessMode::ReadWriteMany => write!(f, "ReadWriteMany"),
        }
    }
}

impl std::str::FromStr for AccessMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ReadWriteOnce" => Ok(AccessMode::ReadWriteOnce),
            "ReadOnlyMany" => Ok(AccessMode::ReadOnlyMany),
            "ReadWriteMany" => Ok(AccessMode::ReadWriteMany),
            other => Err(Error::InvalidParameters(format!(
                "unsupported access mode {:?}",
                other
            ))),
        }
    }
}

/// A request for a dynamically provisioned volume, as observed on the cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeClaimRequest {
    /// Claim identity
    pub id: ClaimId,
    /// Cluster-assigned uid of the claim, if known
    #[serde(default)]
    pub uid: Option<String>,
    /// Storage class the claim references
    pub storage_class: String,
    /// Requested capacity in bytes
    pub capacity_bytes: i64,
    /// Requested access modes, as written on the claim
    #[serde(default)]
    pub access_modes: Vec<String>,
    /// Zone the claim selects, if any
    #[serde(default)]
    pub zone: Option<String>,
    /// Claim annotations
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Raw storage class parameters
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

// =============================================================================
// Storage Class Parameters
// =============================================================================

/// How the provisioner obtains a mount target for a storage class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum StorageClassParameters {
    /// Create a mount target in the given subnet
    #[serde(rename_all = "camelCase")]
    Subnet { subnet_id: String },
    /// Reuse an existing mount target
    #[serde(rename_all = "camelCase")]
    MountTarget { mount_target_id: String },
    /// Select an availability domain and create everything
    Automatic,
}

impl StorageClassParameters {
    /// Whether the provisioner creates (and therefore owns) the mount target
    pub fn creates_mount_target(&self) -> bool {
        !matches!(self, StorageClassParameters::MountTarget { .. })
    }
}

impl std::fmt::Display for StorageClassParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageClassParameters::Subnet { subnet_id } => write!(f, "subnet({})", subnet_id),
            StorageClassParameters::MountTarget { mount_target_id } => {
                write!(f, "mount-target({})", mount_target_id)
            }
            StorageClassParameters::Automatic => write!(f, "automatic"),
        }
    }
}

/// A claim that passed admission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmittedClaim {
    pub request: VolumeClaimRequest,
    pub parameters: StorageClassParameters,
    pub access_modes: Vec<AccessMode>,
    #[serde(default)]
    pub tags: Tags,
}

impl AdmittedClaim {
    pub fn id(&self) -> &ClaimId {
        &self.request.id
    }
}

// =============================================================================
// Provision Record
// =============================================================================

/// Lifecycle phase of a claim's provisioning
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProvisionPhase {
    #[default]
    Pending,
    Creating,
    Bound,
    Releasing,
    Released,
    Failed,
}

impl ProvisionPhase {
    /// Phases in which backend calls are in flight
    pub fn is_active(&self) -> bool {
        matches!(self, ProvisionPhase::Creating | ProvisionPhase::Releasing)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProvisionPhase::Released | ProvisionPhase::Failed)
    }
}

impl std::fmt::Display for ProvisionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProvisionPhase::Pending => write!(f, "Pending"),
            ProvisionPhase::Creating => write!(f, "Creating"),
            ProvisionPhase::Bound => write!(f, "Bound"),
            ProvisionPhase::Releasing => write!(f, "Releasing"),
            ProvisionPhase::Released => write!(f, "Released"),
            ProvisionPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Who created the mount target a record uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MountTargetOwnership {
    /// Created by this provisioner; deleted on release
    Provisioner,
    /// Supplied by the storage class; never deleted
    Caller,
}

/// Persisted provisioning state for a single claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionRecord {
    pub claim: ClaimId,
    pub admitted: AdmittedClaim,
    pub phase: ProvisionPhase,
    /// Phase the record was in when it failed
    #[serde(default)]
    pub failed_in: Option<ProvisionPhase>,
    #[serde(default)]
    pub availability_domain: Option<String>,
    #[serde(default)]
    pub mount_target_id: Option<String>,
    #[serde(default)]
    pub mount_target_ownership: Option<MountTargetOwnership>,
    #[serde(default)]
    pub mount_target_endpoint: Option<String>,
    #[serde(default)]
    pub export_id: Option<String>,
    #[serde(default)]
    pub export_path: Option<String>,
    #[serde(default)]
    pub file_system_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
}

impl ProvisionRecord {
    /// Create a fresh `Pending` record for an admitted claim
    pub fn new(admitted: AdmittedClaim) -> Self {
        let now = Utc::now();
        let mount_target_id = match &admitted.parameters {
            StorageClassParameters::MountTarget { mount_target_id } => {
                Some(mount_target_id.clone())
            }
            _ => None,
        };
        let mount_target_ownership = mount_target_id
            .as_ref()
            .map(|_| MountTargetOwnership::Caller);

        Self {
            claim: admitted.id().clone(),
            admitted,
            phase: ProvisionPhase::Pending,
            failed_in: None,
            availability_domain: None,
            mount_target_id,
            mount_target_ownership,
            mount_target_endpoint: None,
            export_id: None,
            export_path: None,
            file_system_id: None,
            created_at: now,
            updated_at: now,
            last_error: None,
            retry_count: 0,
        }
    }

    /// Move to a new phase
    ///
    /// Entering `Failed` keeps the error and retry count that led there; any
    /// other phase starts with a fresh retry budget.
    pub fn transition(&mut self, phase: ProvisionPhase) {
        if phase == ProvisionPhase::Failed {
            self.failed_in = Some(self.phase);
        } else {
            self.failed_in = None;
            self.last_error = None;
            self.retry_count = 0;
        }
        self.phase = phase;
        self.updated_at = Utc::now();
    }

    /// Whether the provisioner owns the mount target recorded here
    pub fn owns_mount_target(&self) -> bool {
        self.mount_target_ownership == Some(MountTargetOwnership::Provisioner)
    }

    /// Whether any backend resource still needs cleaning up
    pub fn has_backend_resources(&self) -> bool {
        self.export_id.is_some()
            || self.file_system_id.is_some()
            || (self.owns_mount_target() && self.mount_target_id.is_some())
    }

    /// Build the bound volume, if every handle is present
    pub fn volume(&self) -> Option<Volume> {
        Some(Volume {
            name: Volume::name_for_export(self.export_id.as_deref()?),
            claim: self.claim.clone(),
            claim_uid: self.admitted.request.uid.clone(),
            storage_class: self.admitted.request.storage_class.clone(),
            export_id: self.export_id.clone()?,
            export_path: self.export_path.clone()?,
            mount_target_id: self.mount_target_id.clone()?,
            mount_target_endpoint: self.mount_target_endpoint.clone()?,
            availability_domain: self.availability_domain.clone()?,
            capacity_bytes: self.admitted.request.capacity_bytes,
            access_modes: self.admitted.access_modes.clone(),
        })
    }

    /// Status surfaced back to the claim
    pub fn status(&self) -> ClaimStatus {
        ClaimStatus {
            phase: self.phase,
            last_error: self.last_error.clone(),
            retry_count: self.retry_count,
            volume_name: self.export_id.as_deref().map(Volume::name_for_export),
        }
    }
}

// =============================================================================
// Volume
// =============================================================================

/// A bound volume published back to the cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// Volume name; the backend export id, whose last dot-separated segment
    /// is the unique backend identifier
    pub name: String,
    pub claim: ClaimId,
    /// Uid of the claim the volume is reserved for
    #[serde(default)]
    pub claim_uid: Option<String>,
    pub storage_class: String,
    pub export_id: String,
    pub export_path: String,
    pub mount_target_id: String,
    pub mount_target_endpoint: String,
    pub availability_domain: String,
    pub capacity_bytes: i64,
    pub access_modes: Vec<AccessMode>,
}

impl Volume {
    /// Volume name for an export id
    pub fn name_for_export(export_id: &str) -> String {
        export_id.to_lowercase()
    }

    /// The backend identifier embedded in a volume name
    pub fn backend_suffix(name: &str) -> &str {
        name.rsplit('.').next().unwrap_or(name)
    }
}

/// Status of a claim as seen by users
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimStatus {
    pub phase: ProvisionPhase,
    pub last_error: Option<String>,
    pub retry_count: u32,
    pub volume_name: Option<String>,
}

impl ClaimStatus {
    /// Status for a claim rejected before a record existed
    pub fn rejected(error: &Error) -> Self {
        Self {
            phase: ProvisionPhase::Failed,
            last_error: Some(error.to_string()),
            retry_count: 0,
            volume_name: None,
        }
    }
}

// =============================================================================
// Backend Types
// =============================================================================

/// A mount target as reported by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountTarget {
    pub id: String,
    pub availability_domain: String,
    pub subnet_id: String,
    /// Address clients mount exports from
    pub endpoint: String,
}

/// An export as reported by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Export {
    pub id: String,
    pub file_system_id: String,
    pub mount_target_id: String,
    pub path: String,
}

/// Parameters for creating an export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateExportRequest {
    pub display_name: String,
    pub availability_domain: String,
    pub capacity_bytes: i64,
    #[serde(default)]
    pub tags: Tags,
}

// =============================================================================
// File Storage Backend Port
// =============================================================================

/// Port for the remote file storage service
///
/// Create calls take an idempotency token: replaying a create with the same
/// token returns the resource created by the first call.
#[async_trait]
pub trait FileStorageBackend: Send + Sync {
    /// Get backend name
    fn backend_name(&self) -> &str;

    /// List availability domains mount targets can be created in
    async fn list_availability_domains(&self) -> Result<Vec<String>>;

    /// Create a mount target in a subnet
    async fn create_mount_target(
        &self,
        availability_domain: &str,
        subnet_id: &str,
        token: &str,
    ) -> Result<MountTarget>;

    /// Look up an existing mount target
    async fn get_mount_target(&self, id: &str) -> Result<MountTarget>;

    /// Create a file system export served by a mount target
    async fn create_export(
        &self,
        mount_target_id: &str,
        request: &CreateExportRequest,
        token: &str,
    ) -> Result<Export>;

    /// Delete an export; its file system is left in place
    async fn delete_export(&self, id: &str) -> Result<()>;

    /// Delete the file system an export served
    async fn delete_file_system(&self, id: &str) -> Result<()>;

    /// Delete a mount target
    async fn delete_mount_target(&self, id: &str) -> Result<()>;

    /// Check if backend is healthy
    async fn health_check(&self) -> Result<bool>;
}

// =============================================================================
// Provision Store Port
// =============================================================================

/// Port for persisting provision records
///
/// `put` replaces a record atomically; readers observe either the old or the
/// new record, never a mix.
#[async_trait]
pub trait ProvisionStore: Send + Sync {
    /// Store (insert or replace) a record
    async fn put(&self, claim: &ClaimId, record: &ProvisionRecord) -> Result<()>;

    /// Get a record, failing with `NotFound` if absent
    async fn get(&self, claim: &ClaimId) -> Result<ProvisionRecord>;

    /// Delete a record; deleting an absent record succeeds
    async fn delete(&self, claim: &ClaimId) -> Result<()>;

    /// List all records
    async fn list(&self) -> Result<Vec<ProvisionRecord>>;

    /// Get a record if present
    async fn find(&self, claim: &ClaimId) -> Result<Option<ProvisionRecord>> {
        match self.get(claim).await {
            Ok(record) => Ok(Some(record)),
            Err(Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

// =============================================================================
// Claim Status Port
// =============================================================================

/// Port for surfacing results back to the cluster
#[async_trait]
pub trait ClaimStatusSink: Send + Sync {
    /// Publish a bound volume
    async fn publish_volume(&self, volume: &Volume) -> Result<()>;

    /// Remove a previously published volume
    async fn retract_volume(&self, claim: &ClaimId, volume_name: &str) -> Result<()>;

    /// Record the claim's provisioning status
    async fn update_status(&self, claim: &ClaimId, status: &ClaimStatus) -> Result<()>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type FileStorageBackendRef = Arc<dyn FileStorageBackend>;
pub type ProvisionStoreRef = Arc<dyn ProvisionStore>;
pub type ClaimStatusSinkRef = Arc<dyn ClaimStatusSink>;
