//! Admission and validation of claims
//!
//! Converts the raw storage class parameter map into
//! [`StorageClassParameters`] and checks the rest of a claim before it is
//! handed to the reconciler. Everything here is a pure check.

use crate::domain::ports::{AccessMode, AdmittedClaim, StorageClassParameters, VolumeClaimRequest};
use crate::domain::tags::{Tags, ADDITIONAL_TAGS_ANNOTATION};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use tracing::debug;

/// Parameter key selecting a subnet to create mount targets in
pub const SUBNET_ID_KEY: &str = "subnetId";

/// Parameter key selecting an existing mount target
pub const MOUNT_TARGET_ID_KEY: &str = "mountTargetId";

/// Legacy spelling of [`MOUNT_TARGET_ID_KEY`]
pub const MOUNT_TARGET_ID_ALIAS: &str = "mntTargetId";

/// Parse storage class parameters into exactly one provisioning mode
pub fn parse_parameters(parameters: &BTreeMap<String, String>) -> Result<StorageClassParameters> {
    let subnet_id = non_empty(parameters, SUBNET_ID_KEY)?;

    let mount_target_id = match (
        non_empty(parameters, MOUNT_TARGET_ID_KEY)?,
        non_empty(parameters, MOUNT_TARGET_ID_ALIAS)?,
    ) {
        (Some(a), Some(b)) if a != b => {
            return Err(Error::InvalidParameters(format!(
                "{} and {} disagree: {:?} vs {:?}",
                MOUNT_TARGET_ID_KEY, MOUNT_TARGET_ID_ALIAS, a, b
            )))
        }
        (Some(id), _) | (None, Some(id)) => Some(id),
        (None, None) => None,
    };

    for key in parameters.keys() {
        if ![SUBNET_ID_KEY, MOUNT_TARGET_ID_KEY, MOUNT_TARGET_ID_ALIAS].contains(&key.as_str()) {
            debug!(key = %key, "Ignoring unknown storage class parameter");
        }
    }

    match (subnet_id, mount_target_id) {
        (Some(_), Some(_)) => Err(Error::InvalidParameters(format!(
            "{} and {} are mutually exclusive",
            SUBNET_ID_KEY, MOUNT_TARGET_ID_KEY
        ))),
        (Some(subnet_id), None) => Ok(StorageClassParameters::Subnet { subnet_id }),
        (None, Some(mount_target_id)) => Ok(StorageClassParameters::MountTarget { mount_target_id }),
        (None, None) => Ok(StorageClassParameters::Automatic),
    }
}

fn non_empty(parameters: &BTreeMap<String, String>, key: &str) -> Result<Option<String>> {
    match parameters.get(key) {
        None => Ok(None),
        Some(value) if value.trim().is_empty() => Err(Error::InvalidParameters(format!(
            "{} must not be empty",
            key
        ))),
        Some(value) => Ok(Some(value.trim().to_string())),
    }
}

/// Validates claims against the provisioner's rules
#[derive(Debug, Clone, Default)]
pub struct Admission {
    /// Tags applied to every export; claim tags override them
    default_tags: Tags,
}

impl Admission {
    pub fn new(default_tags: Tags) -> Self {
        Self { default_tags }
    }

    /// Admit a claim or reject it with `InvalidParameters`
    pub fn validate(&self, request: &VolumeClaimRequest) -> Result<AdmittedClaim> {
        let parameters = parse_parameters(&request.parameters)?;

        if request.capacity_bytes <= 0 {
            return Err(Error::InvalidParameters(format!(
                "requested capacity must be positive, got {}",
                request.capacity_bytes
            )));
        }

        if request.access_modes.is_empty() {
            return Err(Error::InvalidParameters(
                "claim must request at least one access mode".into(),
            ));
        }
        let access_modes = request
            .access_modes
            .iter()
            .map(|mode| mode.parse::<AccessMode>())
            .collect::<Result<Vec<_>>>()?;

        let claim_tags = request
            .annotations
            .get(ADDITIONAL_TAGS_ANNOTATION)
            .map(|value| Tags::parse(value))
            .transpose()?
            .unwrap_or_default();

        debug!(
            claim = %request.id,
            mode = %parameters,
            capacity_bytes = request.capacity_bytes,
            "Claim admitted"
        );

        Ok(AdmittedClaim {
            request: request.clone(),
            parameters,
            access_modes,
            tags: self.default_tags.clone().merged_with(&claim_tags),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::ClaimId;
    use assert_matches::assert_matches;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn request(parameters: BTreeMap<String, String>) -> VolumeClaimRequest {
        VolumeClaimRequest {
            id: ClaimId::new("default", "nginx-data"),
            uid: Some("uid-1".into()),
            storage_class: "oci-fss".into(),
            capacity_bytes: 1 << 30,
            access_modes: vec!["ReadWriteMany".into()],
            zone: None,
            annotations: BTreeMap::new(),
            parameters,
        }
    }

    #[test]
    fn test_accepts_each_single_form() {
        assert_eq!(
            parse_parameters(&params(&[("subnetId", "ocid1.subnet.oc1.phx.a")])).unwrap(),
            StorageClassParameters::Subnet {
                subnet_id: "ocid1.subnet.oc1.phx.a".into()
            }
        );
        assert_eq!(
            parse_parameters(&params(&[("mountTargetId", "mt-123")])).unwrap(),
            StorageClassParameters::MountTarget {
                mount_target_id: "mt-123".into()
            }
        );
        assert_eq!(
            parse_parameters(&params(&[])).unwrap(),
            StorageClassParameters::Automatic
        );
    }

    #[test]
    fn test_rejects_combination() {
        let result = parse_parameters(&params(&[
            ("subnetId", "ocid1.subnet.oc1.phx.a"),
            ("mountTargetId", "mt-123"),
        ]));
        assert_matches!(result, Err(Error::InvalidParameters(_)));

        let result = parse_parameters(&params(&[
            ("subnetId", "ocid1.subnet.oc1.phx.a"),
            ("mntTargetId", "mt-123"),
        ]));
        assert_matches!(result, Err(Error::InvalidParameters(_)));
    }

    #[test]
    fn test_legacy_alias() {
        assert_eq!(
            parse_parameters(&params(&[("mntTargetId", "mt-9")])).unwrap(),
            StorageClassParameters::MountTarget {
                mount_target_id: "mt-9".into()
            }
        );
        assert_matches!(
            parse_parameters(&params(&[("mntTargetId", "mt-9"), ("mountTargetId", "mt-8")])),
            Err(Error::InvalidParameters(_))
        );
    }

    #[test]
    fn test_rejects_empty_value() {
        assert_matches!(
            parse_parameters(&params(&[("subnetId", "  ")])),
            Err(Error::InvalidParameters(_))
        );
    }

    #[test]
    fn test_unknown_keys_ignored() {
        assert_eq!(
            parse_parameters(&params(&[("fsType", "nfs")])).unwrap(),
            StorageClassParameters::Automatic
        );
    }

    #[test]
    fn test_validate_capacity() {
        let admission = Admission::default();

        let mut req = request(params(&[]));
        req.capacity_bytes = 0;
        assert_matches!(admission.validate(&req), Err(Error::InvalidParameters(_)));

        req.capacity_bytes = -5;
        assert_matches!(admission.validate(&req), Err(Error::InvalidParameters(_)));
    }

    #[test]
    fn test_validate_access_modes() {
        let admission = Admission::default();

        let mut req = request(params(&[]));
        req.access_modes = vec![];
        assert_matches!(admission.validate(&req), Err(Error::InvalidParameters(_)));

        req.access_modes = vec!["ReadWriteOncePod".into()];
        assert_matches!(admission.validate(&req), Err(Error::InvalidParameters(_)));

        req.access_modes = vec!["ReadWriteOnce".into(), "ReadOnlyMany".into()];
        let admitted = admission.validate(&req).unwrap();
        assert_eq!(
            admitted.access_modes,
            vec![AccessMode::ReadWriteOnce, AccessMode::ReadOnlyMany]
        );
    }

    #[test]
    fn test_validate_merges_tags() {
        let admission = Admission::new(Tags::parse("env=prod").unwrap());

        let mut req = request(params(&[("subnetId", "ocid1.subnet.oc1.phx.a")]));
        req.annotations.insert(
            ADDITIONAL_TAGS_ANNOTATION.into(),
            "env=dev,ops.team=fss".into(),
        );

        let admitted = admission.validate(&req).unwrap();
        assert_eq!(admitted.tags.freeform.get("env").map(String::as_str), Some("dev"));
        assert!(admitted.tags.defined.contains_key("ops"));

        req.annotations
            .insert(ADDITIONAL_TAGS_ANNOTATION.into(), "broken".into());
        assert_matches!(admission.validate(&req), Err(Error::InvalidParameters(_)));
    }
}
