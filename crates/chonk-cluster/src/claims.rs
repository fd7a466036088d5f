//! Helpers for reading and mutating persistent volume claims.
//!
//! k8s-openapi models every field as optional; these helpers centralize
//! the unwrapping so the controllers read cleanly.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use chonk_core::annotations;
use chonk_core::quantity::{format_bytes, parse_quantity};
use chonk_core::ConfigError;

pub const STORAGE_RESOURCE: &str = "storage";

/// `namespace/name` cache key for a claim.
pub fn claim_key(claim: &PersistentVolumeClaim) -> String {
    format!(
        "{}/{}",
        claim.metadata.namespace.as_deref().unwrap_or_default(),
        claim.metadata.name.as_deref().unwrap_or_default()
    )
}

pub fn claim_name(claim: &PersistentVolumeClaim) -> &str {
    claim.metadata.name.as_deref().unwrap_or_default()
}

pub fn claim_namespace(claim: &PersistentVolumeClaim) -> &str {
    claim.metadata.namespace.as_deref().unwrap_or_default()
}

/// The claim's annotations, or an empty map when it has none.
pub fn claim_annotations(claim: &PersistentVolumeClaim) -> &BTreeMap<String, String> {
    static EMPTY: BTreeMap<String, String> = BTreeMap::new();
    claim.metadata.annotations.as_ref().unwrap_or(&EMPTY)
}

/// The claim's labels, or an empty map when it has none.
pub fn claim_labels(claim: &PersistentVolumeClaim) -> &BTreeMap<String, String> {
    static EMPTY: BTreeMap<String, String> = BTreeMap::new();
    claim.metadata.labels.as_ref().unwrap_or(&EMPTY)
}

/// Volume mode gate: unset means `Filesystem`.
pub fn is_filesystem_mode(claim: &PersistentVolumeClaim) -> bool {
    claim
        .spec
        .as_ref()
        .and_then(|s| s.volume_mode.as_deref())
        .map(|mode| mode == "Filesystem")
        .unwrap_or(true)
}

pub fn is_bound(claim: &PersistentVolumeClaim) -> bool {
    claim
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .map(|phase| phase == "Bound")
        .unwrap_or(false)
}

/// Any status condition marks the claim as having a resize in flight.
pub fn has_status_conditions(claim: &PersistentVolumeClaim) -> bool {
    claim
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|c| !c.is_empty())
        .unwrap_or(false)
}

pub fn storage_class_name(claim: &PersistentVolumeClaim) -> Option<&str> {
    claim.spec.as_ref()?.storage_class_name.as_deref()
}

/// The requested storage capacity in bytes.
pub fn requested_bytes(claim: &PersistentVolumeClaim) -> Result<i64, ConfigError> {
    let quantity = claim
        .spec
        .as_ref()
        .and_then(|s| s.resources.as_ref())
        .and_then(|r| r.requests.as_ref())
        .and_then(|requests| requests.get(STORAGE_RESOURCE));
    match quantity {
        Some(q) => parse_quantity(&q.0),
        None => Ok(0),
    }
}

/// The actual (granted) capacity in bytes, falling back to the request
/// when the status does not carry a capacity yet.
pub fn actual_bytes(claim: &PersistentVolumeClaim) -> Result<i64, ConfigError> {
    let quantity = claim
        .status
        .as_ref()
        .and_then(|s| s.capacity.as_ref())
        .and_then(|capacity| capacity.get(STORAGE_RESOURCE));
    match quantity {
        Some(q) => parse_quantity(&q.0),
        None => requested_bytes(claim),
    }
}

/// Set the requested storage capacity.
pub fn set_requested_bytes(claim: &mut PersistentVolumeClaim, bytes: i64) {
    let spec = claim.spec.get_or_insert_with(Default::default);
    let resources = spec.resources.get_or_insert_with(Default::default);
    let requests = resources.requests.get_or_insert_with(BTreeMap::new);
    requests.insert(STORAGE_RESOURCE.to_string(), Quantity(format_bytes(bytes)));
}

/// Stamp the `last-expansion` annotation with the given instant.
pub fn stamp_last_expansion(claim: &mut PersistentVolumeClaim, now: DateTime<Utc>) {
    let map = claim.metadata.annotations.get_or_insert_with(BTreeMap::new);
    map.insert(
        annotations::LAST_EXPANSION.to_string(),
        annotations::format_last_expansion(now),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        PersistentVolumeClaimSpec, PersistentVolumeClaimStatus, VolumeResourceRequirements,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn claim(requested: &str, phase: &str) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some("data".to_string()),
                namespace: Some("prod".to_string()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                resources: Some(VolumeResourceRequirements {
                    requests: Some(
                        [(STORAGE_RESOURCE.to_string(), Quantity(requested.to_string()))]
                            .into_iter()
                            .collect(),
                    ),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            status: Some(PersistentVolumeClaimStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn key_and_accessors() {
        let c = claim("10Gi", "Bound");
        assert_eq!(claim_key(&c), "prod/data");
        assert_eq!(claim_name(&c), "data");
        assert_eq!(claim_namespace(&c), "prod");
    }

    #[test]
    fn volume_mode_defaults_to_filesystem() {
        let mut c = claim("10Gi", "Bound");
        assert!(is_filesystem_mode(&c));

        c.spec.as_mut().unwrap().volume_mode = Some("Block".to_string());
        assert!(!is_filesystem_mode(&c));

        c.spec.as_mut().unwrap().volume_mode = Some("Filesystem".to_string());
        assert!(is_filesystem_mode(&c));
    }

    #[test]
    fn phase_gate() {
        assert!(is_bound(&claim("10Gi", "Bound")));
        assert!(!is_bound(&claim("10Gi", "Pending")));
        assert!(!is_bound(&claim("10Gi", "Lost")));
    }

    #[test]
    fn requested_bytes_parses_quantity() {
        let c = claim("10Gi", "Bound");
        assert_eq!(requested_bytes(&c).unwrap(), 10 << 30);
    }

    #[test]
    fn actual_falls_back_to_request() {
        let c = claim("10Gi", "Bound");
        assert_eq!(actual_bytes(&c).unwrap(), 10 << 30);
    }

    #[test]
    fn set_requested_round_trips() {
        let mut c = claim("10Gi", "Bound");
        set_requested_bytes(&mut c, 12 << 30);
        assert_eq!(requested_bytes(&c).unwrap(), 12 << 30);
    }

    #[test]
    fn stamp_writes_parseable_annotation() {
        let mut c = claim("10Gi", "Bound");
        stamp_last_expansion(&mut c, Utc::now());
        let parsed =
            chonk_core::annotations::parse_claim_annotations(claim_annotations(&c)).unwrap();
        assert!(parsed.last_expansion.is_some());
    }
}
