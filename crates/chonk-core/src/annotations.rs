//! The claim annotation schema.
//!
//! Every per-claim override travels as an annotation under the
//! `pvc-chonker.io/` prefix. Parsing is strict: a malformed value makes
//! the whole claim unmanaged for the cycle instead of being silently
//! replaced with a default.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::config::{parse_bool, parse_duration, parse_percentage, parse_timestamp};
use crate::error::ConfigError;
use crate::quantity::parse_quantity;

pub const PREFIX: &str = "pvc-chonker.io/";

pub const ENABLED: &str = "pvc-chonker.io/enabled";
pub const THRESHOLD: &str = "pvc-chonker.io/threshold";
pub const INODES_THRESHOLD: &str = "pvc-chonker.io/inodes-threshold";
pub const INCREASE: &str = "pvc-chonker.io/increase";
pub const MAX_SIZE: &str = "pvc-chonker.io/max-size";
pub const MIN_SCALE_UP: &str = "pvc-chonker.io/min-scale-up";
pub const COOLDOWN: &str = "pvc-chonker.io/cooldown";
pub const LAST_EXPANSION: &str = "pvc-chonker.io/last-expansion";
pub const GROUP: &str = "pvc-chonker.io/group";

/// All keys the controller recognizes. A claim carrying any of these is
/// annotation-managed and must also carry `enabled: "true"`.
pub const RECOGNIZED: &[&str] = &[
    ENABLED,
    THRESHOLD,
    INODES_THRESHOLD,
    INCREASE,
    MAX_SIZE,
    MIN_SCALE_UP,
    COOLDOWN,
    LAST_EXPANSION,
    GROUP,
];

/// Per-claim overrides parsed out of the annotations. Each field is set
/// only when its annotation was present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClaimOverrides {
    pub enabled: Option<bool>,
    pub threshold: Option<f64>,
    pub inodes_threshold: Option<f64>,
    pub increase: Option<String>,
    pub max_size: Option<i64>,
    pub min_scale_up: Option<i64>,
    pub cooldown: Option<Duration>,
    pub last_expansion: Option<DateTime<Utc>>,
    pub group: Option<String>,
}

impl ClaimOverrides {
    /// True when no recognized annotation was present at all.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// True when the claim carries at least one configuration field.
    ///
    /// `last-expansion` and `group` are bookkeeping keys: the controller
    /// writes the former itself, and neither opts a claim into
    /// annotation management on its own.
    pub fn has_config_fields(&self) -> bool {
        self.enabled.is_some()
            || self.threshold.is_some()
            || self.inodes_threshold.is_some()
            || self.increase.is_some()
            || self.max_size.is_some()
            || self.min_scale_up.is_some()
            || self.cooldown.is_some()
    }
}

/// Parse the recognized annotations of a claim.
///
/// Returns the overrides that were present; any malformed value is an
/// error tagged with the offending key.
pub fn parse_claim_annotations(
    annotations: &BTreeMap<String, String>,
) -> Result<ClaimOverrides, ConfigError> {
    let mut overrides = ClaimOverrides::default();

    if let Some(raw) = annotations.get(ENABLED) {
        overrides.enabled =
            Some(parse_bool(raw).map_err(|e| ConfigError::for_annotation(ENABLED, e))?);
    }
    if let Some(raw) = annotations.get(THRESHOLD) {
        overrides.threshold =
            Some(parse_percentage(raw).map_err(|e| ConfigError::for_annotation(THRESHOLD, e))?);
    }
    if let Some(raw) = annotations.get(INODES_THRESHOLD) {
        overrides.inodes_threshold = Some(
            parse_percentage(raw).map_err(|e| ConfigError::for_annotation(INODES_THRESHOLD, e))?,
        );
    }
    if let Some(raw) = annotations.get(INCREASE) {
        // Validate eagerly; the string itself is kept since the delta
        // depends on the claim's current size.
        if raw.trim().ends_with('%') {
            parse_percentage(raw).map_err(|e| ConfigError::for_annotation(INCREASE, e))?;
        } else {
            parse_quantity(raw).map_err(|e| ConfigError::for_annotation(INCREASE, e))?;
        }
        overrides.increase = Some(raw.trim().to_string());
    }
    if let Some(raw) = annotations.get(MAX_SIZE) {
        overrides.max_size =
            Some(parse_quantity(raw).map_err(|e| ConfigError::for_annotation(MAX_SIZE, e))?);
    }
    if let Some(raw) = annotations.get(MIN_SCALE_UP) {
        overrides.min_scale_up =
            Some(parse_quantity(raw).map_err(|e| ConfigError::for_annotation(MIN_SCALE_UP, e))?);
    }
    if let Some(raw) = annotations.get(COOLDOWN) {
        overrides.cooldown =
            Some(parse_duration(raw).map_err(|e| ConfigError::for_annotation(COOLDOWN, e))?);
    }
    if let Some(raw) = annotations.get(LAST_EXPANSION) {
        overrides.last_expansion =
            Some(parse_timestamp(raw).map_err(|e| ConfigError::for_annotation(LAST_EXPANSION, e))?);
    }
    if let Some(raw) = annotations.get(GROUP) {
        overrides.group = Some(raw.trim().to_string());
    }

    Ok(overrides)
}

/// Render `now` the way the `last-expansion` annotation stores it.
pub fn format_last_expansion(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Secs, true)
}
