//! The three-level policy merge.
//!
//! Precedence, highest first: per-claim annotations, the first matching
//! namespace policy, the global defaults. The merge is per-field: a
//! claim can pin its threshold by annotation while a policy supplies the
//! increase. The merge is a pure function; callers list the claim's
//! namespace policies, filter them by selector, and hand the surviving
//! templates in stable name order.

use std::collections::BTreeMap;

use crate::annotations::{self, parse_claim_annotations};
use crate::config::{ConfigTemplate, EffectiveConfig, GlobalConfig};
use crate::error::ConfigError;

/// Outcome of resolving a claim's configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The claim is managed; expansion decisions use this config.
    Managed(EffectiveConfig),
    /// The claim opted out (`enabled: "false"` annotation, or a policy
    /// template with `enabled: false`).
    Disabled(EffectiveConfig),
    /// No annotation opted in and no policy matched.
    Unmanaged,
}

impl Resolution {
    /// The effective config, if the claim is actively managed.
    pub fn managed(self) -> Option<EffectiveConfig> {
        match self {
            Resolution::Managed(cfg) => Some(cfg),
            _ => None,
        }
    }
}

/// Resolve the effective configuration for one claim.
///
/// `matching_policies` must contain only templates whose selectors match
/// the claim, ordered by policy name; only the first is consulted.
/// Parse errors anywhere in the claim's annotations or the winning
/// template are surfaced; the caller treats them as "unmanaged this
/// cycle" and never mutates the claim.
pub fn resolve(
    claim_annotations: &BTreeMap<String, String>,
    matching_policies: &[&ConfigTemplate],
    global: &GlobalConfig,
) -> Result<Resolution, ConfigError> {
    // Explicit opt-out wins over everything, even malformed siblings.
    if let Some(raw) = claim_annotations.get(annotations::ENABLED) {
        if raw.trim().eq_ignore_ascii_case("false") {
            let mut cfg = EffectiveConfig::from_global(global);
            cfg.enabled = false;
            return Ok(Resolution::Disabled(cfg));
        }
    }

    let overrides = parse_claim_annotations(claim_annotations)?;

    let Some(template) = matching_policies.first() else {
        // No policy in play: the claim manages itself by annotation, and
        // the master switch must be present and true.
        if !overrides.has_config_fields() {
            return Ok(Resolution::Unmanaged);
        }
        if overrides.enabled != Some(true) {
            return Ok(Resolution::Unmanaged);
        }
        let global_cfg = EffectiveConfig::from_global(global);
        return Ok(Resolution::Managed(overlay(&overrides, global_cfg)));
    };

    // Policy-managed: materialize policy ?? global, then lay the claim's
    // own annotations on top, field by field.
    let base = template.materialize(global)?;
    let enabled = overrides.enabled.unwrap_or(base.enabled);
    if !enabled {
        let mut cfg = overlay(&overrides, base);
        cfg.enabled = false;
        return Ok(Resolution::Disabled(cfg));
    }
    Ok(Resolution::Managed(overlay(&overrides, base)))
}

/// Apply annotation overrides on top of an already-materialized config.
fn overlay(overrides: &annotations::ClaimOverrides, base: EffectiveConfig) -> EffectiveConfig {
    EffectiveConfig {
        enabled: true,
        threshold: overrides.threshold.unwrap_or(base.threshold),
        inodes_threshold: overrides.inodes_threshold.unwrap_or(base.inodes_threshold),
        increase: overrides.increase.clone().unwrap_or(base.increase),
        max_size: overrides.max_size.unwrap_or(base.max_size),
        min_scale_up: overrides.min_scale_up.unwrap_or(base.min_scale_up),
        cooldown: overrides.cooldown.unwrap_or(base.cooldown),
        last_expansion: overrides.last_expansion,
    }
}
