//! Expansion configuration: process-wide defaults, partial templates,
//! and the fully-resolved per-claim configuration.

use std::time::Duration;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ExpansionError};
use crate::quantity::{self, GIB};

/// Parse a percentage string (`NN%`) into a value in [0, 100].
pub fn parse_percentage(input: &str) -> Result<f64, ConfigError> {
    let s = input.trim();
    let Some(number) = s.strip_suffix('%') else {
        return Err(ConfigError::MissingPercentSign(input.to_string()));
    };
    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidPercentage(input.to_string()))?;
    if !value.is_finite() || !(0.0..=100.0).contains(&value) {
        return Err(ConfigError::PercentageOutOfRange(input.to_string()));
    }
    Ok(value)
}

/// Parse a human duration string (`15m`, `1h30m`, `90s`).
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(input.trim()).map_err(|e| ConfigError::InvalidDuration {
        value: input.to_string(),
        reason: e.to_string(),
    })
}

/// Parse an RFC-3339 timestamp.
pub fn parse_timestamp(input: &str) -> Result<DateTime<Utc>, ConfigError> {
    DateTime::parse_from_rfc3339(input.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ConfigError::InvalidTimestamp {
            value: input.to_string(),
            reason: e.to_string(),
        })
}

/// Parse a strict boolean (`true` / `false`, case-insensitive).
pub fn parse_bool(input: &str) -> Result<bool, ConfigError> {
    match input.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(ConfigError::InvalidBool(input.to_string())),
    }
}

/// Process-wide expansion defaults, assembled once at startup and shared
/// immutably with every control loop.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalConfig {
    /// Storage usage percentage that triggers expansion.
    pub threshold: f64,
    /// Inode usage percentage that triggers expansion.
    pub inodes_threshold: f64,
    /// Expansion delta: a percentage (`10%`) or a quantity (`10Gi`).
    pub increase: String,
    /// Minimum time between expansions of one claim.
    pub cooldown: Duration,
    /// Minimum expansion delta in bytes.
    pub min_scale_up: i64,
    /// Ceiling in bytes; zero means unbounded.
    pub max_size: i64,
}

pub const DEFAULT_THRESHOLD: f64 = 80.0;
pub const DEFAULT_INODES_THRESHOLD: f64 = 90.0;
pub const DEFAULT_INCREASE: &str = "10%";
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_MIN_SCALE_UP: i64 = GIB;

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            inodes_threshold: DEFAULT_INODES_THRESHOLD,
            increase: DEFAULT_INCREASE.to_string(),
            cooldown: DEFAULT_COOLDOWN,
            min_scale_up: DEFAULT_MIN_SCALE_UP,
            max_size: 0,
        }
    }
}

impl GlobalConfig {
    /// Build a global config from startup flags, falling back to the
    /// defaults for unset (zero / empty) values.
    pub fn from_flags(
        threshold: f64,
        inodes_threshold: f64,
        increase: &str,
        cooldown: Duration,
        min_scale_up: i64,
        max_size: i64,
    ) -> Self {
        let defaults = Self::default();
        Self {
            threshold: if threshold > 0.0 { threshold } else { defaults.threshold },
            inodes_threshold: if inodes_threshold > 0.0 {
                inodes_threshold
            } else {
                defaults.inodes_threshold
            },
            increase: if increase.is_empty() {
                defaults.increase
            } else {
                increase.to_string()
            },
            cooldown: if cooldown > Duration::ZERO { cooldown } else { defaults.cooldown },
            min_scale_up: if min_scale_up > 0 { min_scale_up } else { defaults.min_scale_up },
            max_size: max_size.max(0),
        }
    }
}

/// A partial expansion configuration, as carried by policy and group
/// custom resources. Every field is optional; unset fields fall through
/// to the global defaults when the template is materialized.
///
/// Quantities and durations are strings validated with the same parsers
/// the annotations use, so one grammar covers every configuration
/// surface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigTemplate {
    /// Master switch for auto-expansion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Storage usage percentage that triggers expansion, e.g. `80%`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<String>,

    /// Inode usage percentage that triggers expansion, e.g. `90%`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inodes_threshold: Option<String>,

    /// Expansion delta: percentage or quantity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub increase: Option<String>,

    /// Size ceiling, e.g. `100Gi`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<String>,

    /// Minimum expansion delta, e.g. `1Gi`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_scale_up: Option<String>,

    /// Minimum time between expansions, e.g. `15m`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown: Option<String>,
}

impl ConfigTemplate {
    /// Materialize the template over the global defaults.
    ///
    /// Malformed field values are surfaced, not silently defaulted; a bad
    /// policy leaves its claims unmanaged rather than half-configured.
    pub fn materialize(&self, global: &GlobalConfig) -> Result<EffectiveConfig, ConfigError> {
        Ok(EffectiveConfig {
            enabled: self.enabled.unwrap_or(true),
            threshold: match &self.threshold {
                Some(s) => parse_percentage(s)?,
                None => global.threshold,
            },
            inodes_threshold: match &self.inodes_threshold {
                Some(s) => parse_percentage(s)?,
                None => global.inodes_threshold,
            },
            increase: self.increase.clone().unwrap_or_else(|| global.increase.clone()),
            max_size: match &self.max_size {
                Some(s) => quantity::parse_quantity(s)?,
                None => global.max_size,
            },
            min_scale_up: match &self.min_scale_up {
                Some(s) => quantity::parse_quantity(s)?,
                None => global.min_scale_up,
            },
            cooldown: match &self.cooldown {
                Some(s) => parse_duration(s)?,
                None => global.cooldown,
            },
            last_expansion: None,
        })
    }

    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// The fully-resolved expansion configuration for one claim, valid for
/// one reconciliation cycle. Derived, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    pub enabled: bool,
    pub threshold: f64,
    pub inodes_threshold: f64,
    pub increase: String,
    pub max_size: i64,
    pub min_scale_up: i64,
    pub cooldown: Duration,
    pub last_expansion: Option<DateTime<Utc>>,
}

impl EffectiveConfig {
    /// A config carrying the global values verbatim.
    pub fn from_global(global: &GlobalConfig) -> Self {
        Self {
            enabled: true,
            threshold: global.threshold,
            inodes_threshold: global.inodes_threshold,
            increase: global.increase.clone(),
            max_size: global.max_size,
            min_scale_up: global.min_scale_up,
            cooldown: global.cooldown,
            last_expansion: None,
        }
    }

    /// True while the claim is still inside its cooldown window.
    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        match self.last_expansion {
            // A last-expansion in the future means clock skew; stay in
            // cooldown rather than expanding on bad data.
            Some(last) => match now.signed_duration_since(last).to_std() {
                Ok(elapsed) => elapsed < self.cooldown,
                Err(_) => true,
            },
            None => false,
        }
    }

    /// Compute the new requested size for a claim currently at
    /// `current_bytes`.
    ///
    /// The delta is `increase` (percentage of current, or an absolute
    /// quantity), raised to at least `min_scale_up`, and the result is
    /// rounded up to the next Gi boundary. Fails when the rounded size
    /// would exceed a non-zero `max_size`.
    pub fn plan_expansion(&self, current_bytes: i64) -> Result<i64, ExpansionError> {
        let increase = self.increase.trim();
        let delta = if increase.ends_with('%') {
            let percent = parse_percentage(increase)?;
            ((current_bytes as f64) * percent / 100.0) as i64
        } else {
            quantity::parse_quantity(increase)?
        };

        let delta = delta.max(self.min_scale_up);
        let new = quantity::ceil_to_gib(current_bytes + delta);

        if self.max_size > 0 && new > self.max_size {
            return Err(ExpansionError::ExceedsMaxSize {
                new: quantity::format_bytes(new),
                max: quantity::format_bytes(self.max_size),
            });
        }
        Ok(new)
    }
}
