//! Kubernetes-style quantity strings and byte arithmetic.
//!
//! Storage sizes travel as quantity strings (`10Gi`, `500M`, `1.5Ti`) in
//! claim specs, annotations, and policy templates. This module converts
//! them to and from byte counts and provides the Gi-boundary rounding the
//! expansion arithmetic relies on.

use crate::error::ConfigError;

/// One binary gibibyte.
pub const GIB: i64 = 1 << 30;

const BINARY_SUFFIXES: &[(&str, i64)] = &[
    ("Ki", 1 << 10),
    ("Mi", 1 << 20),
    ("Gi", 1 << 30),
    ("Ti", 1 << 40),
    ("Pi", 1 << 50),
    ("Ei", 1 << 60),
];

const DECIMAL_SUFFIXES: &[(&str, i64)] = &[
    ("k", 1_000),
    ("K", 1_000),
    ("M", 1_000_000),
    ("G", 1_000_000_000),
    ("T", 1_000_000_000_000),
    ("P", 1_000_000_000_000_000),
    ("E", 1_000_000_000_000_000_000),
];

/// Parse a quantity string into bytes.
///
/// Accepts binary suffixes (`Ki`..`Ei`), decimal suffixes (`k`/`K`..`E`),
/// and bare integers. Fractional mantissas (`1.5Gi`) round up to the next
/// whole byte. Negative values are rejected.
pub fn parse_quantity(input: &str) -> Result<i64, ConfigError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(invalid(input, "empty string"));
    }

    let (mantissa, multiplier) = split_suffix(s);
    if mantissa.is_empty() {
        return Err(invalid(input, "missing numeric value"));
    }

    // Fast path: whole number of units.
    if let Ok(units) = mantissa.parse::<i64>() {
        if units < 0 {
            return Err(invalid(input, "quantity must not be negative"));
        }
        return units
            .checked_mul(multiplier)
            .ok_or_else(|| invalid(input, "value overflows"));
    }

    let value: f64 = mantissa
        .parse()
        .map_err(|_| invalid(input, "not a number"))?;
    if !value.is_finite() {
        return Err(invalid(input, "not a finite number"));
    }
    if value < 0.0 {
        return Err(invalid(input, "quantity must not be negative"));
    }

    let bytes = (value * multiplier as f64).ceil();
    if bytes > i64::MAX as f64 {
        return Err(invalid(input, "value overflows"));
    }
    Ok(bytes as i64)
}

/// Format a byte count as the shortest exact quantity string.
///
/// `12884901888` renders as `12Gi`; sizes with no exact binary suffix
/// fall back to a plain byte count.
pub fn format_bytes(bytes: i64) -> String {
    if bytes == 0 {
        return "0".to_string();
    }
    for (suffix, unit) in BINARY_SUFFIXES.iter().rev() {
        if bytes % unit == 0 {
            return format!("{}{}", bytes / unit, suffix);
        }
    }
    bytes.to_string()
}

/// Round up to the next whole Gi boundary.
///
/// Storage drivers quantize grants to at least Gi; requests that are not
/// Gi-aligned would be granted a different size than asked for, which
/// breaks convergence detection.
pub fn ceil_to_gib(bytes: i64) -> i64 {
    if bytes <= 0 {
        return 0;
    }
    ((bytes + GIB - 1) / GIB) * GIB
}

fn split_suffix(s: &str) -> (&str, i64) {
    for (suffix, unit) in BINARY_SUFFIXES {
        if let Some(mantissa) = s.strip_suffix(suffix) {
            return (mantissa, *unit);
        }
    }
    for (suffix, unit) in DECIMAL_SUFFIXES {
        if let Some(mantissa) = s.strip_suffix(suffix) {
            return (mantissa, *unit);
        }
    }
    (s, 1)
}

fn invalid(value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidQuantity {
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
