//! Text-exposition parsing for the volume stat families.
//!
//! Only four families matter, matched by exact name. Lines for other
//! metrics are skipped wholesale; a malformed line inside a tracked
//! family is an error, because a dropped sample would silently exempt a
//! claim from expansion.

use thiserror::Error;

pub const CAPACITY_BYTES: &str = "kubelet_volume_stats_capacity_bytes";
pub const AVAILABLE_BYTES: &str = "kubelet_volume_stats_available_bytes";
pub const INODES: &str = "kubelet_volume_stats_inodes";
pub const INODES_USED: &str = "kubelet_volume_stats_inodes_used";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatFamily {
    CapacityBytes,
    AvailableBytes,
    Inodes,
    InodesUsed,
}

impl StatFamily {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            CAPACITY_BYTES => Some(StatFamily::CapacityBytes),
            AVAILABLE_BYTES => Some(StatFamily::AvailableBytes),
            INODES => Some(StatFamily::Inodes),
            INODES_USED => Some(StatFamily::InodesUsed),
            _ => None,
        }
    }
}

/// One parsed sample of a tracked family.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeSample {
    pub namespace: String,
    pub claim: String,
    pub family: StatFamily,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("malformed metric line: {0:?}")]
    MalformedLine(String),

    #[error("invalid value {value:?} on line {line:?}")]
    InvalidValue { line: String, value: String },
}

/// Extract every tracked volume sample from a metrics payload.
///
/// Samples missing the `namespace` or `persistentvolumeclaim` label are
/// skipped (node-local volumes report without them).
pub fn parse_volume_samples(payload: &str) -> Result<Vec<VolumeSample>, ParseError> {
    let mut samples = Vec::new();

    for raw in payload.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let name_end = line
            .find(|c: char| c == '{' || c.is_whitespace())
            .unwrap_or(line.len());
        let Some(family) = StatFamily::from_name(&line[..name_end]) else {
            continue;
        };

        let (labels, value_text) = split_labels_and_value(&line[name_end..])
            .ok_or_else(|| ParseError::MalformedLine(raw.to_string()))?;

        let mut namespace = None;
        let mut claim = None;
        for (key, value) in parse_labels(labels) {
            match key {
                "namespace" => namespace = Some(value),
                "persistentvolumeclaim" => claim = Some(value),
                _ => {}
            }
        }
        let (Some(namespace), Some(claim)) = (namespace, claim) else {
            continue;
        };

        let value: f64 = value_text
            .parse()
            .map_err(|_| ParseError::InvalidValue {
                line: raw.to_string(),
                value: value_text.to_string(),
            })?;
        if !value.is_finite() || value < 0.0 {
            return Err(ParseError::InvalidValue {
                line: raw.to_string(),
                value: value_text.to_string(),
            });
        }

        samples.push(VolumeSample {
            namespace: namespace.to_string(),
            claim: claim.to_string(),
            family,
            value: value as i64,
        });
    }

    Ok(samples)
}

/// Split the remainder of a metric line into its label block and value.
fn split_labels_and_value(rest: &str) -> Option<(&str, &str)> {
    let rest = rest.trim_start();
    if let Some(after_brace) = rest.strip_prefix('{') {
        let close = after_brace.find('}')?;
        let labels = &after_brace[..close];
        let value = after_brace[close + 1..].split_whitespace().next()?;
        Some((labels, value))
    } else {
        // No labels; the sample cannot name a claim, but the line is
        // still well-formed.
        let value = rest.split_whitespace().next()?;
        Some(("", value))
    }
}

/// Iterate `key="value"` pairs inside a label block.
fn parse_labels(block: &str) -> impl Iterator<Item = (&str, &str)> {
    block.split(',').filter_map(|pair| {
        let (key, quoted) = pair.split_once('=')?;
        let value = quoted.trim().strip_prefix('"')?.strip_suffix('"')?;
        Some((key.trim(), value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = r#"
# HELP kubelet_volume_stats_capacity_bytes Capacity in bytes of the volume
# TYPE kubelet_volume_stats_capacity_bytes gauge
kubelet_volume_stats_capacity_bytes{namespace="prod",persistentvolumeclaim="data"} 1.073741824e+10
kubelet_volume_stats_available_bytes{namespace="prod",persistentvolumeclaim="data"} 1073741824
kubelet_volume_stats_inodes{namespace="prod",persistentvolumeclaim="data"} 65536
kubelet_volume_stats_inodes_used{namespace="prod",persistentvolumeclaim="data"} 62000
kubelet_volume_stats_capacity_bytes{namespace="dev",persistentvolumeclaim="scratch"} 5368709120
some_other_metric{foo="bar"} 42
"#;

    #[test]
    fn extracts_tracked_families() {
        let samples = parse_volume_samples(PAYLOAD).unwrap();
        assert_eq!(samples.len(), 5);

        let capacity = samples
            .iter()
            .find(|s| s.family == StatFamily::CapacityBytes && s.namespace == "prod")
            .unwrap();
        assert_eq!(capacity.claim, "data");
        assert_eq!(capacity.value, 10_737_418_240);
    }

    #[test]
    fn scientific_notation_values_parse() {
        let samples = parse_volume_samples(
            "kubelet_volume_stats_inodes{namespace=\"a\",persistentvolumeclaim=\"b\"} 6.5536e+04\n",
        )
        .unwrap();
        assert_eq!(samples[0].value, 65536);
    }

    #[test]
    fn untracked_metrics_are_skipped_even_if_malformed() {
        let samples = parse_volume_samples("garbage_metric{unterminated 12\n").unwrap();
        assert!(samples.is_empty());
    }

    #[test]
    fn samples_without_claim_labels_are_skipped() {
        let payload =
            "kubelet_volume_stats_capacity_bytes{device=\"sda\"} 100\n";
        assert!(parse_volume_samples(payload).unwrap().is_empty());
    }

    #[test]
    fn malformed_tracked_line_is_an_error() {
        let payload = "kubelet_volume_stats_capacity_bytes{namespace=\"a\",persistentvolumeclaim=\"b\"}\n";
        assert!(parse_volume_samples(payload).is_err());
    }

    #[test]
    fn negative_value_is_an_error() {
        let payload =
            "kubelet_volume_stats_inodes{namespace=\"a\",persistentvolumeclaim=\"b\"} -5\n";
        assert!(matches!(
            parse_volume_samples(payload),
            Err(ParseError::InvalidValue { .. })
        ));
    }

    #[test]
    fn non_numeric_value_is_an_error() {
        let payload =
            "kubelet_volume_stats_inodes{namespace=\"a\",persistentvolumeclaim=\"b\"} lots\n";
        assert!(parse_volume_samples(payload).is_err());
    }
}
