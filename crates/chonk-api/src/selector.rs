//! Label selector matching.
//!
//! Kubernetes semantics: `matchLabels` and every `matchExpressions`
//! requirement must all hold; an empty selector matches everything.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    /// Exact-match label requirements, AND-ed together.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,

    /// Expression requirements, AND-ed with `match_labels`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelectorRequirement {
    pub key: String,
    pub operator: SelectorOperator,
    /// Values for `In` / `NotIn`; ignored by the existence operators.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum SelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

impl LabelSelector {
    /// True when the selector matches the given label set.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        for (key, value) in &self.match_labels {
            if labels.get(key) != Some(value) {
                return false;
            }
        }
        self.match_expressions.iter().all(|req| req.matches(labels))
    }

    /// True when the selector has no requirements (matches everything).
    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }
}

impl LabelSelectorRequirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self.operator {
            SelectorOperator::In => labels
                .get(&self.key)
                .map_or(false, |v| self.values.contains(v)),
            SelectorOperator::NotIn => labels
                .get(&self.key)
                .map_or(true, |v| !self.values.contains(v)),
            SelectorOperator::Exists => labels.contains_key(&self.key),
            SelectorOperator::DoesNotExist => !labels.contains_key(&self.key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_selector_matches_everything() {
        let sel = LabelSelector::default();
        assert!(sel.matches(&BTreeMap::new()));
        assert!(sel.matches(&labels(&[("app", "db")])));
    }

    #[test]
    fn match_labels_are_anded() {
        let sel = LabelSelector {
            match_labels: labels(&[("app", "db"), ("tier", "storage")]),
            ..Default::default()
        };
        assert!(sel.matches(&labels(&[("app", "db"), ("tier", "storage"), ("x", "y")])));
        assert!(!sel.matches(&labels(&[("app", "db")])));
        assert!(!sel.matches(&labels(&[("app", "db"), ("tier", "web")])));
    }

    #[test]
    fn in_operator() {
        let sel = LabelSelector {
            match_expressions: vec![LabelSelectorRequirement {
                key: "env".into(),
                operator: SelectorOperator::In,
                values: vec!["prod".into(), "staging".into()],
            }],
            ..Default::default()
        };
        assert!(sel.matches(&labels(&[("env", "prod")])));
        assert!(!sel.matches(&labels(&[("env", "dev")])));
        assert!(!sel.matches(&BTreeMap::new()));
    }

    #[test]
    fn not_in_operator() {
        let sel = LabelSelector {
            match_expressions: vec![LabelSelectorRequirement {
                key: "env".into(),
                operator: SelectorOperator::NotIn,
                values: vec!["dev".into()],
            }],
            ..Default::default()
        };
        assert!(sel.matches(&labels(&[("env", "prod")])));
        assert!(sel.matches(&BTreeMap::new())); // absent key is "not in"
        assert!(!sel.matches(&labels(&[("env", "dev")])));
    }

    #[test]
    fn existence_operators() {
        let exists = LabelSelector {
            match_expressions: vec![LabelSelectorRequirement {
                key: "backup".into(),
                operator: SelectorOperator::Exists,
                values: vec![],
            }],
            ..Default::default()
        };
        assert!(exists.matches(&labels(&[("backup", "daily")])));
        assert!(!exists.matches(&BTreeMap::new()));

        let absent = LabelSelector {
            match_expressions: vec![LabelSelectorRequirement {
                key: "backup".into(),
                operator: SelectorOperator::DoesNotExist,
                values: vec![],
            }],
            ..Default::default()
        };
        assert!(absent.matches(&BTreeMap::new()));
        assert!(!absent.matches(&labels(&[("backup", "daily")])));
    }

    #[test]
    fn selector_deserializes_kubernetes_shape() {
        let json = r#"{
            "matchLabels": {"app": "db"},
            "matchExpressions": [
                {"key": "env", "operator": "In", "values": ["prod"]}
            ]
        }"#;
        let sel: LabelSelector = serde_json::from_str(json).unwrap();
        assert!(sel.matches(&labels(&[("app", "db"), ("env", "prod")])));
        assert!(!sel.matches(&labels(&[("app", "db"), ("env", "dev")])));
    }
}
