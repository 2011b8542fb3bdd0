//! Supporting types shared by every modelhub CRD

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
///
/// Shared by Model, ModelSource, ModelSync, ModelReference and the external
/// Dataset status, so mirrored conditions keep their exact shape.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., Ready, CredentialsReady)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    #[serde(default)]
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// Shorthand for a `True` condition
    pub fn truthy(
        type_: impl Into<String>,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(type_, ConditionStatus::True, reason, message)
    }

    /// Shorthand for a `False` condition
    pub fn falsy(
        type_: impl Into<String>,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(type_, ConditionStatus::False, reason, message)
    }

    /// True when this condition has status `True`
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Operator for label selector requirements
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum LabelSelectorOperator {
    /// Label value must be in the specified set
    In,
    /// Label value must not be in the specified set
    NotIn,
    /// Label must exist (value ignored)
    Exists,
    /// Label must not exist (value ignored)
    DoesNotExist,
}

impl LabelSelectorOperator {
    /// Check if a label value satisfies this operator against `values`
    pub fn matches(&self, label_value: Option<&str>, values: &[String]) -> bool {
        match self {
            Self::In => label_value.is_some_and(|v| values.iter().any(|req| req == v)),
            Self::NotIn => label_value.is_none_or(|v| !values.iter().any(|req| req == v)),
            Self::Exists => label_value.is_some(),
            Self::DoesNotExist => label_value.is_none(),
        }
    }
}

/// A single label selector requirement
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelectorRequirement {
    /// The label key that the selector applies to
    pub key: String,

    /// Operator representing the relationship between label and values
    pub operator: LabelSelectorOperator,

    /// Values for `In`/`NotIn`; empty for `Exists`/`DoesNotExist`
    #[serde(default)]
    pub values: Vec<String>,
}

impl LabelSelectorRequirement {
    /// Check if a label set matches this requirement
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key).map(|s| s.as_str());
        self.operator.matches(value, &self.values)
    }
}

/// Selects namespaces by their labels
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceSelector {
    /// Exact key/value pairs; all must match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_labels: Option<BTreeMap<String, String>>,

    /// Set-based requirements; all must match
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

impl NamespaceSelector {
    /// Check if namespace labels match this selector
    pub fn matches(&self, namespace_labels: &BTreeMap<String, String>) -> bool {
        if let Some(match_labels) = &self.match_labels {
            for (key, value) in match_labels {
                if namespace_labels.get(key) != Some(value) {
                    return false;
                }
            }
        }

        self.match_expressions
            .iter()
            .all(|req| req.matches(namespace_labels))
    }

    /// Check if this selector is empty (matches everything)
    pub fn is_empty(&self) -> bool {
        self.match_labels.as_ref().is_none_or(|m| m.is_empty())
            && self.match_expressions.is_empty()
    }
}

/// Reference to a Secret in the same namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct SecretRef {
    /// Secret name
    pub name: String,
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
    fn condition_constructors_set_status() {
        let ready = Condition::truthy("Ready", "Reconciled", "all versions synced");
        assert!(ready.is_true());
        assert_eq!(ready.type_, "Ready");

        let not_ready = Condition::falsy("Ready", "ModelSourceNotFound", "source hf missing");
        assert!(!not_ready.is_true());
        assert_eq!(not_ready.status, ConditionStatus::False);
    }

    #[test]
    fn condition_serializes_with_kubernetes_field_names() {
        let c = Condition::truthy("SyncReady", "DatasetReady", "");
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["type"], "SyncReady");
        assert_eq!(json["status"], "True");
        assert!(json.get("lastTransitionTime").is_some());
    }

    #[test]
    fn operators_follow_kubernetes_semantics() {
        let values = vec!["ml".to_string(), "research".to_string()];
        assert!(LabelSelectorOperator::In.matches(Some("ml"), &values));
        assert!(!LabelSelectorOperator::In.matches(None, &values));
        assert!(LabelSelectorOperator::NotIn.matches(Some("web"), &values));
        assert!(LabelSelectorOperator::NotIn.matches(None, &values));
        assert!(!LabelSelectorOperator::NotIn.matches(Some("ml"), &values));
        assert!(LabelSelectorOperator::Exists.matches(Some(""), &[]));
        assert!(LabelSelectorOperator::DoesNotExist.matches(None, &[]));
    }

    #[test]
    fn empty_selector_matches_every_namespace() {
        let selector = NamespaceSelector::default();
        assert!(selector.is_empty());
        assert!(selector.matches(&BTreeMap::new()));
        assert!(selector.matches(&labels(&[("team", "ml")])));
    }

    #[test]
    fn selector_requires_all_labels_and_expressions() {
        let selector = NamespaceSelector {
            match_labels: Some(labels(&[("team", "ml")])),
            match_expressions: vec![LabelSelectorRequirement {
                key: "env".to_string(),
                operator: LabelSelectorOperator::NotIn,
                values: vec!["prod".to_string()],
            }],
        };
        assert!(!selector.is_empty());
        assert!(selector.matches(&labels(&[("team", "ml"), ("env", "dev")])));
        assert!(!selector.matches(&labels(&[("team", "ml"), ("env", "prod")])));
        assert!(!selector.matches(&labels(&[("team", "web")])));
    }
}
