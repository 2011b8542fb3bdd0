//! ModelReference CRD types

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;

/// Condition type reporting whether the alias points at a real version
pub const RESOLVED: &str = "Resolved";

/// An alias that resolves to a concrete model version.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "modelhub.dev",
    version = "v1alpha1",
    kind = "ModelReference",
    plural = "modelreferences",
    shortname = "mref",
    namespaced,
    status = "ModelReferenceStatus",
    printcolumn = r#"{"name":"Model","type":"string","jsonPath":".spec.modelName"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".status.resolvedVersion"}"#,
    printcolumn = r#"{"name":"Dataset","type":"string","jsonPath":".status.resolvedDataset"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ModelReferenceSpec {
    /// Model in the same namespace
    pub model_name: String,

    /// Version of that model
    pub version: String,

    /// Friendly name for the reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

/// Observed status of a ModelReference
///
/// Empty fields are serialized too: status is written as a merge patch, and
/// an omitted key would leave the stale server value in place.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelReferenceStatus {
    /// Version the alias resolved to
    #[serde(default)]
    pub resolved_version: Option<String>,

    /// Owned dataset backing the resolved version
    #[serde(default)]
    pub resolved_dataset: Option<String>,

    /// Conditions (`Resolved`)
    #[serde(default)]
    pub conditions: Vec<Condition>,
}
