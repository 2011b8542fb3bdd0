//! ModelSource CRD types
//!
//! A `ModelSource` carries the repository type, optional credentials and
//! free-form configuration that Models in the same namespace sync from.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, SecretRef};

/// Condition type reporting whether the source's credentials are usable
pub const CREDENTIALS_READY: &str = "CredentialsReady";

/// Condition type set while deletion waits on referencing Models
pub const DELETION_BLOCKED: &str = "DeletionBlocked";

/// Where model artifacts come from and how to authenticate.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "modelhub.dev",
    version = "v1alpha1",
    kind = "ModelSource",
    plural = "modelsources",
    shortname = "msrc",
    namespaced,
    status = "ModelSourceStatus",
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"Credentials","type":"string","jsonPath":".status.conditions[?(@.type==\"CredentialsReady\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ModelSourceSpec {
    /// Repository type
    #[serde(rename = "type")]
    pub type_: SourceType,

    /// Secret holding credentials, merged into dataset options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<SecretRef>,

    /// Type-specific settings (`uri`, `url`, `pvcName`, `server`, `path`, ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,
}

impl ModelSourceSpec {
    /// Name of the referenced secret, if any non-empty one is declared
    pub fn secret_name(&self) -> Option<&str> {
        self.secret_ref
            .as_ref()
            .map(|s| s.name.as_str())
            .filter(|n| !n.is_empty())
    }
}

/// Closed set of repository types
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceType {
    /// Git repository
    Git,
    /// S3-compatible object storage
    S3,
    /// Plain HTTP download
    Http,
    /// Existing PersistentVolumeClaim
    Pvc,
    /// NFS export
    Nfs,
    /// Conda environment
    Conda,
    /// Another dataset
    Reference,
    /// HuggingFace Hub
    HuggingFace,
    /// ModelScope Hub
    ModelScope,
}

impl SourceType {
    /// Wire name as written in manifests
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Git => "GIT",
            Self::S3 => "S3",
            Self::Http => "HTTP",
            Self::Pvc => "PVC",
            Self::Nfs => "NFS",
            Self::Conda => "CONDA",
            Self::Reference => "REFERENCE",
            Self::HuggingFace => "HUGGING_FACE",
            Self::ModelScope => "MODEL_SCOPE",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observed status of a ModelSource
///
/// Empty fields are serialized too: status is written as a merge patch, and
/// an omitted key would leave the stale server value in place.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelSourceStatus {
    /// Conditions (`CredentialsReady`, `DeletionBlocked`)
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Models using this source, as `namespace/name`
    #[serde(default)]
    pub referenced_by: Vec<String>,
}

impl ModelSource {
    /// True when the source needs no secret or its credentials validated
    pub fn credentials_ready(&self) -> bool {
        if self.spec.secret_name().is_none() {
            return true;
        }
        self.status
            .as_ref()
            .and_then(|s| s.conditions.iter().find(|c| c.type_ == CREDENTIALS_READY))
            .is_some_and(|c| c.is_true())
    }
}
