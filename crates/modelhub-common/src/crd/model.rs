//! Model CRD types
//!
//! A `Model` declares named versions of an ML artifact. Each PRESENT version
//! is materialized as an owned `Dataset`; each ABSENT version has its dataset
//! removed. Versions may be shared into other namespaces as reference
//! datasets.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, NamespaceSelector};
use crate::kube_utils::short_hash;
use crate::Error;

/// Access mode used when a version declares no storage
pub const DEFAULT_ACCESS_MODE: &str = "ReadWriteMany";

/// Storage request used when a version declares no storage
pub const DEFAULT_STORAGE_REQUEST: &str = "100Ti";

/// Model declares versions of an ML artifact and the source they come from.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "modelhub.dev",
    version = "v1alpha1",
    kind = "Model",
    plural = "models",
    shortname = "mdl",
    namespaced,
    status = "ModelStatus",
    printcolumn = r#"{"name":"Source","type":"string","jsonPath":".spec.sourceRef"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ModelSpec {
    /// Name of the ModelSource in the same namespace
    pub source_ref: String,

    /// Ordered list of versions; names must be unique
    #[serde(default)]
    pub versions: Vec<ModelVersion>,

    /// Presentation metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<ModelDisplay>,
}

/// One version of a model
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelVersion {
    /// Version name, unique within the model
    pub name: String,

    /// Repository path interpreted by the source type
    #[serde(default)]
    pub repo: String,

    /// Revision (branch, tag or commit); `main` when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,

    /// Numeric precision label (e.g. "fp16")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<String>,

    /// Storage for the dataset's volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageSpec>,

    /// Desired presence of this version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ModelVersionState>,

    /// Cross-namespace sharing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share: Option<ShareSpec>,
}

impl ModelVersion {
    /// Desired state, defaulting to PRESENT
    pub fn desired_state(&self) -> ModelVersionState {
        self.state.clone().unwrap_or_default()
    }

    /// Whether this version is shared into other namespaces
    pub fn share_enabled(&self) -> bool {
        self.share.as_ref().is_some_and(|s| s.enabled)
    }

    /// 8-hex-character fingerprint of repo, revision and storage.
    ///
    /// Observational only: recorded in status, never used to skip work.
    pub fn content_hash(&self) -> String {
        let storage = self
            .storage
            .as_ref()
            .and_then(|s| serde_json::to_string(s).ok())
            .unwrap_or_default();
        let input = format!(
            "{}:{}:{}",
            self.repo,
            self.revision.as_deref().unwrap_or_default(),
            storage
        );
        short_hash(&input, 8)
    }
}

/// Desired or observed presence of a model version
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelVersionState {
    /// The version's dataset should exist
    #[default]
    Present,
    /// The version's dataset should not exist
    Absent,
}

impl std::fmt::Display for ModelVersionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Present => write!(f, "PRESENT"),
            Self::Absent => write!(f, "ABSENT"),
        }
    }
}

/// Volume claim shape for a version's dataset
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    /// PVC access modes (e.g. ReadWriteMany)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_modes: Vec<String>,

    /// Requests and limits keyed by resource name (`storage`)
    #[serde(default)]
    pub resources: StorageResources,

    /// Storage class for the PVC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
}

impl StorageSpec {
    /// Storage used when a version declares none
    pub fn default_claim() -> Self {
        Self {
            access_modes: vec![DEFAULT_ACCESS_MODE.to_string()],
            resources: StorageResources {
                requests: BTreeMap::from([(
                    "storage".to_string(),
                    DEFAULT_STORAGE_REQUEST.to_string(),
                )]),
                limits: BTreeMap::new(),
            },
            storage_class_name: None,
        }
    }
}

/// Resource quantities in Kubernetes notation
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct StorageResources {
    /// Minimum resources requested
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,

    /// Maximum resources allowed
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
}

/// Cross-namespace sharing of a version
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShareSpec {
    /// Enable sharing
    #[serde(default)]
    pub enabled: bool,

    /// Only namespaces matching this selector receive a reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<NamespaceSelector>,

    /// Namespace opt-in label: `key=value` for an exact match, or `key`
    /// which must be set to `"true"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_opt_in_label: Option<String>,
}

impl ShareSpec {
    /// Whether a namespace with these labels should receive a reference.
    ///
    /// The selector and the opt-in test must both pass; either one being
    /// absent counts as a pass.
    pub fn admits(&self, namespace_labels: &BTreeMap<String, String>) -> bool {
        let selected = self
            .namespace_selector
            .as_ref()
            .is_none_or(|s| s.matches(namespace_labels));
        selected && self.opted_in(namespace_labels)
    }

    fn opted_in(&self, namespace_labels: &BTreeMap<String, String>) -> bool {
        match self.require_opt_in_label.as_deref() {
            None | Some("") => true,
            Some(label) => match label.split_once('=') {
                Some((key, value)) => namespace_labels.get(key).map(String::as_str) == Some(value),
                None => namespace_labels.get(label).map(String::as_str) == Some("true"),
            },
        }
    }
}

/// Presentation metadata for catalogs
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ModelDisplay {
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Search tags
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl ModelSpec {
    /// Look up a version by name
    pub fn version(&self, name: &str) -> Option<&ModelVersion> {
        self.versions.iter().find(|v| v.name == name)
    }

    /// Comma-separated version names, in declaration order
    pub fn version_names(&self) -> String {
        self.versions
            .iter()
            .map(|v| v.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Check structural invariants that the schema cannot express
    pub fn validate(&self, resource: &str) -> Result<(), Error> {
        if self.source_ref.trim().is_empty() {
            return Err(Error::validation_for_field(
                resource,
                "spec.sourceRef",
                "sourceRef must not be empty",
            ));
        }

        let mut seen = HashSet::new();
        for (i, version) in self.versions.iter().enumerate() {
            if version.name.trim().is_empty() {
                return Err(Error::validation_for_field(
                    resource,
                    format!("spec.versions[{}].name", i),
                    "version name must not be empty",
                ));
            }
            if !seen.insert(version.name.as_str()) {
                return Err(Error::validation_for_field(
                    resource,
                    format!("spec.versions[{}].name", i),
                    format!("duplicate version name '{}'", version.name),
                ));
            }
        }
        Ok(())
    }
}

/// Observed status of a Model
///
/// Empty fields are serialized too: status is written as a merge patch, and
/// an omitted key would leave the stale server value in place.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelStatus {
    /// Aggregate conditions (`Ready`)
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Per-version sync state; retains removed versions until their dataset is gone
    #[serde(default)]
    pub synced_versions: Vec<SyncedVersion>,

    /// Generation last processed by the controller
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

impl ModelStatus {
    /// Look up a synced version entry by name
    pub fn synced(&self, name: &str) -> Option<&SyncedVersion> {
        self.synced_versions.iter().find(|v| v.name == name)
    }
}

/// Observed state of one version's dataset
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncedVersion {
    /// Version name
    pub name: String,

    /// Dataset phase as reported by the dataset controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// PVC backing the dataset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pvc_name: Option<String>,

    /// Name of the dataset backing this version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_dataset: Option<String>,

    /// Last successful sync reported by the dataset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<DateTime<Utc>>,

    /// Whether the dataset is present or being removed
    #[serde(default)]
    pub observed_state: ModelVersionState,

    /// Storage request observed on the dataset's PVC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_storage: Option<String>,

    /// Fingerprint of repo, revision and storage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_version_hash: Option<String>,

    /// Conditions mirrored from the dataset
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}
