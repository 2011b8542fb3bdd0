//! Dataset CRD types
//!
//! `Dataset` is owned by an external controller that fetches artifacts into a
//! PVC. modelhub only creates, reads and deletes Datasets; the types here
//! mirror the subset of its schema that modelhub touches.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::model::StorageSpec;
use super::model_source::SourceType;
use super::types::Condition;

/// API group of the external Dataset CRD
pub const DATASET_GROUP: &str = "dataset.baizeai.io";

/// A dataset the external controller syncs into a PVC.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "dataset.baizeai.io",
    version = "v1alpha1",
    kind = "Dataset",
    plural = "datasets",
    namespaced,
    status = "DatasetStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct DatasetSpec {
    /// Where the dataset's content comes from
    pub source: DatasetSource,

    /// Shape of the PVC the dataset controller provisions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_claim_template: Option<VolumeClaimTemplate>,
}

/// Dataset content location
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct DatasetSource {
    /// Content type
    #[serde(rename = "type")]
    pub type_: DatasetType,

    /// Type-specific URI
    pub uri: String,

    /// Options passed to the fetcher (config plus secret data)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

/// Dataset content types understood by the dataset controller
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DatasetType {
    /// Git repository
    Git,
    /// S3-compatible object storage
    S3,
    /// Plain HTTP download
    Http,
    /// Existing PVC
    Pvc,
    /// NFS export
    Nfs,
    /// Conda environment
    Conda,
    /// Another dataset (`dataset://<ns>/<name>`)
    Reference,
    /// HuggingFace Hub
    HuggingFace,
    /// ModelScope Hub
    ModelScope,
}

impl From<SourceType> for DatasetType {
    fn from(t: SourceType) -> Self {
        match t {
            SourceType::Git => Self::Git,
            SourceType::S3 => Self::S3,
            SourceType::Http => Self::Http,
            SourceType::Pvc => Self::Pvc,
            SourceType::Nfs => Self::Nfs,
            SourceType::Conda => Self::Conda,
            SourceType::Reference => Self::Reference,
            SourceType::HuggingFace => Self::HuggingFace,
            SourceType::ModelScope => Self::ModelScope,
        }
    }
}

/// PVC template embedded in a Dataset
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct VolumeClaimTemplate {
    /// PVC spec subset
    pub spec: StorageSpec,
}

/// Observed status written by the dataset controller
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatasetStatus {
    /// Lifecycle phase
    #[serde(default)]
    pub phase: DatasetPhase,

    /// PVC holding the synced content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pvc_name: Option<String>,

    /// Completion time of the last successful sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<DateTime<Utc>>,

    /// Conditions such as `JobStatus`, `PVC`, `Config`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Dataset lifecycle phase
///
/// Accepts both the upper-case wire form and title case; anything else
/// deserializes as `Unknown`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum DatasetPhase {
    /// Waiting for the sync job
    #[default]
    #[serde(rename = "PENDING", alias = "Pending")]
    Pending,
    /// Sync job running
    #[serde(rename = "PROCESSING", alias = "Processing")]
    Processing,
    /// Content available in the PVC
    #[serde(rename = "READY", alias = "Ready")]
    Ready,
    /// Sync job failed
    #[serde(rename = "FAILED", alias = "Failed")]
    Failed,
    /// Phase not reported or not recognized
    #[serde(other, rename = "UNKNOWN")]
    Unknown,
}

impl DatasetPhase {
    /// Title-case name used in status and condition reasons
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Processing => "Processing",
            Self::Ready => "Ready",
            Self::Failed => "Failed",
            Self::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for DatasetPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Dataset {
    /// Phase reported by the dataset controller, `Pending` before any status
    pub fn phase(&self) -> DatasetPhase {
        self.status
            .as_ref()
            .map(|s| s.phase.clone())
            .unwrap_or_default()
    }
}
