//! ModelSync CRD types

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;

/// Condition type summarizing the sync task
pub const SYNC_READY: &str = "SyncReady";

/// An explicit sync task for one version of a Model.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "modelhub.dev",
    version = "v1alpha1",
    kind = "ModelSync",
    plural = "modelsyncs",
    shortname = "msync",
    namespaced,
    status = "ModelSyncStatus",
    printcolumn = r#"{"name":"Model","type":"string","jsonPath":".spec.modelRef"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"SyncReady\")].status"}"#,
    printcolumn = r#"{"name":"Last Synced","type":"date","jsonPath":".status.lastSyncedAt"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ModelSyncSpec {
    /// Model in the same namespace
    pub model_ref: String,

    /// Version of that model to sync
    pub version: String,

    /// Cron expression; recorded but not interpreted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,

    /// Number of past syncs to keep; recorded but not interpreted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_count: Option<u32>,
}

/// Observed status of a ModelSync
///
/// Empty fields are serialized too: status is written as a merge patch, and
/// an omitted key would leave the stale server value in place.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelSyncStatus {
    /// Copied from the dataset's `lastSyncTime`
    #[serde(default)]
    pub last_synced_at: Option<DateTime<Utc>>,

    /// `SyncReady` plus conditions mirrored from the dataset as `Dataset<Type>`
    #[serde(default)]
    pub conditions: Vec<Condition>,
}
