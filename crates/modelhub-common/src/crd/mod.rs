//! Custom Resource Definitions for modelhub
//!
//! Four CRDs are owned by modelhub (`modelhub.dev/v1alpha1`). `Dataset` belongs
//! to an external controller and is modelled here only so it can be read and
//! written with typed APIs.

mod dataset;
mod model;
mod model_reference;
mod model_source;
mod model_sync;
mod types;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

pub use dataset::{
    Dataset, DatasetPhase, DatasetSource, DatasetSpec, DatasetStatus, DatasetType,
    VolumeClaimTemplate, DATASET_GROUP,
};
pub use model::{
    Model, ModelDisplay, ModelSpec, ModelStatus, ModelVersion, ModelVersionState, ShareSpec,
    StorageResources, StorageSpec, SyncedVersion, DEFAULT_ACCESS_MODE, DEFAULT_STORAGE_REQUEST,
};
pub use model_reference::{ModelReference, ModelReferenceSpec, ModelReferenceStatus, RESOLVED};
pub use model_source::{
    ModelSource, ModelSourceSpec, ModelSourceStatus, SourceType, CREDENTIALS_READY,
    DELETION_BLOCKED,
};
pub use model_sync::{ModelSync, ModelSyncSpec, ModelSyncStatus, SYNC_READY};
pub use types::{
    Condition, ConditionStatus, LabelSelectorOperator, LabelSelectorRequirement,
    NamespaceSelector, SecretRef,
};

/// Condition type summarizing a Model's reconcile outcome
pub const READY: &str = "Ready";

/// CRDs owned by modelhub, in install order
pub fn modelhub_crds() -> Vec<CustomResourceDefinition> {
    vec![
        ModelSource::crd(),
        Model::crd(),
        ModelSync::crd(),
        ModelReference::crd(),
    ]
}
