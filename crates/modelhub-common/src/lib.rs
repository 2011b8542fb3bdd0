//! Common types for modelhub: CRDs, conditions, errors, and utilities

#![deny(missing_docs)]

pub mod conditions;
pub mod crd;
pub mod error;
pub mod kind;
pub mod kube_utils;
pub mod naming;
pub mod telemetry;

pub use error::Error;
pub use kind::{KindRegistry, ResourceKind};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group for all modelhub CRDs
pub const API_GROUP: &str = "modelhub.dev";

/// API version for all modelhub CRDs
pub const API_VERSION: &str = "v1alpha1";

/// Field manager name used for every write the controllers issue
pub const FIELD_MANAGER: &str = "modelhub-controller";

/// Finalizer attached to every reconciled Model
pub const MODEL_FINALIZER: &str = "modelhub.dev/model-finalizer";

/// Finalizer attached to every reconciled ModelSource
pub const MODEL_SOURCE_FINALIZER: &str = "modelhub.dev/source-finalizer";

/// Label key carrying the owning model (`<namespace>.<name>`)
pub const MODEL_LABEL_KEY: &str = "modelhub.dev/model";

/// Label key carrying the model version name
pub const VERSION_LABEL_KEY: &str = "modelhub.dev/version";

/// Annotation carrying an RFC3339 timestamp that asks the dataset controller to re-sync
pub const RESYNC_ANNOTATION_KEY: &str = "modelhub.dev/resync-at";
