//! Resource kinds known to modelhub and the registry that resolves them
//!
//! `KindRegistry` is built once at startup and shared by `Arc` with every
//! controller. It maps each [`ResourceKind`] to the `ApiResource` used for
//! dynamic API access (finalizer patches) and to an optional spec validator.

use std::str::FromStr;

use dashmap::DashMap;
use kube::discovery::ApiResource;
use kube::{Client, Resource};
use tracing::{info, warn};

use crate::crd::{Dataset, Model, ModelReference, ModelSource, ModelSpec, ModelSync};
use crate::kube_utils::find_discovered_resource;
use crate::Error;

/// Every kind modelhub reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// modelhub.dev Model
    Model,
    /// modelhub.dev ModelSource
    ModelSource,
    /// modelhub.dev ModelSync
    ModelSync,
    /// modelhub.dev ModelReference
    ModelReference,
    /// dataset.baizeai.io Dataset
    Dataset,
    /// core/v1 Namespace
    Namespace,
    /// core/v1 Secret
    Secret,
    /// core/v1 PersistentVolumeClaim
    PersistentVolumeClaim,
}

/// All ResourceKind variants for iteration.
pub const ALL_KINDS: &[ResourceKind] = &[
    ResourceKind::Model,
    ResourceKind::ModelSource,
    ResourceKind::ModelSync,
    ResourceKind::ModelReference,
    ResourceKind::Dataset,
    ResourceKind::Namespace,
    ResourceKind::Secret,
    ResourceKind::PersistentVolumeClaim,
];

impl ResourceKind {
    /// Kubernetes Kind string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Model => "Model",
            Self::ModelSource => "ModelSource",
            Self::ModelSync => "ModelSync",
            Self::ModelReference => "ModelReference",
            Self::Dataset => "Dataset",
            Self::Namespace => "Namespace",
            Self::Secret => "Secret",
            Self::PersistentVolumeClaim => "PersistentVolumeClaim",
        }
    }

    /// Lower-case plural, as used in API paths and gateway events
    pub fn plural(&self) -> &'static str {
        match self {
            Self::Model => "models",
            Self::ModelSource => "modelsources",
            Self::ModelSync => "modelsyncs",
            Self::ModelReference => "modelreferences",
            Self::Dataset => "datasets",
            Self::Namespace => "namespaces",
            Self::Secret => "secrets",
            Self::PersistentVolumeClaim => "persistentvolumeclaims",
        }
    }

    /// Whether the kind is a CRD that must be installed in the cluster
    pub fn is_custom(&self) -> bool {
        !matches!(
            self,
            Self::Namespace | Self::Secret | Self::PersistentVolumeClaim
        )
    }

    fn builtin_api_resource(&self) -> ApiResource {
        use k8s_openapi::api::core::v1::{Namespace, PersistentVolumeClaim, Secret};
        match self {
            Self::Model => ApiResource::erase::<Model>(&()),
            Self::ModelSource => ApiResource::erase::<ModelSource>(&()),
            Self::ModelSync => ApiResource::erase::<ModelSync>(&()),
            Self::ModelReference => ApiResource::erase::<ModelReference>(&()),
            Self::Dataset => ApiResource::erase::<Dataset>(&()),
            Self::Namespace => ApiResource::erase::<Namespace>(&()),
            Self::Secret => ApiResource::erase::<Secret>(&()),
            Self::PersistentVolumeClaim => ApiResource::erase::<PersistentVolumeClaim>(&()),
        }
    }

    fn group(&self) -> String {
        match self {
            Self::Model => Model::group(&()).into_owned(),
            Self::ModelSource => ModelSource::group(&()).into_owned(),
            Self::ModelSync => ModelSync::group(&()).into_owned(),
            Self::ModelReference => ModelReference::group(&()).into_owned(),
            Self::Dataset => Dataset::group(&()).into_owned(),
            Self::Namespace | Self::Secret | Self::PersistentVolumeClaim => String::new(),
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = Error;

    /// Accepts the Kind (`ModelSource`) or the plural (`modelsources`), any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_KINDS
            .iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s) || k.plural().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| Error::validation(format!("unknown resource kind: {}", s)))
    }
}

/// Validates a serialized spec; `resource` is `namespace/name` for messages.
pub type SpecValidator = fn(resource: &str, spec: &serde_json::Value) -> Result<(), Error>;

#[derive(Clone)]
struct KindEntry {
    api_resource: ApiResource,
    validator: Option<SpecValidator>,
}

/// Registry of kind → API resource and spec validator.
pub struct KindRegistry {
    entries: DashMap<ResourceKind, KindEntry>,
}

impl KindRegistry {
    /// Registry populated from the compiled-in type definitions.
    ///
    /// Used in tests and as the fallback when discovery is unavailable.
    pub fn builtin() -> Self {
        let entries = DashMap::new();
        for kind in ALL_KINDS {
            entries.insert(
                *kind,
                KindEntry {
                    api_resource: kind.builtin_api_resource(),
                    validator: builtin_validator(*kind),
                },
            );
        }
        Self { entries }
    }

    /// Run API discovery and confirm every custom kind is served.
    ///
    /// A missing CRD is a wiring error and fails startup. If discovery itself
    /// fails the compiled-in versions are used.
    pub async fn discover(client: Client) -> Result<Self, Error> {
        use kube::discovery::Discovery;

        let registry = Self::builtin();
        let discovery = match Discovery::new(client).run().await {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "API discovery failed, using compiled-in API versions");
                return Ok(registry);
            }
        };

        for kind in ALL_KINDS.iter().filter(|k| k.is_custom()) {
            let group = kind.group();
            let ar = find_discovered_resource(&discovery, &group, kind.as_str()).ok_or_else(
                || {
                    Error::internal_with_context(
                        "kind_registry",
                        format!("{} ({}) is not installed in the cluster", kind, group),
                    )
                },
            )?;
            if let Some(mut entry) = registry.entries.get_mut(kind) {
                entry.api_resource = ar;
            }
        }

        info!(kinds = registry.entries.len(), "kind registry populated");
        Ok(registry)
    }

    /// ApiResource for dynamic access to `kind`
    pub fn api_resource(&self, kind: ResourceKind) -> Result<ApiResource, Error> {
        self.entries
            .get(&kind)
            .map(|e| e.api_resource.clone())
            .ok_or_else(|| {
                Error::internal_with_context("kind_registry", format!("{} not registered", kind))
            })
    }

    /// Validate a serialized spec of `kind`; kinds without a validator pass
    pub fn validate(
        &self,
        kind: ResourceKind,
        resource: &str,
        spec: &serde_json::Value,
    ) -> Result<(), Error> {
        match self.entries.get(&kind).and_then(|e| e.validator) {
            Some(validator) => validator(resource, spec),
            None => Ok(()),
        }
    }
}

fn builtin_validator(kind: ResourceKind) -> Option<SpecValidator> {
    match kind {
        ResourceKind::Model => Some(validate_model_spec),
        ResourceKind::ModelSync => Some(validate_sync_spec),
        ResourceKind::ModelReference => Some(validate_reference_spec),
        _ => None,
    }
}

fn validate_sync_spec(resource: &str, spec: &serde_json::Value) -> Result<(), Error> {
    require_fields(resource, spec, &["modelRef", "version"])
}

fn validate_reference_spec(resource: &str, spec: &serde_json::Value) -> Result<(), Error> {
    require_fields(resource, spec, &["modelName", "version"])
}

fn validate_model_spec(resource: &str, spec: &serde_json::Value) -> Result<(), Error> {
    let spec: ModelSpec = serde_json::from_value(spec.clone()).map_err(|e| {
        Error::serialization_for_kind(ResourceKind::Model, format!("{}: {}", resource, e))
    })?;
    spec.validate(resource)
}

fn require_fields(resource: &str, spec: &serde_json::Value, fields: &[&str]) -> Result<(), Error> {
    for field in fields {
        let present = spec
            .get(field)
            .and_then(|v| v.as_str())
            .is_some_and(|s| !s.trim().is_empty());
        if !present {
            return Err(Error::validation_for_field(
                resource,
                format!("spec.{}", field),
                format!("{} must not be empty", field),
            ));
        }
    }
    Ok(())
}
