//! Reverse mapping from auxiliary watch events to primary reconcile requests
//!
//! Mappers are pure: they read the event object and, where needed, a
//! snapshot of a reflector store. They never call the API server.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Secret;
use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;

use modelhub_common::crd::{Dataset, Model, ModelReference, ModelSource, ModelSync};
use modelhub_common::naming::parse_model_label;
use modelhub_common::MODEL_LABEL_KEY;

/// Models in the source's namespace whose `sourceRef` names it
pub fn models_for_source(source: &ModelSource, models: &[Arc<Model>]) -> Vec<ObjectRef<Model>> {
    let namespace = source.namespace();
    let name = source.name_any();
    models
        .iter()
        .filter(|m| m.namespace() == namespace && m.spec.source_ref == name)
        .map(|m| ObjectRef::from_obj(m.as_ref()))
        .collect()
}

/// Model a dataset derives from, by controller owner reference or model label.
///
/// Reference datasets in other namespaces have no owner, so the label is the
/// only way back to their model.
pub fn models_for_dataset(dataset: &Dataset) -> Vec<ObjectRef<Model>> {
    let namespace = dataset.namespace().unwrap_or_default();
    if let Some(owner) = dataset
        .owner_references()
        .iter()
        .find(|o| o.kind == "Model")
    {
        return vec![ObjectRef::new(&owner.name).within(&namespace)];
    }
    dataset
        .labels()
        .get(MODEL_LABEL_KEY)
        .and_then(|value| parse_model_label(value))
        .map(|(ns, name)| ObjectRef::new(name).within(ns))
        .into_iter()
        .collect()
}

/// Models with at least one shared version; any namespace change may alter their targets
pub fn models_for_namespace(models: &[Arc<Model>]) -> Vec<ObjectRef<Model>> {
    models
        .iter()
        .filter(|m| m.spec.versions.iter().any(|v| v.share_enabled()))
        .map(|m| ObjectRef::from_obj(m.as_ref()))
        .collect()
}

/// ModelSource a Model points at, so `referencedBy` follows Model changes
pub fn source_for_model(model: &Model) -> Option<ObjectRef<ModelSource>> {
    let namespace = model.namespace()?;
    (!model.spec.source_ref.is_empty())
        .then(|| ObjectRef::new(&model.spec.source_ref).within(&namespace))
}

/// ModelSources in the secret's namespace that name it in `secretRef`
pub fn sources_for_secret(
    secret: &Secret,
    sources: &[Arc<ModelSource>],
) -> Vec<ObjectRef<ModelSource>> {
    let namespace = secret.namespace();
    let name = secret.name_any();
    sources
        .iter()
        .filter(|s| s.namespace() == namespace && s.spec.secret_name() == Some(name.as_str()))
        .map(|s| ObjectRef::from_obj(s.as_ref()))
        .collect()
}

/// ModelSync owning a dataset
pub fn sync_for_dataset(dataset: &Dataset) -> Option<ObjectRef<ModelSync>> {
    let namespace = dataset.namespace()?;
    dataset
        .owner_references()
        .iter()
        .find(|o| o.kind == "ModelSync")
        .map(|o| ObjectRef::new(&o.name).within(&namespace))
}

/// ModelSyncs in the model's namespace that target it
pub fn syncs_for_model(model: &Model, syncs: &[Arc<ModelSync>]) -> Vec<ObjectRef<ModelSync>> {
    let namespace = model.namespace();
    let name = model.name_any();
    syncs
        .iter()
        .filter(|s| s.namespace() == namespace && s.spec.model_ref == name)
        .map(|s| ObjectRef::from_obj(s.as_ref()))
        .collect()
}

/// ModelReferences in the model's namespace that name it
pub fn references_for_model(
    model: &Model,
    references: &[Arc<ModelReference>],
) -> Vec<ObjectRef<ModelReference>> {
    let namespace = model.namespace();
    let name = model.name_any();
    references
        .iter()
        .filter(|r| r.namespace() == namespace && r.spec.model_name == name)
        .map(|r| ObjectRef::from_obj(r.as_ref()))
        .collect()
}
