//! In-memory cluster and fixtures for reconciler tests
//!
//! [`FakeCluster`] implements [`KubeClient`] over plain maps. It enforces the
//! parts of API server behavior the reconcilers depend on: resourceVersion
//! conflicts, finalizer-gated deletion and owner-reference garbage collection.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::{Namespace, PersistentVolumeClaim, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use modelhub_common::crd::{
    Dataset, DatasetStatus, Model, ModelReference, ModelReferenceSpec, ModelReferenceStatus,
    ModelSource, ModelSourceSpec, ModelSourceStatus, ModelSpec, ModelStatus, ModelSync,
    ModelSyncSpec, ModelSyncStatus, ModelVersion, SecretRef, SourceType,
};
use modelhub_common::{Error, ResourceKind};

use crate::client::{status_patch, KubeClient};

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn api_error(code: u16, reason: &str, message: String) -> Error {
    Error::from(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    }))
}

fn conflict(name: &str) -> Error {
    api_error(409, "Conflict", format!("{} has been modified", name))
}

#[derive(Default)]
struct State {
    models: BTreeMap<Key, Model>,
    sources: BTreeMap<Key, ModelSource>,
    syncs: BTreeMap<Key, ModelSync>,
    references: BTreeMap<Key, ModelReference>,
    datasets: BTreeMap<Key, Dataset>,
    namespaces: BTreeMap<String, Namespace>,
    secrets: BTreeMap<Key, Secret>,
    pvcs: BTreeMap<Key, PersistentVolumeClaim>,
    next_version: u64,
    writes: usize,
}

impl State {
    fn stamp(&mut self, meta: &mut ObjectMeta) {
        self.next_version += 1;
        meta.resource_version = Some(self.next_version.to_string());
        if meta.uid.is_none() {
            meta.uid = Some(format!("uid-{}", self.next_version));
        }
        if meta.generation.is_none() {
            meta.generation = Some(1);
        }
    }

    /// Drop datasets whose only owner no longer exists
    fn collect_garbage(&mut self, owner_uid: &str) {
        self.datasets.retain(|_, ds| {
            !ds.owner_references()
                .iter()
                .any(|o| o.uid == owner_uid)
        });
    }
}

fn check_version(meta: &ObjectMeta, expected: Option<&str>, name: &str) -> Result<(), Error> {
    match expected {
        Some(rv) if meta.resource_version.as_deref() != Some(rv) => Err(conflict(name)),
        _ => Ok(()),
    }
}

/// Apply a JSON merge patch (RFC 7386) to `target`
fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(fields) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(map) = target {
        for (k, v) in fields {
            if v.is_null() {
                map.remove(k);
            } else {
                merge_patch(map.entry(k.clone()).or_insert(Value::Null), v);
            }
        }
    }
}

/// Live status after the API server applies the reconciler's status patch
fn merged_status<S: Serialize + DeserializeOwned>(live: Option<&S>, status: &S) -> Result<S, Error> {
    let mut target = serde_json::to_value(live).map_err(|e| Error::serialization(e.to_string()))?;
    let patch = status_patch(status, None)?;
    merge_patch(&mut target, &patch["status"]);
    serde_json::from_value(target).map_err(|e| Error::serialization(e.to_string()))
}

/// Edit an object's metadata; removes it when it is deleting and has no finalizers.
/// Returns the uid of a removed object.
fn edit_meta<K: Resource>(
    state: &mut State,
    select: impl Fn(&mut State) -> &mut BTreeMap<Key, K>,
    namespace: &str,
    name: &str,
    edit: impl FnOnce(&mut ObjectMeta),
) -> Result<(), Error> {
    let k = key(namespace, name);
    let mut meta = match select(state).get(&k) {
        Some(obj) => obj.meta().clone(),
        None => return Err(api_error(404, "NotFound", format!("{} not found", name))),
    };
    edit(&mut meta);
    state.stamp(&mut meta);
    state.writes += 1;

    let gone = meta.deletion_timestamp.is_some() && meta.finalizers.as_ref().is_none_or(|f| f.is_empty());
    let map = select(state);
    if gone {
        map.remove(&k);
        if let Some(uid) = meta.uid {
            state.collect_garbage(&uid);
        }
    } else if let Some(obj) = map.get_mut(&k) {
        *obj.meta_mut() = meta;
    }
    Ok(())
}

/// Kubernetes stand-in for reconciler tests
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    // =========================================================================
    // Seeding
    // =========================================================================

    pub fn put_model(&self, mut model: Model) -> Model {
        let mut state = self.lock();
        state.stamp(&mut model.metadata);
        let k = key(&model.namespace().unwrap_or_default(), &model.name_any());
        state.models.insert(k, model.clone());
        model
    }

    pub fn put_source(&self, mut source: ModelSource) -> ModelSource {
        let mut state = self.lock();
        state.stamp(&mut source.metadata);
        let k = key(&source.namespace().unwrap_or_default(), &source.name_any());
        state.sources.insert(k, source.clone());
        source
    }

    pub fn put_sync(&self, mut sync: ModelSync) -> ModelSync {
        let mut state = self.lock();
        state.stamp(&mut sync.metadata);
        let k = key(&sync.namespace().unwrap_or_default(), &sync.name_any());
        state.syncs.insert(k, sync.clone());
        sync
    }

    pub fn put_reference(&self, mut reference: ModelReference) -> ModelReference {
        let mut state = self.lock();
        state.stamp(&mut reference.metadata);
        let k = key(&reference.namespace().unwrap_or_default(), &reference.name_any());
        state.references.insert(k, reference.clone());
        reference
    }

    pub fn put_dataset(&self, mut dataset: Dataset) {
        let mut state = self.lock();
        state.stamp(&mut dataset.metadata);
        let k = key(&dataset.namespace().unwrap_or_default(), &dataset.name_any());
        state.datasets.insert(k, dataset);
    }

    pub fn put_namespace(&self, name: &str, labels: &[(&str, &str)]) {
        self.lock()
            .namespaces
            .insert(name.to_string(), namespace(name, labels));
    }

    pub fn put_secret(&self, namespace: &str, name: &str, data: &[(&str, &str)]) {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            string_data: Some(
                data.iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        };
        self.lock().secrets.insert(key(namespace, name), secret);
    }

    pub fn put_pvc(&self, pvc: PersistentVolumeClaim) {
        let k = key(&pvc.namespace().unwrap_or_default(), &pvc.name_any());
        self.lock().pvcs.insert(k, pvc);
    }

    /// Replace a Model's spec as a user edit would, bumping its generation
    pub fn edit_model(&self, namespace: &str, name: &str, edit: impl FnOnce(&mut ModelSpec)) {
        let mut state = self.lock();
        let Some(mut model) = state.models.get(&key(namespace, name)).cloned() else {
            return;
        };
        edit(&mut model.spec);
        model.metadata.generation = model.metadata.generation.map(|g| g + 1);
        state.stamp(&mut model.metadata);
        state.models.insert(key(namespace, name), model);
    }

    /// Simulate the dataset controller reporting progress
    pub fn set_dataset_status(&self, namespace: &str, name: &str, status: DatasetStatus) {
        let mut state = self.lock();
        let Some(mut ds) = state.datasets.get(&key(namespace, name)).cloned() else {
            return;
        };
        ds.status = Some(status);
        state.stamp(&mut ds.metadata);
        state.datasets.insert(key(namespace, name), ds);
    }

    /// Issue a user delete: removes the object or marks it deleting when finalizers remain
    pub fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) {
        let mut state = self.lock();
        let mark = |meta: &mut ObjectMeta| {
            meta.deletion_timestamp = Some(Time(Utc::now()));
        };
        let _ = match kind {
            ResourceKind::Model => edit_meta(&mut state, |s| &mut s.models, namespace, name, mark),
            ResourceKind::ModelSource => {
                edit_meta(&mut state, |s| &mut s.sources, namespace, name, mark)
            }
            ResourceKind::ModelSync => edit_meta(&mut state, |s| &mut s.syncs, namespace, name, mark),
            ResourceKind::ModelReference => {
                edit_meta(&mut state, |s| &mut s.references, namespace, name, mark)
            }
            ResourceKind::Dataset => {
                edit_meta(&mut state, |s| &mut s.datasets, namespace, name, mark)
            }
            _ => Ok(()),
        };
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn model(&self, namespace: &str, name: &str) -> Option<Model> {
        self.lock().models.get(&key(namespace, name)).cloned()
    }

    pub fn source(&self, namespace: &str, name: &str) -> Option<ModelSource> {
        self.lock().sources.get(&key(namespace, name)).cloned()
    }

    pub fn sync(&self, namespace: &str, name: &str) -> Option<ModelSync> {
        self.lock().syncs.get(&key(namespace, name)).cloned()
    }

    pub fn reference(&self, namespace: &str, name: &str) -> Option<ModelReference> {
        self.lock().references.get(&key(namespace, name)).cloned()
    }

    pub fn dataset(&self, namespace: &str, name: &str) -> Option<Dataset> {
        self.lock().datasets.get(&key(namespace, name)).cloned()
    }

    /// `namespace/name` of every dataset, sorted
    pub fn dataset_keys(&self) -> Vec<String> {
        self.lock()
            .datasets
            .keys()
            .map(|(ns, name)| format!("{}/{}", ns, name))
            .collect()
    }

    /// Number of mutating calls served so far
    pub fn writes(&self) -> usize {
        self.lock().writes
    }
}

fn matches_selector(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k).map(String::as_str) == Some(v),
            None => labels.contains_key(term),
        })
}

#[async_trait]
impl KubeClient for FakeCluster {
    async fn get_model(&self, namespace: &str, name: &str) -> Result<Option<Model>, Error> {
        Ok(self.model(namespace, name))
    }

    async fn list_models(&self, namespace: Option<String>) -> Result<Vec<Model>, Error> {
        Ok(self
            .lock()
            .models
            .iter()
            .filter(|((ns, _), _)| namespace.as_ref().is_none_or(|want| want == ns))
            .map(|(_, m)| m.clone())
            .collect())
    }

    async fn patch_model_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        status: &ModelStatus,
    ) -> Result<(), Error> {
        let mut state = self.lock();
        let Some(mut model) = state.models.get(&key(namespace, name)).cloned() else {
            return Err(api_error(404, "NotFound", format!("{} not found", name)));
        };
        check_version(&model.metadata, resource_version.as_deref(), name)?;
        model.status = Some(merged_status(model.status.as_ref(), status)?);
        state.stamp(&mut model.metadata);
        state.writes += 1;
        state.models.insert(key(namespace, name), model);
        Ok(())
    }

    async fn get_model_source(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ModelSource>, Error> {
        Ok(self.source(namespace, name))
    }

    async fn patch_model_source_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        status: &ModelSourceStatus,
    ) -> Result<(), Error> {
        let mut state = self.lock();
        let Some(mut source) = state.sources.get(&key(namespace, name)).cloned() else {
            return Err(api_error(404, "NotFound", format!("{} not found", name)));
        };
        check_version(&source.metadata, resource_version.as_deref(), name)?;
        source.status = Some(merged_status(source.status.as_ref(), status)?);
        state.stamp(&mut source.metadata);
        state.writes += 1;
        state.sources.insert(key(namespace, name), source);
        Ok(())
    }

    async fn get_model_sync(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ModelSync>, Error> {
        Ok(self.sync(namespace, name))
    }

    async fn patch_model_sync_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        status: &ModelSyncStatus,
    ) -> Result<(), Error> {
        let mut state = self.lock();
        let Some(mut sync) = state.syncs.get(&key(namespace, name)).cloned() else {
            return Err(api_error(404, "NotFound", format!("{} not found", name)));
        };
        check_version(&sync.metadata, resource_version.as_deref(), name)?;
        sync.status = Some(merged_status(sync.status.as_ref(), status)?);
        state.stamp(&mut sync.metadata);
        state.writes += 1;
        state.syncs.insert(key(namespace, name), sync);
        Ok(())
    }

    async fn get_model_reference(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ModelReference>, Error> {
        Ok(self.reference(namespace, name))
    }

    async fn patch_model_reference_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        status: &ModelReferenceStatus,
    ) -> Result<(), Error> {
        let mut state = self.lock();
        let Some(mut reference) = state.references.get(&key(namespace, name)).cloned() else {
            return Err(api_error(404, "NotFound", format!("{} not found", name)));
        };
        check_version(&reference.metadata, resource_version.as_deref(), name)?;
        reference.status = Some(merged_status(reference.status.as_ref(), status)?);
        state.stamp(&mut reference.metadata);
        state.writes += 1;
        state.references.insert(key(namespace, name), reference);
        Ok(())
    }

    async fn add_finalizer(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let add = |meta: &mut ObjectMeta| {
            let finalizers = meta.finalizers.get_or_insert_with(Vec::new);
            if !finalizers.iter().any(|f| f == finalizer) {
                finalizers.push(finalizer.to_string());
            }
        };
        let mut state = self.lock();
        match kind {
            ResourceKind::Model => edit_meta(&mut state, |s| &mut s.models, namespace, name, add),
            ResourceKind::ModelSource => {
                edit_meta(&mut state, |s| &mut s.sources, namespace, name, add)
            }
            other => Err(Error::internal(format!("fake cluster cannot finalize {}", other))),
        }
    }

    async fn remove_finalizer(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let remove = |meta: &mut ObjectMeta| {
            if let Some(finalizers) = meta.finalizers.as_mut() {
                finalizers.retain(|f| f != finalizer);
            }
        };
        let mut state = self.lock();
        let result = match kind {
            ResourceKind::Model => edit_meta(&mut state, |s| &mut s.models, namespace, name, remove),
            ResourceKind::ModelSource => {
                edit_meta(&mut state, |s| &mut s.sources, namespace, name, remove)
            }
            other => Err(Error::internal(format!("fake cluster cannot finalize {}", other))),
        };
        match result {
            Err(e) if matches!(&e, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 404) => {
                Ok(())
            }
            other => other,
        }
    }

    async fn set_annotation(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<(), Error> {
        let annotate = |meta: &mut ObjectMeta| {
            meta.annotations
                .get_or_insert_with(BTreeMap::new)
                .insert(key.to_string(), value.to_string());
        };
        let mut state = self.lock();
        match kind {
            ResourceKind::Model => edit_meta(&mut state, |s| &mut s.models, namespace, name, annotate),
            ResourceKind::ModelSource => {
                edit_meta(&mut state, |s| &mut s.sources, namespace, name, annotate)
            }
            ResourceKind::Dataset => {
                edit_meta(&mut state, |s| &mut s.datasets, namespace, name, annotate)
            }
            other => Err(Error::internal(format!("fake cluster cannot annotate {}", other))),
        }
    }

    async fn get_dataset(&self, namespace: &str, name: &str) -> Result<Option<Dataset>, Error> {
        Ok(self.dataset(namespace, name))
    }

    async fn create_dataset(&self, dataset: &Dataset) -> Result<(), Error> {
        let mut state = self.lock();
        let k = key(&dataset.namespace().unwrap_or_default(), &dataset.name_any());
        if state.datasets.contains_key(&k) {
            return Err(api_error(409, "AlreadyExists", format!("{} already exists", k.1)));
        }
        let mut created = dataset.clone();
        created.metadata.uid = None;
        state.stamp(&mut created.metadata);
        state.writes += 1;
        state.datasets.insert(k, created);
        Ok(())
    }

    async fn replace_dataset(&self, dataset: &Dataset) -> Result<(), Error> {
        let mut state = self.lock();
        let k = key(&dataset.namespace().unwrap_or_default(), &dataset.name_any());
        let Some(live) = state.datasets.get(&k) else {
            return Err(api_error(404, "NotFound", format!("{} not found", k.1)));
        };
        check_version(&live.metadata, dataset.metadata.resource_version.as_deref(), &k.1)?;
        let mut replaced = dataset.clone();
        replaced.status = live.status.clone();
        state.stamp(&mut replaced.metadata);
        state.writes += 1;
        state.datasets.insert(k, replaced);
        Ok(())
    }

    async fn delete_dataset(&self, namespace: &str, name: &str) -> Result<bool, Error> {
        let mut state = self.lock();
        let removed = state.datasets.remove(&key(namespace, name)).is_some();
        if removed {
            state.writes += 1;
        }
        Ok(removed)
    }

    async fn list_datasets(
        &self,
        namespace: Option<String>,
        label_selector: &str,
    ) -> Result<Vec<Dataset>, Error> {
        Ok(self
            .lock()
            .datasets
            .iter()
            .filter(|((ns, _), _)| namespace.as_ref().is_none_or(|want| want == ns))
            .filter(|(_, ds)| matches_selector(ds.labels(), label_selector))
            .map(|(_, ds)| ds.clone())
            .collect())
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>, Error> {
        Ok(self.lock().namespaces.values().cloned().collect())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        Ok(self.lock().secrets.get(&key(namespace, name)).cloned())
    }

    async fn get_pvc(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>, Error> {
        Ok(self.lock().pvcs.get(&key(namespace, name)).cloned())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

fn meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        uid: Some(format!("uid-{}-{}", namespace, name)),
        generation: Some(1),
        ..Default::default()
    }
}

pub fn version(name: &str, repo: &str) -> ModelVersion {
    ModelVersion {
        name: name.to_string(),
        repo: repo.to_string(),
        ..Default::default()
    }
}

pub fn model(namespace: &str, name: &str, source_ref: &str, versions: Vec<ModelVersion>) -> Model {
    Model {
        metadata: meta(namespace, name),
        spec: ModelSpec {
            source_ref: source_ref.to_string(),
            versions,
            display: None,
        },
        status: None,
    }
}

pub fn source(namespace: &str, name: &str, type_: SourceType) -> ModelSource {
    ModelSource {
        metadata: meta(namespace, name),
        spec: ModelSourceSpec {
            type_,
            secret_ref: None,
            config: BTreeMap::new(),
        },
        status: None,
    }
}

pub fn source_with_secret(namespace: &str, name: &str, type_: SourceType, secret: &str) -> ModelSource {
    let mut src = source(namespace, name, type_);
    src.spec.secret_ref = Some(SecretRef {
        name: secret.to_string(),
    });
    src
}

pub fn sync(namespace: &str, name: &str, model_ref: &str, version: &str) -> ModelSync {
    ModelSync {
        metadata: meta(namespace, name),
        spec: ModelSyncSpec {
            model_ref: model_ref.to_string(),
            version: version.to_string(),
            schedule: None,
            retention_count: None,
        },
        status: None,
    }
}

pub fn reference(namespace: &str, name: &str, model_name: &str, version: &str) -> ModelReference {
    ModelReference {
        metadata: meta(namespace, name),
        spec: ModelReferenceSpec {
            model_name: model_name.to_string(),
            version: version.to_string(),
            alias: None,
        },
        status: None,
    }
}

pub fn namespace(name: &str, labels: &[(&str, &str)]) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_patch_keeps_omitted_keys_and_drops_nulls() {
        let mut live = json!({"a": 1, "b": {"c": 2, "d": 3}, "e": [1, 2]});
        merge_patch(&mut live, &json!({"b": {"c": null}, "e": []}));
        assert_eq!(live, json!({"a": 1, "b": {"d": 3}, "e": []}));
    }

    #[test]
    fn emptied_referenced_by_clears_the_live_status() {
        let live = ModelSourceStatus {
            referenced_by: vec!["ml/llama".to_string()],
            ..Default::default()
        };
        let merged = merged_status(Some(&live), &ModelSourceStatus::default()).unwrap();
        assert!(merged.referenced_by.is_empty());
    }

    #[test]
    fn cleared_resolution_clears_the_live_status() {
        let live = ModelReferenceStatus {
            resolved_version: Some("v1".to_string()),
            resolved_dataset: Some("mdl-llama-v1".to_string()),
            ..Default::default()
        };
        let merged = merged_status(Some(&live), &ModelReferenceStatus::default()).unwrap();
        assert_eq!(merged.resolved_version, None);
        assert_eq!(merged.resolved_dataset, None);
    }
}
