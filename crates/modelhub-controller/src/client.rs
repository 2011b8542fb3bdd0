//! Kubernetes access for the reconcilers
//!
//! Every read and write the reconcilers issue goes through [`KubeClient`] so
//! that reconcile logic can be exercised against mocks and an in-memory fake
//! cluster.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, PersistentVolumeClaim, Secret};
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde::Serialize;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use modelhub_common::crd::{
    Dataset, Model, ModelReference, ModelReferenceStatus, ModelSource, ModelSourceStatus,
    ModelStatus, ModelSync, ModelSyncStatus,
};
use modelhub_common::kube_utils::is_not_found;
use modelhub_common::{Error, KindRegistry, ResourceKind, FIELD_MANAGER};

/// Trait abstracting Kubernetes client operations for the modelhub reconcilers
///
/// `get_*` methods return `Ok(None)` for a 404. Status patches carry the
/// `resourceVersion` read just before the write; a stale version surfaces as
/// a 409 Conflict error.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Get a Model
    async fn get_model(&self, namespace: &str, name: &str) -> Result<Option<Model>, Error>;

    /// List Models in a namespace, or cluster-wide when `namespace` is `None`
    async fn list_models(&self, namespace: Option<String>) -> Result<Vec<Model>, Error>;

    /// Merge-patch a Model's status, guarded by `resource_version`
    async fn patch_model_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        status: &ModelStatus,
    ) -> Result<(), Error>;

    /// Get a ModelSource
    async fn get_model_source(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ModelSource>, Error>;

    /// Merge-patch a ModelSource's status, guarded by `resource_version`
    async fn patch_model_source_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        status: &ModelSourceStatus,
    ) -> Result<(), Error>;

    /// Get a ModelSync
    async fn get_model_sync(&self, namespace: &str, name: &str)
        -> Result<Option<ModelSync>, Error>;

    /// Merge-patch a ModelSync's status, guarded by `resource_version`
    async fn patch_model_sync_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        status: &ModelSyncStatus,
    ) -> Result<(), Error>;

    /// Get a ModelReference
    async fn get_model_reference(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ModelReference>, Error>;

    /// Merge-patch a ModelReference's status, guarded by `resource_version`
    async fn patch_model_reference_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        status: &ModelReferenceStatus,
    ) -> Result<(), Error>;

    /// Append `finalizer` to an object's finalizers if absent
    async fn add_finalizer(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error>;

    /// Remove `finalizer` from an object's finalizers
    async fn remove_finalizer(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error>;

    /// Set one annotation on an object
    async fn set_annotation(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<(), Error>;

    /// Get a Dataset
    async fn get_dataset(&self, namespace: &str, name: &str) -> Result<Option<Dataset>, Error>;

    /// Create a Dataset
    async fn create_dataset(&self, dataset: &Dataset) -> Result<(), Error>;

    /// Replace a Dataset; `dataset` must carry the current `resourceVersion`
    async fn replace_dataset(&self, dataset: &Dataset) -> Result<(), Error>;

    /// Delete a Dataset; returns `false` when it was already gone
    async fn delete_dataset(&self, namespace: &str, name: &str) -> Result<bool, Error>;

    /// List Datasets matching a label selector, in one namespace or all
    async fn list_datasets(
        &self,
        namespace: Option<String>,
        label_selector: &str,
    ) -> Result<Vec<Dataset>, Error>;

    /// List every Namespace
    async fn list_namespaces(&self) -> Result<Vec<Namespace>, Error>;

    /// Get a Secret
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;

    /// Get a PersistentVolumeClaim
    async fn get_pvc(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>, Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
    kinds: Arc<KindRegistry>,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client, kinds: Arc<KindRegistry>) -> Self {
        Self { client, kinds }
    }

    fn dynamic(&self, kind: ResourceKind, namespace: &str) -> Result<Api<DynamicObject>, Error> {
        let ar = self.kinds.api_resource(kind)?;
        Ok(Api::namespaced_with(self.client.clone(), namespace, &ar))
    }
}

async fn get_opt<K>(api: Api<K>, name: &str) -> Result<Option<K>, Error>
where
    K: kube::Resource + Clone + std::fmt::Debug + serde::de::DeserializeOwned,
{
    match api.get(name).await {
        Ok(obj) => Ok(Some(obj)),
        Err(e) if is_not_found(&e) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn patch_status_guarded<K, S>(
    api: Api<K>,
    name: &str,
    resource_version: Option<String>,
    status: &S,
) -> Result<(), Error>
where
    K: kube::Resource + Clone + std::fmt::Debug + serde::de::DeserializeOwned,
    S: Serialize + Sync,
{
    let patch = status_patch(status, resource_version)?;
    api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Merge-patch body writing `status` whole, guarded by `resource_version` when given
pub(crate) fn status_patch<S: Serialize>(
    status: &S,
    resource_version: Option<String>,
) -> Result<serde_json::Value, Error> {
    let status = serde_json::to_value(status).map_err(|e| Error::serialization(e.to_string()))?;
    let mut patch = serde_json::json!({ "status": status });
    if let Some(rv) = resource_version {
        patch["metadata"] = serde_json::json!({ "resourceVersion": rv });
    }
    Ok(patch)
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_model(&self, namespace: &str, name: &str) -> Result<Option<Model>, Error> {
        get_opt(Api::namespaced(self.client.clone(), namespace), name).await
    }

    async fn list_models(&self, namespace: Option<String>) -> Result<Vec<Model>, Error> {
        let api: Api<Model> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), &ns),
            None => Api::all(self.client.clone()),
        };
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn patch_model_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        status: &ModelStatus,
    ) -> Result<(), Error> {
        let api: Api<Model> = Api::namespaced(self.client.clone(), namespace);
        patch_status_guarded(api, name, resource_version, status).await
    }

    async fn get_model_source(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ModelSource>, Error> {
        get_opt(Api::namespaced(self.client.clone(), namespace), name).await
    }

    async fn patch_model_source_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        status: &ModelSourceStatus,
    ) -> Result<(), Error> {
        let api: Api<ModelSource> = Api::namespaced(self.client.clone(), namespace);
        patch_status_guarded(api, name, resource_version, status).await
    }

    async fn get_model_sync(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ModelSync>, Error> {
        get_opt(Api::namespaced(self.client.clone(), namespace), name).await
    }

    async fn patch_model_sync_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        status: &ModelSyncStatus,
    ) -> Result<(), Error> {
        let api: Api<ModelSync> = Api::namespaced(self.client.clone(), namespace);
        patch_status_guarded(api, name, resource_version, status).await
    }

    async fn get_model_reference(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ModelReference>, Error> {
        get_opt(Api::namespaced(self.client.clone(), namespace), name).await
    }

    async fn patch_model_reference_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        status: &ModelReferenceStatus,
    ) -> Result<(), Error> {
        let api: Api<ModelReference> = Api::namespaced(self.client.clone(), namespace);
        patch_status_guarded(api, name, resource_version, status).await
    }

    async fn add_finalizer(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let api = self.dynamic(kind, namespace)?;
        let obj = api.get(name).await?;
        let mut finalizers = obj.finalizers().to_vec();
        if finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }
        finalizers.push(finalizer.to_string());

        let patch = serde_json::json!({
            "metadata": {
                "resourceVersion": obj.resource_version(),
                "finalizers": finalizers,
            }
        });
        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        debug!(kind = %kind, namespace = %namespace, name = %name, "finalizer added");
        Ok(())
    }

    async fn remove_finalizer(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let api = self.dynamic(kind, namespace)?;
        let obj = match api.get(name).await {
            Ok(obj) => obj,
            Err(e) if is_not_found(&e) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if !obj.finalizers().iter().any(|f| f == finalizer) {
            return Ok(());
        }
        let finalizers: Vec<String> = obj
            .finalizers()
            .iter()
            .filter(|f| *f != finalizer)
            .cloned()
            .collect();

        let patch = serde_json::json!({
            "metadata": {
                "resourceVersion": obj.resource_version(),
                "finalizers": finalizers,
            }
        });
        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        debug!(kind = %kind, namespace = %namespace, name = %name, "finalizer removed");
        Ok(())
    }

    async fn set_annotation(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<(), Error> {
        let api = self.dynamic(kind, namespace)?;
        let mut annotations = serde_json::Map::new();
        annotations.insert(key.to_string(), serde_json::Value::String(value.to_string()));
        let patch = serde_json::json!({
            "metadata": { "annotations": annotations }
        });
        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_dataset(&self, namespace: &str, name: &str) -> Result<Option<Dataset>, Error> {
        get_opt(Api::namespaced(self.client.clone(), namespace), name).await
    }

    async fn create_dataset(&self, dataset: &Dataset) -> Result<(), Error> {
        let namespace = dataset
            .namespace()
            .ok_or_else(|| Error::validation("Dataset must be namespaced"))?;
        let api: Api<Dataset> = Api::namespaced(self.client.clone(), &namespace);
        let pp = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        api.create(&pp, dataset).await?;
        Ok(())
    }

    async fn replace_dataset(&self, dataset: &Dataset) -> Result<(), Error> {
        let namespace = dataset
            .namespace()
            .ok_or_else(|| Error::validation("Dataset must be namespaced"))?;
        let api: Api<Dataset> = Api::namespaced(self.client.clone(), &namespace);
        let pp = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        api.replace(&dataset.name_any(), &pp, dataset).await?;
        Ok(())
    }

    async fn delete_dataset(&self, namespace: &str, name: &str) -> Result<bool, Error> {
        let api: Api<Dataset> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => {
                debug!(dataset = %name, namespace = %namespace, "Dataset already deleted");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_datasets(
        &self,
        namespace: Option<String>,
        label_selector: &str,
    ) -> Result<Vec<Dataset>, Error> {
        let api: Api<Dataset> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), &ns),
            None => Api::all(self.client.clone()),
        };
        let lp = ListParams::default().labels(label_selector);
        Ok(api.list(&lp).await?.items)
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>, Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        get_opt(Api::namespaced(self.client.clone(), namespace), name).await
    }

    async fn get_pvc(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>, Error> {
        get_opt(Api::namespaced(self.client.clone(), namespace), name).await
    }
}
