//! Lookup of Models and ModelSources by namespace and name
//!
//! ModelSync and ModelReference resolve their targets through
//! [`ModelRegistry`] rather than the raw client, so resolution can be backed
//! by the API server or by an in-memory table.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use kube::ResourceExt;

#[cfg(test)]
use mockall::automock;

use modelhub_common::crd::{Model, ModelSource};
use modelhub_common::Error;

use crate::client::KubeClient;

/// Resolves Model and ModelSource references for reconciliation.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    /// Look up a Model; `Ok(None)` when it does not exist
    async fn get_model(&self, namespace: &str, name: &str) -> Result<Option<Model>, Error>;

    /// Look up a ModelSource; `Ok(None)` when it does not exist
    async fn get_model_source(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ModelSource>, Error>;
}

/// Registry backed by the Kubernetes API
pub struct KubeRegistry {
    kube: Arc<dyn KubeClient>,
}

impl KubeRegistry {
    /// Create a registry that reads through `kube`
    pub fn new(kube: Arc<dyn KubeClient>) -> Self {
        Self { kube }
    }
}

#[async_trait]
impl ModelRegistry for KubeRegistry {
    async fn get_model(&self, namespace: &str, name: &str) -> Result<Option<Model>, Error> {
        self.kube.get_model(namespace, name).await
    }

    async fn get_model_source(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ModelSource>, Error> {
        self.kube.get_model_source(namespace, name).await
    }
}

/// Registry holding objects in memory, keyed by `(namespace, name)`
#[derive(Default)]
pub struct InMemoryRegistry {
    models: DashMap<(String, String), Model>,
    sources: DashMap<(String, String), ModelSource>,
}

fn key_of<K: ResourceExt>(obj: &K) -> (String, String) {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

impl InMemoryRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a Model
    pub fn set_model(&self, model: Model) {
        self.models.insert(key_of(&model), model);
    }

    /// Insert or replace a ModelSource
    pub fn set_model_source(&self, source: ModelSource) {
        self.sources.insert(key_of(&source), source);
    }

    /// Forget a Model
    pub fn remove_model(&self, namespace: &str, name: &str) {
        self.models
            .remove(&(namespace.to_string(), name.to_string()));
    }

    /// Forget a ModelSource
    pub fn remove_model_source(&self, namespace: &str, name: &str) {
        self.sources
            .remove(&(namespace.to_string(), name.to_string()));
    }
}

#[async_trait]
impl ModelRegistry for InMemoryRegistry {
    async fn get_model(&self, namespace: &str, name: &str) -> Result<Option<Model>, Error> {
        Ok(self
            .models
            .get(&(namespace.to_string(), name.to_string()))
            .map(|m| m.clone()))
    }

    async fn get_model_source(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ModelSource>, Error> {
        Ok(self
            .sources
            .get(&(namespace.to_string(), name.to_string()))
            .map(|s| s.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockKubeClient;
    use crate::testing::{model, source};
    use modelhub_common::crd::SourceType;

    #[tokio::test]
    async fn in_memory_registry_resolves_by_namespace_and_name() {
        let registry = InMemoryRegistry::new();
        registry.set_model(model("ml", "llama", "hf", vec![]));
        registry.set_model_source(source("ml", "hf", SourceType::HuggingFace));

        assert!(registry.get_model("ml", "llama").await.unwrap().is_some());
        assert!(registry.get_model("other", "llama").await.unwrap().is_none());
        assert!(registry.get_model_source("ml", "hf").await.unwrap().is_some());

        registry.remove_model("ml", "llama");
        registry.remove_model_source("ml", "hf");
        assert!(registry.get_model("ml", "llama").await.unwrap().is_none());
        assert!(registry.get_model_source("ml", "hf").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn kube_registry_delegates_to_client() {
        let mut mock = MockKubeClient::new();
        mock.expect_get_model()
            .withf(|ns, name| ns == "ml" && name == "llama")
            .returning(|_, _| Ok(Some(model("ml", "llama", "hf", vec![]))));
        mock.expect_get_model_source()
            .returning(|_, _| Ok(None));

        let registry = KubeRegistry::new(Arc::new(mock));
        let found = registry.get_model("ml", "llama").await.unwrap();
        assert_eq!(found.map(|m| m.spec.source_ref), Some("hf".to_string()));
        assert!(registry.get_model_source("ml", "hf").await.unwrap().is_none());
    }
}
