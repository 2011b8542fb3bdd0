//! Shared state handed to every reconciler

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::Client;
use tracing::warn;

use modelhub_common::{Error, KindRegistry};

use crate::client::{KubeClient, KubeClientImpl};
use crate::registry::{KubeRegistry, ModelRegistry};

/// Requeue delay after a retryable reconcile error
pub const RETRYABLE_REQUEUE: Duration = Duration::from_secs(5);

/// Requeue delay after a non-retryable reconcile error
pub const PERMANENT_REQUEUE: Duration = Duration::from_secs(60);

/// Controller context shared by the four reconcilers
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```text
/// let ctx = Context::builder(client, kinds).build();
/// ```
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Model and ModelSource lookup
    pub registry: Arc<dyn ModelRegistry>,
    /// Kind → API resource and spec validator, built once at startup
    pub kinds: Arc<KindRegistry>,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client, kinds: Arc<KindRegistry>) -> ContextBuilder {
        ContextBuilder::new(client, kinds)
    }

    /// Create a context over an arbitrary client, with a registry reading through it
    pub fn from_kube(kube: Arc<dyn KubeClient>, kinds: Arc<KindRegistry>) -> Self {
        let registry: Arc<dyn ModelRegistry> = Arc::new(KubeRegistry::new(kube.clone()));
        Self {
            kube,
            registry,
            kinds,
        }
    }

    /// Create a context for testing with a mock or fake client
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn KubeClient>) -> Self {
        Self::from_kube(kube, Arc::new(KindRegistry::builtin()))
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    kinds: Arc<KindRegistry>,
    kube: Option<Arc<dyn KubeClient>>,
    registry: Option<Arc<dyn ModelRegistry>>,
}

impl ContextBuilder {
    fn new(client: Client, kinds: Arc<KindRegistry>) -> Self {
        Self {
            client,
            kinds,
            kube: None,
            registry: None,
        }
    }

    /// Override the Kubernetes client
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the Model/ModelSource registry
    pub fn registry(mut self, registry: Arc<dyn ModelRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        let kube = self.kube.unwrap_or_else(|| {
            Arc::new(KubeClientImpl::new(self.client.clone(), self.kinds.clone()))
        });
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(KubeRegistry::new(kube.clone())));
        Context {
            kube,
            registry,
            kinds: self.kinds,
        }
    }
}

/// Error policy shared by every controller.
///
/// Retryable errors (conflicts, transient API failures) come back quickly;
/// everything else waits a minute or for the next change.
pub fn requeue_for(kind: &str, error: &Error) -> Action {
    let delay = if error.is_retryable() {
        RETRYABLE_REQUEUE
    } else {
        PERMANENT_REQUEUE
    };
    warn!(
        kind = %kind,
        error = %error,
        retryable = error.is_retryable(),
        requeue_secs = delay.as_secs(),
        "reconcile failed, will retry"
    );
    Action::requeue(delay)
}
