//! ModelSource reconciliation
//!
//! Validates the source's credentials, records which Models use it, and holds
//! deletion until no Model references it.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, info, instrument};

use modelhub_common::conditions::set_condition;
use modelhub_common::crd::{Condition, ModelSource, CREDENTIALS_READY, DELETION_BLOCKED};
use modelhub_common::kube_utils::{has_finalizer, is_being_deleted};
use modelhub_common::naming::object_key;
use modelhub_common::{Error, ResourceKind, MODEL_SOURCE_FINALIZER};

use crate::client::KubeClient;
use crate::context::{requeue_for, Context};
use crate::status::update_model_source_status;
use crate::translate::secret_options;

/// Periodic credential revalidation
pub const SOURCE_RESYNC: Duration = Duration::from_secs(300);

/// Poll interval while deletion waits on referencing Models
pub const DELETION_BLOCKED_REQUEUE: Duration = Duration::from_secs(30);

/// Error policy for the ModelSource controller
pub fn error_policy(_source: Arc<ModelSource>, error: &Error, _ctx: Arc<Context>) -> Action {
    requeue_for("ModelSource", error)
}

/// Reconcile a ModelSource
#[instrument(skip(source, ctx), fields(source = %source.name_any()))]
pub async fn reconcile(source: Arc<ModelSource>, ctx: Arc<Context>) -> Result<Action, Error> {
    let namespace = source
        .namespace()
        .ok_or_else(|| Error::validation("ModelSource must be namespaced"))?;
    let name = source.name_any();
    let kube = ctx.kube.as_ref();

    let Some(source) = kube.get_model_source(&namespace, &name).await? else {
        debug!("source already deleted");
        return Ok(Action::await_change());
    };

    let referenced_by = referencing_models(kube, &namespace, &name).await?;

    if is_being_deleted(&source) {
        if !has_finalizer(&source, MODEL_SOURCE_FINALIZER) {
            return Ok(Action::await_change());
        }
        if !referenced_by.is_empty() {
            info!(models = ?referenced_by, "deletion blocked by referencing models");
            let message = format!("still referenced by {}", referenced_by.join(", "));
            update_model_source_status(kube, &namespace, &name, |status| {
                status.referenced_by = referenced_by;
                set_condition(
                    &mut status.conditions,
                    Condition::truthy(DELETION_BLOCKED, "ReferencedByModels", message),
                );
            })
            .await?;
            return Ok(Action::requeue(DELETION_BLOCKED_REQUEUE));
        }
        kube.remove_finalizer(
            ResourceKind::ModelSource,
            &namespace,
            &name,
            MODEL_SOURCE_FINALIZER,
        )
        .await?;
        info!("no models reference the source, deletion released");
        return Ok(Action::await_change());
    }

    if !has_finalizer(&source, MODEL_SOURCE_FINALIZER) {
        kube.add_finalizer(
            ResourceKind::ModelSource,
            &namespace,
            &name,
            MODEL_SOURCE_FINALIZER,
        )
        .await?;
    }

    let credentials = check_credentials(kube, &source, &namespace).await?;
    debug!(reason = %credentials.reason, ready = credentials.is_true(), "credentials checked");

    update_model_source_status(kube, &namespace, &name, |status| {
        status.referenced_by = referenced_by;
        status.conditions.retain(|c| c.type_ != DELETION_BLOCKED);
        set_condition(&mut status.conditions, credentials);
    })
    .await?;

    Ok(Action::requeue(SOURCE_RESYNC))
}

/// `namespace/name` of every Model in the source's namespace that uses it, sorted
async fn referencing_models(
    kube: &dyn KubeClient,
    namespace: &str,
    name: &str,
) -> Result<Vec<String>, Error> {
    let mut models: Vec<String> = kube
        .list_models(Some(namespace.to_string()))
        .await?
        .iter()
        .filter(|m| m.spec.source_ref == name)
        .map(|m| object_key(namespace, &m.name_any()))
        .collect();
    models.sort();
    Ok(models)
}

async fn check_credentials(
    kube: &dyn KubeClient,
    source: &ModelSource,
    namespace: &str,
) -> Result<Condition, Error> {
    let Some(secret_name) = source.spec.secret_name() else {
        return Ok(Condition::truthy(
            CREDENTIALS_READY,
            "NoSecretRequired",
            "source declares no secret",
        ));
    };

    let condition = match kube.get_secret(namespace, secret_name).await? {
        None => Condition::falsy(
            CREDENTIALS_READY,
            "SecretNotFound",
            format!("Secret {} not found", secret_name),
        ),
        Some(secret) if secret_options(&secret).is_empty() => Condition::falsy(
            CREDENTIALS_READY,
            "SecretEmpty",
            format!("Secret {} has no data", secret_name),
        ),
        Some(_) => Condition::truthy(
            CREDENTIALS_READY,
            "SecretValid",
            format!("Secret {} is present", secret_name),
        ),
    };
    Ok(condition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{model, source, source_with_secret, FakeCluster};
    use modelhub_common::conditions::find_condition;
    use modelhub_common::crd::SourceType;

    async fn run(fake: &Arc<FakeCluster>, name: &str) -> Action {
        let ctx = Arc::new(Context::for_testing(fake.clone()));
        let current = fake.source("ml", name).expect("source exists");
        reconcile(Arc::new(current), ctx).await.expect("reconcile succeeds")
    }

    fn condition(fake: &FakeCluster, name: &str, type_: &str) -> Option<Condition> {
        let status = fake.source("ml", name)?.status?;
        find_condition(&status.conditions, type_).cloned()
    }

    #[tokio::test]
    async fn source_without_secret_is_ready() {
        let fake = Arc::new(FakeCluster::new());
        fake.put_source(source("ml", "hf", SourceType::HuggingFace));

        assert_eq!(run(&fake, "hf").await, Action::requeue(SOURCE_RESYNC));
        let cond = condition(&fake, "hf", CREDENTIALS_READY).unwrap();
        assert!(cond.is_true());
        assert_eq!(cond.reason, "NoSecretRequired");
        assert!(has_finalizer(&fake.source("ml", "hf").unwrap(), MODEL_SOURCE_FINALIZER));
    }

    #[tokio::test]
    async fn secret_states_map_to_reasons() {
        let fake = Arc::new(FakeCluster::new());
        fake.put_source(source_with_secret("ml", "missing", SourceType::S3, "nope"));
        fake.put_source(source_with_secret("ml", "empty", SourceType::S3, "blank"));
        fake.put_source(source_with_secret("ml", "valid", SourceType::S3, "creds"));
        fake.put_secret("ml", "blank", &[]);
        fake.put_secret("ml", "creds", &[("AWS_ACCESS_KEY_ID", "AKIA")]);

        for (name, ready, reason) in [
            ("missing", false, "SecretNotFound"),
            ("empty", false, "SecretEmpty"),
            ("valid", true, "SecretValid"),
        ] {
            run(&fake, name).await;
            let cond = condition(&fake, name, CREDENTIALS_READY).unwrap();
            assert_eq!(cond.is_true(), ready, "{}", name);
            assert_eq!(cond.reason, reason, "{}", name);
        }
    }

    #[tokio::test]
    async fn referenced_by_lists_models_in_the_same_namespace() {
        let fake = Arc::new(FakeCluster::new());
        fake.put_source(source("ml", "hf", SourceType::HuggingFace));
        fake.put_model(model("ml", "qwen", "hf", vec![]));
        fake.put_model(model("ml", "llama", "hf", vec![]));
        fake.put_model(model("ml", "other", "s3", vec![]));
        fake.put_model(model("team-a", "llama", "hf", vec![]));

        run(&fake, "hf").await;
        let status = fake.source("ml", "hf").unwrap().status.unwrap();
        assert_eq!(status.referenced_by, vec!["ml/llama", "ml/qwen"]);
    }

    #[tokio::test]
    async fn referenced_by_empties_when_the_last_model_goes() {
        let fake = Arc::new(FakeCluster::new());
        fake.put_source(source("ml", "hf", SourceType::HuggingFace));
        fake.put_model(model("ml", "llama", "hf", vec![]));
        run(&fake, "hf").await;

        fake.delete(ResourceKind::Model, "ml", "llama");
        run(&fake, "hf").await;
        let status = fake.source("ml", "hf").unwrap().status.unwrap();
        assert!(status.referenced_by.is_empty());
    }

    #[tokio::test]
    async fn deletion_waits_for_referencing_models() {
        let fake = Arc::new(FakeCluster::new());
        fake.put_source(source("ml", "hf", SourceType::HuggingFace));
        fake.put_model(model("ml", "llama", "hf", vec![]));
        run(&fake, "hf").await;

        fake.delete(ResourceKind::ModelSource, "ml", "hf");
        assert_eq!(run(&fake, "hf").await, Action::requeue(DELETION_BLOCKED_REQUEUE));
        let blocked = condition(&fake, "hf", DELETION_BLOCKED).unwrap();
        assert!(blocked.is_true());
        assert_eq!(blocked.reason, "ReferencedByModels");
        assert!(blocked.message.contains("ml/llama"));

        fake.delete(ResourceKind::Model, "ml", "llama");
        assert_eq!(run(&fake, "hf").await, Action::await_change());
        assert!(fake.source("ml", "hf").is_none());
    }

    #[tokio::test]
    async fn steady_state_reconcile_is_write_free() {
        let fake = Arc::new(FakeCluster::new());
        fake.put_source(source_with_secret("ml", "s3", SourceType::S3, "creds"));
        fake.put_secret("ml", "creds", &[("AWS_ACCESS_KEY_ID", "AKIA")]);
        fake.put_model(model("ml", "llama", "s3", vec![]));

        run(&fake, "s3").await;
        let writes = fake.writes();
        run(&fake, "s3").await;
        assert_eq!(fake.writes(), writes);
    }
}
