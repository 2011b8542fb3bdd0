//! ModelReference reconciliation
//!
//! Resolves an alias to the Model version it names and records the dataset
//! that backs it.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, info, instrument};

use modelhub_common::conditions::set_condition;
use modelhub_common::crd::{Condition, ModelReference, RESOLVED};
use modelhub_common::naming::{object_key, owned_dataset_name};
use modelhub_common::{Error, ResourceKind};

use crate::context::{requeue_for, Context};
use crate::status::update_model_reference_status;

/// Requeue while the referenced model or version is missing
pub const UNRESOLVED_REQUEUE: Duration = Duration::from_secs(60);

/// Error policy for the ModelReference controller
pub fn error_policy(_reference: Arc<ModelReference>, error: &Error, _ctx: Arc<Context>) -> Action {
    requeue_for("ModelReference", error)
}

/// Reconcile a ModelReference
#[instrument(skip(reference, ctx), fields(reference = %reference.name_any()))]
pub async fn reconcile(reference: Arc<ModelReference>, ctx: Arc<Context>) -> Result<Action, Error> {
    let namespace = reference
        .namespace()
        .ok_or_else(|| Error::validation("ModelReference must be namespaced"))?;
    let name = reference.name_any();
    let kube = ctx.kube.as_ref();

    let Some(reference) = kube.get_model_reference(&namespace, &name).await? else {
        debug!("reference already deleted");
        return Ok(Action::await_change());
    };

    let spec = serde_json::to_value(&reference.spec).map_err(|e| {
        Error::serialization_for_kind(ResourceKind::ModelReference, e.to_string())
    })?;
    if let Err(e) = ctx.kinds.validate(
        ResourceKind::ModelReference,
        &object_key(&namespace, &name),
        &spec,
    ) {
        unresolved(&ctx, &namespace, &name, "InvalidSpec", e.to_string()).await?;
        return Ok(Action::await_change());
    }

    let model_name = &reference.spec.model_name;
    let version = &reference.spec.version;
    let Some(model) = ctx.registry.get_model(&namespace, model_name).await? else {
        unresolved(
            &ctx,
            &namespace,
            &name,
            "ModelNotFound",
            format!("Model {} not found", model_name),
        )
        .await?;
        return Ok(Action::requeue(UNRESOLVED_REQUEUE));
    };

    if model.spec.version(version).is_none() {
        unresolved(
            &ctx,
            &namespace,
            &name,
            "VersionNotFound",
            format!(
                "version {} not found in model {}; valid versions: {}",
                version,
                model_name,
                model.spec.version_names()
            ),
        )
        .await?;
        return Ok(Action::requeue(UNRESOLVED_REQUEUE));
    }

    let dataset = owned_dataset_name(model_name, version);
    info!(model = %model_name, version = %version, dataset = %dataset, "reference resolved");
    let message = format!("resolved to {}/{}", model_name, version);
    update_model_reference_status(ctx.kube.as_ref(), &namespace, &name, |status| {
        status.resolved_version = Some(version.clone());
        status.resolved_dataset = Some(dataset);
        set_condition(
            &mut status.conditions,
            Condition::truthy(RESOLVED, "ModelResolved", message),
        );
    })
    .await?;

    Ok(Action::await_change())
}

async fn unresolved(
    ctx: &Context,
    namespace: &str,
    name: &str,
    reason: &str,
    message: String,
) -> Result<(), Error> {
    info!(reason = %reason, message = %message, "reference unresolved");
    update_model_reference_status(ctx.kube.as_ref(), namespace, name, |status| {
        status.resolved_version = None;
        status.resolved_dataset = None;
        set_condition(
            &mut status.conditions,
            Condition::falsy(RESOLVED, reason, message),
        );
    })
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{model, reference, version, FakeCluster};
    use modelhub_common::conditions::find_condition;

    async fn run(fake: &Arc<FakeCluster>, name: &str) -> Action {
        let ctx = Arc::new(Context::for_testing(fake.clone()));
        let current = fake.reference("ml", name).expect("reference exists");
        reconcile(Arc::new(current), ctx).await.expect("reconcile succeeds")
    }

    fn resolved(fake: &FakeCluster, name: &str) -> Condition {
        let status = fake.reference("ml", name).unwrap().status.unwrap();
        find_condition(&status.conditions, RESOLVED).cloned().unwrap()
    }

    #[tokio::test]
    async fn resolves_existing_version_to_owned_dataset() {
        let fake = Arc::new(FakeCluster::new());
        fake.put_model(model("ml", "llama", "hf", vec![version("v1", "org/llama")]));
        fake.put_reference(reference("ml", "prod", "llama", "v1"));

        assert_eq!(run(&fake, "prod").await, Action::await_change());
        let status = fake.reference("ml", "prod").unwrap().status.unwrap();
        assert_eq!(status.resolved_version.as_deref(), Some("v1"));
        assert_eq!(status.resolved_dataset.as_deref(), Some("mdl-llama-v1"));
        assert_eq!(resolved(&fake, "prod").reason, "ModelResolved");

        let writes = fake.writes();
        run(&fake, "prod").await;
        assert_eq!(fake.writes(), writes);
    }

    #[tokio::test]
    async fn missing_model_is_unresolved() {
        let fake = Arc::new(FakeCluster::new());
        fake.put_reference(reference("ml", "prod", "ghost", "v1"));

        assert_eq!(run(&fake, "prod").await, Action::requeue(UNRESOLVED_REQUEUE));
        let cond = resolved(&fake, "prod");
        assert!(!cond.is_true());
        assert_eq!(cond.reason, "ModelNotFound");
    }

    #[tokio::test]
    async fn missing_version_is_unresolved() {
        let fake = Arc::new(FakeCluster::new());
        fake.put_model(model("ml", "llama", "hf", vec![version("v1", "org/llama")]));
        fake.put_reference(reference("ml", "prod", "llama", "v3"));

        assert_eq!(run(&fake, "prod").await, Action::requeue(UNRESOLVED_REQUEUE));
        let cond = resolved(&fake, "prod");
        assert_eq!(cond.reason, "VersionNotFound");
        assert!(cond.message.contains("valid versions: v1"));
    }

    #[tokio::test]
    async fn losing_the_version_clears_the_resolution() {
        let fake = Arc::new(FakeCluster::new());
        fake.put_model(model("ml", "llama", "hf", vec![version("v1", "org/llama")]));
        fake.put_reference(reference("ml", "prod", "llama", "v1"));
        run(&fake, "prod").await;

        fake.edit_model("ml", "llama", |spec| {
            spec.versions = vec![version("v2", "org/llama")];
        });
        assert_eq!(run(&fake, "prod").await, Action::requeue(UNRESOLVED_REQUEUE));
        let status = fake.reference("ml", "prod").unwrap().status.unwrap();
        assert_eq!(status.resolved_version, None);
        assert_eq!(status.resolved_dataset, None);
        assert_eq!(resolved(&fake, "prod").reason, "VersionNotFound");
    }

    #[tokio::test]
    async fn empty_model_name_is_invalid() {
        let fake = Arc::new(FakeCluster::new());
        fake.put_reference(reference("ml", "prod", "", "v1"));

        assert_eq!(run(&fake, "prod").await, Action::await_change());
        assert_eq!(resolved(&fake, "prod").reason, "InvalidSpec");
    }
}
