//! ModelSync reconciliation
//!
//! A ModelSync asks for one model version to be materialized as a Dataset it
//! owns (`<model>-<version>`). The reconciler polls that Dataset's phase and
//! reports it through the `SyncReady` condition.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use modelhub_common::conditions::set_condition;
use modelhub_common::crd::{Condition, DatasetPhase, ModelSync, SYNC_READY};
use modelhub_common::naming::{object_key, sync_dataset_name};
use modelhub_common::{Error, ResourceKind};

use crate::client::KubeClient;
use crate::context::{requeue_for, Context};
use crate::datasets::{ensure_dataset, owned_dataset, EnsureOutcome};
use crate::status::update_model_sync_status;
use crate::translate::{build_dataset_spec, secret_options};

/// Poll interval while the dataset is pending or not yet visible
pub const PENDING_REQUEUE: Duration = Duration::from_secs(10);

/// Poll interval while the dataset is syncing
pub const PROCESSING_REQUEUE: Duration = Duration::from_secs(30);

/// Back-off after the dataset reports failure
pub const FAILED_REQUEUE: Duration = Duration::from_secs(300);

/// Requeue for missing dependencies and invalid declarations
pub const ERROR_REQUEUE: Duration = Duration::from_secs(60);

/// Dataset condition types copied onto the ModelSync as `Dataset<Type>`
pub const MIRRORED_CONDITIONS: [&str; 3] = ["JobStatus", "PVC", "Config"];

/// Error policy for the ModelSync controller
pub fn error_policy(_sync: Arc<ModelSync>, error: &Error, _ctx: Arc<Context>) -> Action {
    requeue_for("ModelSync", error)
}

/// `SyncReady` condition and requeue for a dataset phase
pub fn phase_outcome(phase: &DatasetPhase) -> (Condition, Action) {
    match phase {
        DatasetPhase::Ready => (
            Condition::truthy(SYNC_READY, "DatasetReady", "dataset is ready"),
            Action::await_change(),
        ),
        DatasetPhase::Processing => (
            Condition::falsy(SYNC_READY, "DatasetProcessing", "dataset sync in progress"),
            Action::requeue(PROCESSING_REQUEUE),
        ),
        DatasetPhase::Failed => (
            Condition::falsy(SYNC_READY, "DatasetFailed", "dataset sync failed"),
            Action::requeue(FAILED_REQUEUE),
        ),
        DatasetPhase::Pending | DatasetPhase::Unknown => (
            Condition::falsy(SYNC_READY, "DatasetPending", "waiting for dataset sync to start"),
            Action::requeue(PENDING_REQUEUE),
        ),
    }
}

/// Reconcile a ModelSync
#[instrument(skip(sync, ctx), fields(sync = %sync.name_any()))]
pub async fn reconcile(sync: Arc<ModelSync>, ctx: Arc<Context>) -> Result<Action, Error> {
    let namespace = sync
        .namespace()
        .ok_or_else(|| Error::validation("ModelSync must be namespaced"))?;
    let name = sync.name_any();
    let kube = ctx.kube.as_ref();

    let Some(sync) = kube.get_model_sync(&namespace, &name).await? else {
        debug!("sync already deleted");
        return Ok(Action::await_change());
    };

    let spec = serde_json::to_value(&sync.spec)
        .map_err(|e| Error::serialization_for_kind(ResourceKind::ModelSync, e.to_string()))?;
    if let Err(e) = ctx
        .kinds
        .validate(ResourceKind::ModelSync, &object_key(&namespace, &name), &spec)
    {
        warn!(error = %e, "sync spec is invalid");
        fail(kube, &namespace, &name, "InvalidSpec", e.to_string()).await?;
        return Ok(Action::await_change());
    }

    let model_name = &sync.spec.model_ref;
    let Some(model) = ctx.registry.get_model(&namespace, model_name).await? else {
        return fail(
            kube,
            &namespace,
            &name,
            "ModelNotFound",
            format!("Model {} not found", model_name),
        )
        .await;
    };

    let source_name = &model.spec.source_ref;
    let Some(source) = ctx.registry.get_model_source(&namespace, source_name).await? else {
        return fail(
            kube,
            &namespace,
            &name,
            "ModelSourceNotFound",
            format!("ModelSource {} not found", source_name),
        )
        .await;
    };

    let Some(version) = model.spec.version(&sync.spec.version) else {
        return fail(
            kube,
            &namespace,
            &name,
            "InvalidVersion",
            format!(
                "version {} not found in model {}; valid versions: {}",
                sync.spec.version,
                model_name,
                model.spec.version_names()
            ),
        )
        .await;
    };

    let secret_data = match source.spec.secret_name() {
        Some(secret_name) => match kube.get_secret(&namespace, secret_name).await? {
            Some(secret) => Some(secret_options(&secret)),
            None => {
                return fail(
                    kube,
                    &namespace,
                    &name,
                    "DatasetCreationFailed",
                    format!("Secret {} not found", secret_name),
                )
                .await;
            }
        },
        None => None,
    };

    let dataset_spec = match build_dataset_spec(version, &source.spec, secret_data.as_ref()) {
        Ok(spec) => spec,
        Err(e) => {
            warn!(error = %e, "cannot translate model version");
            return fail(kube, &namespace, &name, "DatasetCreationFailed", e.to_string()).await;
        }
    };

    let dataset_name = sync_dataset_name(model_name, &version.name);
    let desired = owned_dataset(
        &sync,
        dataset_name.clone(),
        &namespace,
        model_name,
        &version.name,
        dataset_spec,
        BTreeMap::new(),
    )?;
    if let EnsureOutcome::OwnedElsewhere { owner } = ensure_dataset(kube, desired).await? {
        return fail(
            kube,
            &namespace,
            &name,
            "DatasetOwnedElsewhere",
            format!("Dataset {} is controlled by {}", dataset_name, owner),
        )
        .await;
    }

    let Some(dataset) = kube.get_dataset(&namespace, &dataset_name).await? else {
        info!(dataset = %dataset_name, "dataset not visible yet");
        update_model_sync_status(kube, &namespace, &name, |status| {
            set_condition(
                &mut status.conditions,
                Condition::falsy(
                    SYNC_READY,
                    "DatasetNotFound",
                    format!("Dataset {} not found", dataset_name),
                ),
            );
        })
        .await?;
        return Ok(Action::requeue(PENDING_REQUEUE));
    };

    let phase = dataset.phase();
    let (condition, action) = phase_outcome(&phase);
    let observed = dataset.status.unwrap_or_default();
    info!(dataset = %dataset_name, phase = %phase, "dataset phase observed");

    update_model_sync_status(kube, &namespace, &name, |status| {
        set_condition(&mut status.conditions, condition);
        for mirrored in observed
            .conditions
            .into_iter()
            .filter(|c| MIRRORED_CONDITIONS.contains(&c.type_.as_str()))
        {
            set_condition(
                &mut status.conditions,
                Condition {
                    type_: format!("Dataset{}", mirrored.type_),
                    ..mirrored
                },
            );
        }
        if observed.last_sync_time.is_some() {
            status.last_synced_at = observed.last_sync_time;
        }
    })
    .await?;

    Ok(action)
}

/// Record `SyncReady=False` with `reason` and requeue after a minute
async fn fail(
    kube: &dyn KubeClient,
    namespace: &str,
    name: &str,
    reason: &str,
    message: String,
) -> Result<Action, Error> {
    info!(reason = %reason, message = %message, "sync not possible yet");
    update_model_sync_status(kube, namespace, name, |status| {
        set_condition(
            &mut status.conditions,
            Condition::falsy(SYNC_READY, reason, message),
        );
    })
    .await?;
    Ok(Action::requeue(ERROR_REQUEUE))
}
