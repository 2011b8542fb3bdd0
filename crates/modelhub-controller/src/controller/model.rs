//! Model reconciliation
//!
//! Converges one Model towards its declared versions:
//! - every PRESENT version gets an owned `mdl-<model>-<version>` Dataset
//! - every ABSENT version, or one removed from the spec, is marked ABSENT in
//!   status and its Dataset deleted
//! - shared versions get a reference Dataset in each admitted namespace
//!
//! Deletion is gated by a finalizer: reference datasets go first, then owned
//! datasets, then the finalizer is released.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use modelhub_common::conditions::set_condition;
use modelhub_common::crd::{
    Condition, Dataset, Model, ModelSource, ModelVersionState, SyncedVersion, READY,
};
use modelhub_common::kube_utils::{has_finalizer, is_being_deleted};
use modelhub_common::naming::{
    model_selector, object_key, owned_dataset_name, reference_dataset_name,
};
use modelhub_common::{Error, ResourceKind, MODEL_FINALIZER, RESYNC_ANNOTATION_KEY};

use crate::client::KubeClient;
use crate::context::{requeue_for, Context};
use crate::datasets::{ensure_dataset, is_reference_dataset, owned_dataset, reference_dataset};
use crate::status::update_model_status;
use crate::translate::{build_dataset_spec, reference_dataset_spec, secret_options};

/// Periodic re-check of a converged Model
pub const MODEL_RESYNC: Duration = Duration::from_secs(300);

/// Requeue while a dependency is missing or not ready
pub const DEPENDENCY_REQUEUE: Duration = Duration::from_secs(60);

/// Error policy for the Model controller
pub fn error_policy(_model: Arc<Model>, error: &Error, _ctx: Arc<Context>) -> Action {
    requeue_for("Model", error)
}

/// Reconcile a Model
///
/// The version pass and the sharing pass both run on every invocation; the
/// first error from either is returned so the controller retries the key.
#[instrument(skip(model, ctx), fields(model = %model.name_any()))]
pub async fn reconcile(model: Arc<Model>, ctx: Arc<Context>) -> Result<Action, Error> {
    let namespace = model
        .namespace()
        .ok_or_else(|| Error::validation("Model must be namespaced"))?;
    let name = model.name_any();
    let kube = ctx.kube.as_ref();

    let Some(model) = kube.get_model(&namespace, &name).await? else {
        debug!("model already deleted");
        return Ok(Action::await_change());
    };

    if is_being_deleted(&model) {
        return finalize(kube, &model, &namespace, &name).await;
    }

    if !has_finalizer(&model, MODEL_FINALIZER) {
        kube.add_finalizer(ResourceKind::Model, &namespace, &name, MODEL_FINALIZER)
            .await?;
    }

    let versions = reconcile_versions(&ctx, &model, &namespace, &name).await;
    let sharing = reconcile_sharing(kube, &model, &namespace, &name).await;

    let action = versions?;
    sharing?;
    Ok(action)
}

async fn reconcile_versions(
    ctx: &Context,
    model: &Model,
    namespace: &str,
    name: &str,
) -> Result<Action, Error> {
    let kube = ctx.kube.as_ref();
    let resource = object_key(namespace, name);

    let spec = serde_json::to_value(&model.spec)
        .map_err(|e| Error::serialization_for_kind(ResourceKind::Model, e.to_string()))?;
    if let Err(e) = ctx.kinds.validate(ResourceKind::Model, &resource, &spec) {
        warn!(error = %e, "model spec is invalid");
        set_ready(kube, namespace, name, Condition::falsy(READY, "InvalidSpec", e.to_string()))
            .await?;
        return Ok(Action::await_change());
    }

    let source_name = &model.spec.source_ref;
    let Some(source) = ctx.registry.get_model_source(namespace, source_name).await? else {
        info!(source = %source_name, "waiting for ModelSource");
        set_ready(
            kube,
            namespace,
            name,
            Condition::falsy(
                READY,
                "ModelSourceNotFound",
                format!("ModelSource {} not found", source_name),
            ),
        )
        .await?;
        return Ok(Action::requeue(DEPENDENCY_REQUEUE));
    };

    let secret_data = match source_credentials(kube, &source, namespace).await? {
        Credentials::Ready(data) => data,
        Credentials::NotReady(message) => {
            info!(source = %source_name, reason = %message, "ModelSource not ready");
            set_ready(
                kube,
                namespace,
                name,
                Condition::falsy(READY, "ModelSourceNotReady", message),
            )
            .await?;
            return Ok(Action::requeue(DEPENDENCY_REQUEUE));
        }
    };

    let resync = model.annotations().get(RESYNC_ANNOTATION_KEY).cloned();
    for version in &model.spec.versions {
        if version.desired_state() == ModelVersionState::Absent {
            retire_version(kube, namespace, name, &version.name).await?;
            continue;
        }

        let spec = match build_dataset_spec(version, &source.spec, secret_data.as_ref()) {
            Ok(spec) => spec,
            Err(e) => {
                warn!(version = %version.name, error = %e, "cannot translate model version");
                set_ready(
                    kube,
                    namespace,
                    name,
                    Condition::falsy(
                        READY,
                        "TranslationFailed",
                        format!("version {}: {}", version.name, e),
                    ),
                )
                .await?;
                return Ok(Action::requeue(DEPENDENCY_REQUEUE));
            }
        };

        let annotations = resync
            .iter()
            .map(|at| (RESYNC_ANNOTATION_KEY.to_string(), at.clone()))
            .collect();
        let desired = owned_dataset(
            model,
            owned_dataset_name(name, &version.name),
            namespace,
            name,
            &version.name,
            spec,
            annotations,
        )?;
        ensure_dataset(kube, desired).await?;
    }

    let removed: Vec<String> = model
        .status
        .iter()
        .flat_map(|s| s.synced_versions.iter())
        .filter(|sv| model.spec.version(&sv.name).is_none())
        .map(|sv| sv.name.clone())
        .collect();
    for version in &removed {
        retire_version(kube, namespace, name, version).await?;
    }

    let synced_versions = observe_versions(kube, model, namespace, name).await?;
    let generation = model.metadata.generation;
    let message = format!("{} version(s) reconciled", model.spec.versions.len());
    update_model_status(kube, namespace, name, |status| {
        status.synced_versions = synced_versions;
        status.observed_generation = generation;
        set_condition(
            &mut status.conditions,
            Condition::truthy(READY, "Reconciled", message),
        );
    })
    .await?;

    info!(versions = model.spec.versions.len(), "model reconciled");
    Ok(Action::requeue(MODEL_RESYNC))
}

enum Credentials {
    Ready(Option<BTreeMap<String, String>>),
    NotReady(String),
}

async fn source_credentials(
    kube: &dyn KubeClient,
    source: &ModelSource,
    namespace: &str,
) -> Result<Credentials, Error> {
    let Some(secret_name) = source.spec.secret_name() else {
        return Ok(Credentials::Ready(None));
    };
    if !source.credentials_ready() {
        return Ok(Credentials::NotReady(format!(
            "ModelSource {} credentials are not ready",
            source.name_any()
        )));
    }
    match kube.get_secret(namespace, secret_name).await? {
        Some(secret) => Ok(Credentials::Ready(Some(secret_options(&secret)))),
        None => Ok(Credentials::NotReady(format!(
            "Secret {} not found",
            secret_name
        ))),
    }
}

async fn set_ready(
    kube: &dyn KubeClient,
    namespace: &str,
    name: &str,
    condition: Condition,
) -> Result<(), Error> {
    update_model_status(kube, namespace, name, |status| {
        set_condition(&mut status.conditions, condition);
    })
    .await?;
    Ok(())
}

/// Mark a version ABSENT in status, then delete its owned dataset.
async fn retire_version(
    kube: &dyn KubeClient,
    namespace: &str,
    name: &str,
    version: &str,
) -> Result<(), Error> {
    let dataset = owned_dataset_name(name, version);
    if kube.get_dataset(namespace, &dataset).await?.is_none() {
        return Ok(());
    }

    update_model_status(kube, namespace, name, |status| {
        match status.synced_versions.iter_mut().find(|v| v.name == version) {
            Some(entry) => entry.observed_state = ModelVersionState::Absent,
            None => status.synced_versions.push(SyncedVersion {
                name: version.to_string(),
                active_dataset: Some(dataset.clone()),
                observed_state: ModelVersionState::Absent,
                ..Default::default()
            }),
        }
    })
    .await?;

    if kube.delete_dataset(namespace, &dataset).await? {
        info!(version = %version, dataset = %dataset, "deleted Dataset for absent version");
    }
    Ok(())
}

/// Rebuild `syncedVersions` from the spec and the live datasets.
///
/// Entries for versions removed from the spec survive, marked ABSENT, while
/// their dataset still exists.
async fn observe_versions(
    kube: &dyn KubeClient,
    model: &Model,
    namespace: &str,
    name: &str,
) -> Result<Vec<SyncedVersion>, Error> {
    let mut synced = Vec::with_capacity(model.spec.versions.len());
    for version in &model.spec.versions {
        let dataset = kube
            .get_dataset(namespace, &owned_dataset_name(name, &version.name))
            .await?;
        let mut entry = observe_dataset(kube, namespace, &version.name, dataset).await?;
        entry.observed_state = version.desired_state();
        entry.observed_version_hash = Some(version.content_hash());
        synced.push(entry);
    }

    let removed = model
        .status
        .iter()
        .flat_map(|s| s.synced_versions.iter())
        .filter(|sv| model.spec.version(&sv.name).is_none());
    for previous in removed {
        let Some(dataset) = kube
            .get_dataset(namespace, &owned_dataset_name(name, &previous.name))
            .await?
        else {
            debug!(version = %previous.name, "dropping status for removed version");
            continue;
        };
        let mut entry = observe_dataset(kube, namespace, &previous.name, Some(dataset)).await?;
        entry.observed_state = ModelVersionState::Absent;
        entry.observed_version_hash = previous.observed_version_hash.clone();
        synced.push(entry);
    }
    Ok(synced)
}

async fn observe_dataset(
    kube: &dyn KubeClient,
    namespace: &str,
    version: &str,
    dataset: Option<Dataset>,
) -> Result<SyncedVersion, Error> {
    let Some(dataset) = dataset else {
        return Ok(SyncedVersion {
            name: version.to_string(),
            ..Default::default()
        });
    };

    let phase = dataset.phase();
    let active_dataset = dataset.name_any();
    let status = dataset.status.unwrap_or_default();
    let observed_storage = match status.pvc_name.as_deref() {
        Some(pvc) => kube
            .get_pvc(namespace, pvc)
            .await?
            .as_ref()
            .and_then(storage_request),
        None => None,
    };

    Ok(SyncedVersion {
        name: version.to_string(),
        phase: Some(phase.to_string()),
        pvc_name: status.pvc_name,
        active_dataset: Some(active_dataset),
        last_sync_time: status.last_sync_time,
        observed_storage,
        conditions: status.conditions,
        ..Default::default()
    })
}

fn storage_request(pvc: &PersistentVolumeClaim) -> Option<String> {
    pvc.spec
        .as_ref()?
        .resources
        .as_ref()?
        .requests
        .as_ref()?
        .get("storage")
        .map(|q| q.0.clone())
}

/// Replicate shared versions into admitted namespaces and prune the rest.
///
/// Every reference dataset labelled for this model that is not in the desired
/// set is deleted: disabled sharing, ABSENT or removed versions, and
/// namespaces that no longer match all end up here.
async fn reconcile_sharing(
    kube: &dyn KubeClient,
    model: &Model,
    namespace: &str,
    name: &str,
) -> Result<(), Error> {
    let existing: Vec<Dataset> = kube
        .list_datasets(None, &model_selector(namespace, name))
        .await?
        .into_iter()
        .filter(is_reference_dataset)
        .collect();

    let shared: Vec<_> = model
        .spec
        .versions
        .iter()
        .filter(|v| v.share_enabled() && v.desired_state() == ModelVersionState::Present)
        .collect();
    let namespaces = if shared.is_empty() {
        Vec::new()
    } else {
        kube.list_namespaces().await?
    };

    let mut keep = BTreeSet::new();
    for version in shared {
        let Some(share) = version.share.as_ref() else {
            continue;
        };
        let dataset = reference_dataset_name(namespace, name, &version.name);
        for target in &namespaces {
            let target_ns = target.name_any();
            if target_ns == namespace || !share.admits(target.labels()) {
                continue;
            }
            let desired = reference_dataset(
                &target_ns,
                dataset.clone(),
                namespace,
                name,
                &version.name,
                reference_dataset_spec(namespace, name, &version.name),
            );
            ensure_dataset(kube, desired).await?;
            keep.insert((target_ns, dataset.clone()));
        }
    }

    for stale in existing {
        let key = (stale.namespace().unwrap_or_default(), stale.name_any());
        if keep.contains(&key) {
            continue;
        }
        if kube.delete_dataset(&key.0, &key.1).await? {
            info!(dataset = %key.1, namespace = %key.0, "removed reference dataset");
        }
    }
    Ok(())
}

async fn finalize(
    kube: &dyn KubeClient,
    model: &Model,
    namespace: &str,
    name: &str,
) -> Result<Action, Error> {
    if !has_finalizer(model, MODEL_FINALIZER) {
        return Ok(Action::await_change());
    }
    info!("model deleted, removing datasets");

    let labelled = kube
        .list_datasets(None, &model_selector(namespace, name))
        .await?;
    for reference in labelled.iter().filter(|ds| is_reference_dataset(ds)) {
        let target = reference.namespace().unwrap_or_default();
        kube.delete_dataset(&target, &reference.name_any()).await?;
    }

    let uid = model.uid();
    let mut owned: BTreeSet<String> = labelled
        .iter()
        .filter(|ds| ds.namespace().as_deref() == Some(namespace))
        .filter(|ds| ds.owner_references().iter().any(|o| Some(&o.uid) == uid.as_ref()))
        .map(|ds| ds.name_any())
        .collect();
    owned.extend(
        model
            .spec
            .versions
            .iter()
            .map(|v| owned_dataset_name(name, &v.name)),
    );
    owned.extend(
        model
            .status
            .iter()
            .flat_map(|s| s.synced_versions.iter())
            .map(|sv| owned_dataset_name(name, &sv.name)),
    );
    for dataset in &owned {
        kube.delete_dataset(namespace, dataset).await?;
    }

    kube.remove_finalizer(ResourceKind::Model, namespace, name, MODEL_FINALIZER)
        .await?;
    info!(datasets = owned.len(), "model cleanup complete");
    Ok(Action::await_change())
}
