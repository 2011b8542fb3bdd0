//! Read-modify-write status helpers
//!
//! Each helper re-fetches the object immediately before writing, applies the
//! caller's closure to a copy of the current status, and skips the write when
//! nothing changed. The patch carries the fetched `resourceVersion`, so a
//! concurrent writer turns into a 409 Conflict that the controller retries.

use kube::ResourceExt;
use tracing::debug;

use modelhub_common::crd::{ModelReferenceStatus, ModelSourceStatus, ModelStatus, ModelSyncStatus};
use modelhub_common::Error;

use crate::client::KubeClient;

/// Apply `modify` to a copy of `current`; return the new status if it differs
fn modified<S>(current: Option<&S>, modify: impl FnOnce(&mut S)) -> Option<S>
where
    S: Clone + Default + PartialEq,
{
    let before = current.cloned().unwrap_or_default();
    let mut after = before.clone();
    modify(&mut after);
    (after != before).then_some(after)
}

/// Update a Model's status. Returns `true` when a write was issued.
pub async fn update_model_status(
    kube: &dyn KubeClient,
    namespace: &str,
    name: &str,
    modify: impl FnOnce(&mut ModelStatus) + Send,
) -> Result<bool, Error> {
    let Some(current) = kube.get_model(namespace, name).await? else {
        return Ok(false);
    };
    let Some(status) = modified(current.status.as_ref(), modify) else {
        debug!(model = %name, "status unchanged, skipping write");
        return Ok(false);
    };
    kube.patch_model_status(namespace, name, current.resource_version(), &status)
        .await?;
    Ok(true)
}

/// Update a ModelSource's status. Returns `true` when a write was issued.
pub async fn update_model_source_status(
    kube: &dyn KubeClient,
    namespace: &str,
    name: &str,
    modify: impl FnOnce(&mut ModelSourceStatus) + Send,
) -> Result<bool, Error> {
    let Some(current) = kube.get_model_source(namespace, name).await? else {
        return Ok(false);
    };
    let Some(status) = modified(current.status.as_ref(), modify) else {
        debug!(source = %name, "status unchanged, skipping write");
        return Ok(false);
    };
    kube.patch_model_source_status(namespace, name, current.resource_version(), &status)
        .await?;
    Ok(true)
}

/// Update a ModelSync's status. Returns `true` when a write was issued.
pub async fn update_model_sync_status(
    kube: &dyn KubeClient,
    namespace: &str,
    name: &str,
    modify: impl FnOnce(&mut ModelSyncStatus) + Send,
) -> Result<bool, Error> {
    let Some(current) = kube.get_model_sync(namespace, name).await? else {
        return Ok(false);
    };
    let Some(status) = modified(current.status.as_ref(), modify) else {
        debug!(sync = %name, "status unchanged, skipping write");
        return Ok(false);
    };
    kube.patch_model_sync_status(namespace, name, current.resource_version(), &status)
        .await?;
    Ok(true)
}

/// Update a ModelReference's status. Returns `true` when a write was issued.
pub async fn update_model_reference_status(
    kube: &dyn KubeClient,
    namespace: &str,
    name: &str,
    modify: impl FnOnce(&mut ModelReferenceStatus) + Send,
) -> Result<bool, Error> {
    let Some(current) = kube.get_model_reference(namespace, name).await? else {
        return Ok(false);
    };
    let Some(status) = modified(current.status.as_ref(), modify) else {
        debug!(reference = %name, "status unchanged, skipping write");
        return Ok(false);
    };
    kube.patch_model_reference_status(namespace, name, current.resource_version(), &status)
        .await?;
    Ok(true)
}
