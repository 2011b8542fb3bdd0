//! Idempotent creation of derived Datasets
//!
//! Every dataset modelhub writes goes through [`ensure_dataset`], which only
//! issues a write when the live object is missing or differs from what the
//! reconciler wants. Re-running a reconcile against an unchanged cluster is
//! therefore free of writes.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, warn};

use modelhub_common::crd::{Dataset, DatasetSpec};
use modelhub_common::naming::model_version_labels;
use modelhub_common::Error;

use crate::client::KubeClient;

/// What [`ensure_dataset`] did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// The dataset did not exist and was created
    Created,
    /// The dataset existed and was replaced
    Updated,
    /// The dataset already matched
    Unchanged,
    /// The dataset is controlled by another object and was left alone
    OwnedElsewhere {
        /// `Kind/name` of the controlling owner
        owner: String,
    },
}

/// Create `desired` or bring the live object in line with it.
///
/// The live object is replaced only when its spec differs, when one of the
/// desired labels or annotations is missing or different, or when its owner
/// references differ. Labels and annotations set by others are preserved.
/// A live object controlled by a different owner is never taken over.
pub async fn ensure_dataset(kube: &dyn KubeClient, desired: Dataset) -> Result<EnsureOutcome, Error> {
    let namespace = desired
        .namespace()
        .ok_or_else(|| Error::validation("Dataset must be namespaced"))?;
    let name = desired.name_any();

    let Some(existing) = kube.get_dataset(&namespace, &name).await? else {
        kube.create_dataset(&desired).await?;
        info!(dataset = %name, namespace = %namespace, "created Dataset");
        return Ok(EnsureOutcome::Created);
    };

    if let Some(owner) = foreign_controller(&existing, &desired) {
        warn!(dataset = %name, namespace = %namespace, owner = %owner, "Dataset controlled by another object");
        return Ok(EnsureOutcome::OwnedElsewhere { owner });
    }

    if !needs_update(&existing, &desired) {
        debug!(dataset = %name, namespace = %namespace, "Dataset up to date");
        return Ok(EnsureOutcome::Unchanged);
    }

    let mut merged = existing;
    merged.spec = desired.spec;
    merged
        .labels_mut()
        .extend(desired.metadata.labels.unwrap_or_default());
    merged
        .annotations_mut()
        .extend(desired.metadata.annotations.unwrap_or_default());
    merged.metadata.owner_references = desired.metadata.owner_references;
    kube.replace_dataset(&merged).await?;
    info!(dataset = %name, namespace = %namespace, "updated Dataset");
    Ok(EnsureOutcome::Updated)
}

fn controller_of(dataset: &Dataset) -> Option<&OwnerReference> {
    dataset
        .owner_references()
        .iter()
        .find(|o| o.controller == Some(true))
}

/// `Kind/name` of the live controller when it is not the one `desired` names
fn foreign_controller(existing: &Dataset, desired: &Dataset) -> Option<String> {
    let wanted = controller_of(desired)?;
    let live = controller_of(existing)?;
    (live.uid != wanted.uid).then(|| format!("{}/{}", live.kind, live.name))
}

fn needs_update(existing: &Dataset, desired: &Dataset) -> bool {
    existing.spec != desired.spec
        || !contains_all(existing.labels(), desired.labels())
        || !contains_all(existing.annotations(), desired.annotations())
        || existing.owner_references() != desired.owner_references()
}

fn contains_all(have: &BTreeMap<String, String>, want: &BTreeMap<String, String>) -> bool {
    want.iter().all(|(k, v)| have.get(k) == Some(v))
}

/// Controller owner reference for `owner`; fails when the object has no uid yet
pub fn owner_reference<K>(owner: &K) -> Result<OwnerReference, Error>
where
    K: Resource<DynamicType = ()>,
{
    owner.controller_owner_ref(&()).ok_or_else(|| {
        Error::internal_with_context(
            "owner_reference",
            format!("{} {} has no uid", K::kind(&()), owner.meta().name.as_deref().unwrap_or_default()),
        )
    })
}

/// Dataset owned by `owner`, labelled with the model and version it serves
pub fn owned_dataset<K>(
    owner: &K,
    name: String,
    model_namespace: &str,
    model_name: &str,
    version: &str,
    spec: DatasetSpec,
    annotations: BTreeMap<String, String>,
) -> Result<Dataset, Error>
where
    K: Resource<DynamicType = ()>,
{
    let owner_ref = owner_reference(owner)?;
    Ok(Dataset {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(model_namespace.to_string()),
            labels: Some(model_version_labels(model_namespace, model_name, version)),
            annotations: (!annotations.is_empty()).then_some(annotations),
            owner_references: Some(vec![owner_ref]),
            ..Default::default()
        },
        spec,
        status: None,
    })
}

/// Reference dataset in `target_namespace`; carries labels but no owner
pub fn reference_dataset(
    target_namespace: &str,
    name: String,
    model_namespace: &str,
    model_name: &str,
    version: &str,
    spec: DatasetSpec,
) -> Dataset {
    Dataset {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(target_namespace.to_string()),
            labels: Some(model_version_labels(model_namespace, model_name, version)),
            ..Default::default()
        },
        spec,
        status: None,
    }
}

/// True for datasets that carry model labels but no owner references
pub fn is_reference_dataset(dataset: &Dataset) -> bool {
    dataset.owner_references().is_empty()
}
