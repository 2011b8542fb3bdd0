//! Names, labels and annotations for derived Datasets
//!
//! Label values cannot contain `/`, so the owning model is encoded as
//! `<namespace>.<name>`. Namespaces are DNS labels without dots, which makes
//! the first `.` an unambiguous separator.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::{MODEL_LABEL_KEY, VERSION_LABEL_KEY};

/// Dataset owned by a Model for one version: `mdl-<model>-<version>`
pub fn owned_dataset_name(model: &str, version: &str) -> String {
    format!("mdl-{}-{}", model, version)
}

/// Dataset owned by a ModelSync: `<model>-<version>`
pub fn sync_dataset_name(model: &str, version: &str) -> String {
    format!("{}-{}", model, version)
}

/// Reference dataset placed in a sharing target: `share-<srcNs>-<model>-<version>`
pub fn reference_dataset_name(source_namespace: &str, model: &str, version: &str) -> String {
    format!("share-{}-{}-{}", source_namespace, model, version)
}

/// URI a reference dataset uses to point at the source namespace's owned dataset
pub fn reference_uri(source_namespace: &str, model: &str, version: &str) -> String {
    format!(
        "dataset://{}/{}",
        source_namespace,
        owned_dataset_name(model, version)
    )
}

/// `namespace/name` key used in status lists and log fields
pub fn object_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

/// Value of the model label for a model
pub fn model_label_value(namespace: &str, name: &str) -> String {
    format!("{}.{}", namespace, name)
}

/// Split a model label value back into `(namespace, name)`
pub fn parse_model_label(value: &str) -> Option<(&str, &str)> {
    value
        .split_once('.')
        .filter(|(ns, name)| !ns.is_empty() && !name.is_empty())
}

/// Labels carried by every dataset derived from a model version
pub fn model_version_labels(namespace: &str, name: &str, version: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MODEL_LABEL_KEY.to_string(), model_label_value(namespace, name)),
        (VERSION_LABEL_KEY.to_string(), version.to_string()),
    ])
}

/// Label selector matching every dataset derived from a model
pub fn model_selector(namespace: &str, name: &str) -> String {
    format!("{}={}", MODEL_LABEL_KEY, model_label_value(namespace, name))
}

/// Label selector matching datasets derived from one model version
pub fn model_version_selector(namespace: &str, name: &str, version: &str) -> String {
    format!(
        "{},{}={}",
        model_selector(namespace, name),
        VERSION_LABEL_KEY,
        version
    )
}

/// RFC3339 timestamp with nanosecond precision for the resync annotation
pub fn resync_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Nanos, true)
}
