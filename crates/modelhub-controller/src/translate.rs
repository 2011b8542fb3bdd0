//! Translation of model versions into Dataset specs
//!
//! Pure functions: no I/O, deterministic output for the same inputs. Missing
//! required fields yield [`Error::Translation`].

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;

use modelhub_common::crd::{
    DatasetSource, DatasetSpec, DatasetType, ModelSourceSpec, ModelVersion, SourceType,
    StorageSpec, VolumeClaimTemplate,
};
use modelhub_common::naming::reference_uri;
use modelhub_common::Error;

/// Revision assumed when a version declares none
pub const DEFAULT_REVISION: &str = "main";

/// Build the Dataset spec for one model version.
///
/// Options are the source's config overlaid with `secret_data`; the volume
/// claim comes from the version's storage or the default claim.
pub fn build_dataset_spec(
    version: &ModelVersion,
    source: &ModelSourceSpec,
    secret_data: Option<&BTreeMap<String, String>>,
) -> Result<DatasetSpec, Error> {
    let uri = build_dataset_uri(source, version)?;

    let mut options = source.config.clone();
    if let Some(data) = secret_data {
        options.extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    let storage = version
        .storage
        .clone()
        .unwrap_or_else(StorageSpec::default_claim);

    Ok(DatasetSpec {
        source: DatasetSource {
            type_: DatasetType::from(source.type_),
            uri,
            options,
        },
        volume_claim_template: Some(VolumeClaimTemplate { spec: storage }),
    })
}

/// Spec of a reference dataset pointing at another namespace's owned dataset
pub fn reference_dataset_spec(source_namespace: &str, model: &str, version: &str) -> DatasetSpec {
    DatasetSpec {
        source: DatasetSource {
            type_: DatasetType::Reference,
            uri: reference_uri(source_namespace, model, version),
            options: BTreeMap::new(),
        },
        volume_claim_template: None,
    }
}

/// Compute the dataset URI for a version under a source.
///
/// A `uri` config key overrides every type-specific rule.
pub fn build_dataset_uri(source: &ModelSourceSpec, version: &ModelVersion) -> Result<String, Error> {
    if let Some(uri) = source.config.get("uri") {
        return Ok(uri.clone());
    }

    let repo = version.repo.as_str();
    let revision = version
        .revision
        .as_deref()
        .filter(|r| !r.is_empty())
        .unwrap_or(DEFAULT_REVISION);
    let kind = source.type_;

    match kind {
        SourceType::Http | SourceType::S3 | SourceType::Git => {
            if !repo.is_empty() {
                return Ok(repo.to_string());
            }
            source.config.get("url").cloned().ok_or_else(|| {
                Error::translation(
                    kind.as_str(),
                    "missing repo in model version or url in source config",
                )
            })
        }
        SourceType::HuggingFace => hub_uri(kind, "huggingface", repo, revision),
        SourceType::ModelScope => hub_uri(kind, "modelscope", repo, revision),
        SourceType::Pvc => {
            let pvc = source
                .config
                .get("pvcName")
                .ok_or_else(|| Error::translation(kind.as_str(), "missing pvcName in source config"))?;
            Ok(format!("pvc://{}{}", pvc, volume_path(source, repo)))
        }
        SourceType::Nfs => {
            let server = source
                .config
                .get("server")
                .ok_or_else(|| Error::translation(kind.as_str(), "missing server in source config"))?;
            Ok(format!("nfs://{}{}", server, volume_path(source, repo)))
        }
        SourceType::Conda | SourceType::Reference => Err(Error::translation(
            kind.as_str(),
            "uri must be set in source config",
        )),
    }
}

fn hub_uri(kind: SourceType, scheme: &str, repo: &str, revision: &str) -> Result<String, Error> {
    if repo.is_empty() {
        return Err(Error::translation(kind.as_str(), "missing repo in model version"));
    }
    let mut uri = format!("{}://{}", scheme, repo);
    if revision != DEFAULT_REVISION {
        uri.push('@');
        uri.push_str(revision);
    }
    Ok(uri)
}

fn volume_path<'a>(source: &'a ModelSourceSpec, repo: &'a str) -> &'a str {
    if !repo.is_empty() {
        return repo;
    }
    source
        .config
        .get("path")
        .map(String::as_str)
        .filter(|p| !p.is_empty())
        .unwrap_or("/")
}

/// Flatten a Secret's `data` and `stringData` into string options.
///
/// `stringData` wins on key collisions; non-UTF-8 bytes are replaced.
pub fn secret_options(secret: &Secret) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = secret
        .data
        .iter()
        .flatten()
        .map(|(k, v)| (k.clone(), String::from_utf8_lossy(&v.0).into_owned()))
        .collect();
    if let Some(string_data) = &secret.string_data {
        out.extend(string_data.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    out
}
