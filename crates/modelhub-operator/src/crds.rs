//! CRD manifests owned by modelhub

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};

use modelhub_common::crd::modelhub_crds;
use modelhub_common::FIELD_MANAGER;

/// Render every modelhub CRD as a multi-document YAML stream
pub fn render_crds() -> Result<String, serde_yaml::Error> {
    let docs = modelhub_crds()
        .iter()
        .map(serde_yaml::to_string)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(docs.join("---\n"))
}

/// Install or update the modelhub CRDs using server-side apply.
///
/// The Dataset CRD belongs to the dataset controller and is not touched.
pub async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for crd in modelhub_crds() {
        let name = crd.name_any();
        tracing::info!(crd = %name, "Installing CRD...");
        crds.patch(&name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to install CRD {}: {}", name, e))?;
    }

    tracing::info!("All modelhub CRDs installed/updated");
    Ok(())
}
