//! Controller runner - builds one controller future per reconciled kind
//!
//! Each controller watches its primary kind plus the auxiliary kinds whose
//! changes can alter its outcome. Auxiliary events are mapped back to primary
//! keys by the pure functions in [`modelhub_controller::mapper`], reading the
//! controller's own reflector store.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use modelhub_common::crd::{Dataset, Model, ModelReference, ModelSource, ModelSync};
use modelhub_controller::controller::{model, model_reference, model_source, model_sync};
use modelhub_controller::{mapper, Context};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// so the API server closes the watch before the client gives up on it.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// A running controller
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

/// Build the Model, ModelSource, ModelSync and ModelReference controllers.
///
/// `concurrency` bounds the number of keys each controller reconciles at once.
pub fn build_controllers(
    client: Client,
    ctx: Arc<Context>,
    concurrency: u16,
) -> Vec<ControllerFuture> {
    let config = ControllerConfig::default().concurrency(concurrency);

    let models_ctrl = build_model_controller(client.clone(), ctx.clone(), config.clone());
    let sources_ctrl = build_source_controller(client.clone(), ctx.clone(), config.clone());
    let syncs_ctrl = build_sync_controller(client.clone(), ctx.clone(), config.clone());
    let references_ctrl = build_reference_controller(client, ctx, config);

    tracing::info!(concurrency, "starting controllers");
    tracing::info!("- Model controller");
    tracing::info!("- ModelSource controller");
    tracing::info!("- ModelSync controller");
    tracing::info!("- ModelReference controller");

    vec![models_ctrl, sources_ctrl, syncs_ctrl, references_ctrl]
}

fn build_model_controller(
    client: Client,
    ctx: Arc<Context>,
    config: ControllerConfig,
) -> ControllerFuture {
    let models: Api<Model> = Api::all(client.clone());
    let controller = Controller::new(models, watcher_config()).with_config(config);
    let for_sources = controller.store();
    let for_namespaces = controller.store();

    Box::pin(
        controller
            .watches(
                Api::<ModelSource>::all(client.clone()),
                watcher_config(),
                move |source| mapper::models_for_source(&source, &for_sources.state()),
            )
            .watches(
                Api::<Dataset>::all(client.clone()),
                watcher_config(),
                |dataset| mapper::models_for_dataset(&dataset),
            )
            .watches(
                Api::<Namespace>::all(client),
                watcher_config(),
                move |_namespace| mapper::models_for_namespace(&for_namespaces.state()),
            )
            .shutdown_on_signal()
            .run(model::reconcile, model::error_policy, ctx)
            .for_each(log_reconcile_result("Model")),
    )
}

fn build_source_controller(
    client: Client,
    ctx: Arc<Context>,
    config: ControllerConfig,
) -> ControllerFuture {
    let sources: Api<ModelSource> = Api::all(client.clone());
    let controller = Controller::new(sources, watcher_config()).with_config(config);
    let for_secrets = controller.store();

    Box::pin(
        controller
            .watches(
                Api::<Model>::all(client.clone()),
                watcher_config(),
                |model| mapper::source_for_model(&model),
            )
            .watches(
                Api::<Secret>::all(client),
                watcher_config(),
                move |secret| mapper::sources_for_secret(&secret, &for_secrets.state()),
            )
            .shutdown_on_signal()
            .run(model_source::reconcile, model_source::error_policy, ctx)
            .for_each(log_reconcile_result("ModelSource")),
    )
}

fn build_sync_controller(
    client: Client,
    ctx: Arc<Context>,
    config: ControllerConfig,
) -> ControllerFuture {
    let syncs: Api<ModelSync> = Api::all(client.clone());
    let controller = Controller::new(syncs, watcher_config()).with_config(config);
    let for_models = controller.store();

    Box::pin(
        controller
            .watches(
                Api::<Dataset>::all(client.clone()),
                watcher_config(),
                |dataset| mapper::sync_for_dataset(&dataset),
            )
            .watches(
                Api::<Model>::all(client),
                watcher_config(),
                move |model| mapper::syncs_for_model(&model, &for_models.state()),
            )
            .shutdown_on_signal()
            .run(model_sync::reconcile, model_sync::error_policy, ctx)
            .for_each(log_reconcile_result("ModelSync")),
    )
}

fn build_reference_controller(
    client: Client,
    ctx: Arc<Context>,
    config: ControllerConfig,
) -> ControllerFuture {
    let references: Api<ModelReference> = Api::all(client.clone());
    let controller = Controller::new(references, watcher_config()).with_config(config);
    let for_models = controller.store();

    Box::pin(
        controller
            .watches(
                Api::<Model>::all(client),
                watcher_config(),
                move |model| mapper::references_for_model(&model, &for_models.state()),
            )
            .shutdown_on_signal()
            .run(model_reference::reconcile, model_reference::error_policy, ctx)
            .for_each(log_reconcile_result("ModelReference")),
    )
}

/// Creates a closure for logging reconciliation results.
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
