//! modelhub operator - reconciles Models, ModelSources, ModelSyncs and ModelReferences

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use kube::Client;
use tokio_util::sync::CancellationToken;

use modelhub_common::kube_utils::create_client;
use modelhub_common::telemetry::{init_tracing, LogFormat};
use modelhub_common::KindRegistry;
use modelhub_controller::events::{trigger_resync, watch_resources, GATEWAY_KINDS};
use modelhub_controller::{Context, KubeClientImpl};
use modelhub_operator::controller_runner::build_controllers;
use modelhub_operator::crds::{ensure_crds_installed, render_crds};

/// modelhub - declarative model artifacts on Kubernetes
#[derive(Parser, Debug)]
#[command(name = "modelhub-operator", version, about, long_about = None)]
struct Cli {
    /// Print CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Install or update the modelhub CRDs before starting
    #[arg(long, env = "MODELHUB_INSTALL_CRDS")]
    install_crds: bool,

    /// Maximum keys reconciled at once per controller
    #[arg(long, env = "MODELHUB_CONCURRENCY", default_value_t = 4)]
    concurrency: u16,

    /// Path to a kubeconfig; inferred from the environment when unset
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Log output format (text or json)
    #[arg(long, env = "MODELHUB_LOG_FORMAT", default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controllers (default mode)
    Controller,
    /// Stream Model, ModelSource and Dataset events as JSON lines
    Watch,
    /// Ask the dataset controller to re-sync every version of a Model
    Resync {
        /// Namespace of the Model
        #[arg(short, long, default_value = "default")]
        namespace: String,
        /// Name of the Model
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        print!("{}", render_crds()?);
        return Ok(());
    }

    init_tracing(cli.log_format)?;

    let client = create_client(cli.kubeconfig.as_deref()).await?;

    if cli.install_crds {
        ensure_crds_installed(&client).await?;
    }

    let kinds = Arc::new(KindRegistry::discover(client.clone()).await?);

    match cli.command.unwrap_or(Commands::Controller) {
        Commands::Controller => run_controllers(client, kinds, cli.concurrency).await,
        Commands::Watch => run_watch(client, kinds).await,
        Commands::Resync { namespace, name } => {
            let kube = KubeClientImpl::new(client, kinds);
            let at = trigger_resync(&kube, &namespace, &name).await?;
            println!("{}/{} resync requested at {}", namespace, name, at);
            Ok(())
        }
    }
}

async fn run_controllers(
    client: Client,
    kinds: Arc<KindRegistry>,
    concurrency: u16,
) -> anyhow::Result<()> {
    let ctx = Arc::new(Context::builder(client.clone(), kinds).build());
    let controllers = build_controllers(client, ctx, concurrency);

    futures::future::join_all(controllers).await;
    tracing::info!("controllers stopped");
    Ok(())
}

async fn run_watch(client: Client, kinds: Arc<KindRegistry>) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let mut events = watch_resources(client, &kinds, &GATEWAY_KINDS, cancel.clone())?;

    let stop = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping watch");
        }
        stop.cancel();
    });

    while let Some(event) = events.next().await {
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}
