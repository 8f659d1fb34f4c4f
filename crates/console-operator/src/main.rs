use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::{Stream, StreamExt};
use kube::{Client, CustomResourceExt};

use console_operator::{
    api::{RemoteAction, RemoteView, WorkBundle},
    config::{OAuthStrategy, OperatorConfig},
    provisioner::{RemoteProvisioner, ViewActionProvisioner, WorkBundleProvisioner},
    reconcilers,
    store::{HubStore, KubeStore},
};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(version, about)]
struct Cli {
    #[command(flatten)]
    config: OperatorConfig,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Subcommand)]
enum Commands {
    /// Run the controller reconciliation loop
    #[command(subcommand)]
    Reconcile(ReconcileTarget),
    /// Output K8s manifest for a given CRD resource
    #[command(subcommand)]
    CrdManifest(Crd),
}

#[derive(Debug, Clone, Subcommand)]
enum ReconcileTarget {
    /// CA propagation, ingress certificates, aggregated configuration and
    /// view/action OAuth provisioning
    ManagedClusters,
    /// Work bundle OAuth provisioning
    OauthWork,
    /// Every controller the configured OAuth strategy needs
    All,
}

#[derive(Debug, Clone, Subcommand)]
enum Crd {
    RemoteView,
    RemoteAction,
    WorkBundle,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_file(true)
                .with_line_number(true),
        )
        .with(EnvFilter::from_default_env())
        .try_init()?;

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Reconcile(target)) => run_controller(target, cli.config.validated()?).await?,
        Some(Commands::CrdManifest(crd)) => {
            let crd = match crd {
                Crd::RemoteView => RemoteView::crd(),
                Crd::RemoteAction => RemoteAction::crd(),
                Crd::WorkBundle => WorkBundle::crd(),
            };

            println!("{}", serde_yaml_ng::to_string(&crd)?);
        }
        None => {}
    }

    Ok(())
}

async fn run_controller(target: ReconcileTarget, config: OperatorConfig) -> anyhow::Result<()> {
    let client = Client::try_default().await?;
    let store: Arc<dyn HubStore> = Arc::new(KubeStore::new(client.clone()));
    tracing::info!(
        namespace = %config.namespace,
        console = %config.console_name,
        strategy = ?config.oauth_strategy,
        "starting controllers"
    );

    let view_action: Option<Arc<dyn RemoteProvisioner>> = match config.oauth_strategy {
        OAuthStrategy::ViewAction => Some(Arc::new(ViewActionProvisioner::new(store.clone()))),
        OAuthStrategy::WorkBundle | OAuthStrategy::Disabled => None,
    };
    let work_bundle: Arc<dyn RemoteProvisioner> =
        Arc::new(WorkBundleProvisioner::new(store.clone(), config.executor()));

    match target {
        ReconcileTarget::ManagedClusters => {
            drive(
                "managed clusters",
                reconcilers::managed_cluster::control_loop(client, store, config, view_action),
            )
            .await
        }
        ReconcileTarget::OauthWork => {
            drive(
                "OAuth work",
                reconcilers::oauth_work::control_loop(client, store, config, work_bundle),
            )
            .await
        }
        ReconcileTarget::All => {
            let managed_clusters = drive(
                "managed clusters",
                reconcilers::managed_cluster::control_loop(
                    client.clone(),
                    store.clone(),
                    config.clone(),
                    view_action,
                ),
            );
            if config.oauth_strategy == OAuthStrategy::WorkBundle {
                let oauth_work = drive(
                    "OAuth work",
                    reconcilers::oauth_work::control_loop(client, store, config, work_bundle),
                );
                tokio::join!(managed_clusters, oauth_work);
            } else {
                managed_clusters.await;
            }
        }
    };

    tracing::info!("controller terminated");
    Ok(())
}

async fn drive<T, E>(controller: &'static str, results: impl Stream<Item = Result<T, E>>)
where
    T: std::fmt::Debug,
    E: std::fmt::Debug,
{
    results
        .for_each(|res| async move {
            match res {
                Ok(o) => tracing::info!("Reconciled {controller} {:?}", o),
                Err(e) => tracing::error!("{controller} reconcile failed: {:?}", e),
            }
        })
        .await
}
