//! Keeps the remote OAuth client converged through work bundles.
//!
//! Unlike the view/action path this re-asserts the desired client on every
//! cycle, so drift inside a managed cluster or a rotated hub secret is
//! corrected without intervention.

use std::{sync::Arc, time::Duration};

use futures::Stream;
use kube::{
    Api, Client, Resource, ResourceExt,
    runtime::{
        Controller,
        controller::{Action, Error as ControllerError},
        reflector::ObjectRef,
        watcher,
    },
};
use tracing::{Level, debug, info, instrument};

use crate::{
    Error, MultiClusterError, Result,
    api::{Console, ManagedCluster, ManagementState, WorkBundle},
    config::OperatorConfig,
    provisioner::{ProvisionContext, ProvisionOutcome, RemoteProvisioner},
    reconcilers::{
        abort_cycle, list_eligible_clusters, owner_ref_from_object_ref, prune_stale,
        require_hub_client, teardown, to_console,
    },
    status::StatusHandler,
    store::HubStore,
};

pub const WORK_PREFIX: &str = "ManagedClusterOAuthWork";

pub struct OAuthWorkSync {
    store: Arc<dyn HubStore>,
    provisioner: Arc<dyn RemoteProvisioner>,
    namespace: String,
    hub_oauth_client: String,
}

impl OAuthWorkSync {
    pub fn new(
        store: Arc<dyn HubStore>,
        config: &OperatorConfig,
        provisioner: Arc<dyn RemoteProvisioner>,
    ) -> Self {
        Self {
            store,
            provisioner,
            namespace: config.namespace.clone(),
            hub_oauth_client: config.hub_oauth_client.clone(),
        }
    }

    #[instrument(level = Level::DEBUG, skip(self, console), fields(console = %console.name_any()))]
    pub async fn sync(&self, console: &Console) -> Result<()> {
        let console_name = console.name_any();
        let selector = self.provisioner.component().selector();
        let mut status = StatusHandler::new();

        match console.management_state() {
            ManagementState::Unmanaged => {
                debug!("console is unmanaged, leaving work bundles alone");
                return Ok(());
            }
            ManagementState::Removed => {
                let removed = teardown(self.store.as_ref(), &self.namespace, &selector)
                    .await
                    .map(|count| info!(count, "removed OAuth client work bundles"));
                status.handle_degraded(WORK_PREFIX, "TeardownFailed", removed);
                return status.flush(self.store.as_ref(), &console_name).await;
            }
            ManagementState::Managed => {}
        }

        let owner = owner_ref_from_object_ref(&console.object_ref(&()))?;
        let hub_client =
            match require_hub_client(self.store.as_ref(), &self.hub_oauth_client).await {
                Ok(client) => client,
                Err(error) => {
                    return abort_cycle(
                        self.store.as_ref(),
                        &self.namespace,
                        &selector,
                        status,
                        &console_name,
                        WORK_PREFIX,
                        error,
                    )
                    .await;
                }
            };

        let clusters = match list_eligible_clusters(self.store.as_ref()).await {
            Ok(clusters) => clusters,
            Err(error) => {
                status.handle_degraded(WORK_PREFIX, "ListFailed", Err(error));
                return status.flush(self.store.as_ref(), &console_name).await;
            }
        };
        if clusters.is_empty() {
            info!("no eligible managed clusters");
            status.handle_degraded(WORK_PREFIX, "ApplyFailed", Ok(()));
            return status.flush(self.store.as_ref(), &console_name).await;
        }

        let context = ProvisionContext {
            hub_client: &hub_client,
            owner: Some(&owner),
        };
        let mut errors = MultiClusterError::default();
        let mut changed = 0;
        for cluster in &clusters {
            match self.provisioner.provision(cluster, &context).await {
                Ok(ProvisionOutcome::Applied { changed: true }) => changed += 1,
                Ok(_) => {}
                Err(e) => errors.push(&cluster.name, e),
            }
        }
        debug!(clusters = clusters.len(), changed, "asserted OAuth client work bundles");
        status.handle_degraded(WORK_PREFIX, "ApplyFailed", errors.into_result());

        let pruned = prune_stale(self.store.as_ref(), &self.namespace, &selector, &clusters)
            .await
            .map(|count| {
                if count > 0 {
                    info!(count, "pruned work bundles of clusters that are no longer eligible");
                }
            });
        status.handle_degraded(WORK_PREFIX, "PruneFailed", pruned);

        status.flush(self.store.as_ref(), &console_name).await
    }
}

struct ReconcilerCtx {
    sync: OAuthWorkSync,
    console_name: String,
    resync: Duration,
    error_requeue: Duration,
}

pub fn control_loop(
    client: Client,
    store: Arc<dyn HubStore>,
    config: OperatorConfig,
    provisioner: Arc<dyn RemoteProvisioner>,
) -> impl Stream<Item = Result<(ObjectRef<Console>, Action), ControllerError<Error, watcher::Error>>>
{
    let consoles = Api::<Console>::all(client.clone());
    let clusters = Api::<ManagedCluster>::all(client.clone());
    let bundles = Api::<WorkBundle>::all(client);

    let owned = watcher::Config::default().labels(&provisioner.component().selector().to_string());
    let name = config.console_name.clone();

    let context = Arc::new(ReconcilerCtx {
        sync: OAuthWorkSync::new(store, &config, provisioner),
        console_name: config.console_name.clone(),
        resync: config.resync(),
        error_requeue: config.error_requeue(),
    });

    Controller::new(consoles, watcher::Config::default())
        .watches(
            clusters,
            watcher::Config::default(),
            to_console::<ManagedCluster>(name.clone()),
        )
        .watches(bundles, owned, to_console::<WorkBundle>(name.clone()))
        .shutdown_on_signal()
        .run(reconcile, error_policy, context)
}

#[instrument(level = Level::DEBUG, skip(context))]
async fn reconcile(console: Arc<Console>, context: Arc<ReconcilerCtx>) -> Result<Action> {
    if console.name_any() != context.console_name {
        return Ok(Action::await_change());
    }

    tracing::info!("Reconciling OAuth client work...");
    context.sync.sync(&console).await?;

    Ok(Action::requeue(context.resync))
}

fn error_policy(_console: Arc<Console>, _error: &Error, context: Arc<ReconcilerCtx>) -> Action {
    Action::requeue(context.error_requeue)
}
