//! Multi-cluster sync of the console's managed cluster support.
//!
//! Every cycle recomputes the desired state from the live cluster list:
//!
//! 1. list eligible managed clusters,
//! 2. publish each cluster's API server CA,
//! 3. provision the remote OAuth client,
//! 4. publish ingress certificates that managed clusters have reported,
//! 5. publish the aggregated cluster configuration,
//! 6. write all conditions to the Console in one update.
//!
//! A failing cluster degrades its step but never stops the others.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::Duration,
};

use futures::Stream;
use k8s_openapi::{api::core::v1::ConfigMap, apimachinery::pkg::apis::meta::v1::OwnerReference};
use kube::{
    Api, Client, Resource, ResourceExt,
    api::ObjectMeta,
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
    api::{
        Console, EligibleCluster, HubOAuthClient, ManagedCluster, ManagedClusterApiServer,
        ManagedClusterConfig, ManagedClusterOAuth, ManagementState, RemoteAction, RemoteView,
    },
    appliers,
    config::OperatorConfig,
    labels::{
        self, API_SERVER_CA_VIEW_NAME, CA_BUNDLE_KEY, CLUSTER_CONFIG_KEY, CLUSTER_CONFIG_MAP_NAME,
        Component, INGRESS_CERT_VIEW_NAME, LabelSelector,
    },
    mediation::{CaBundle, MediationClient, ViewResult, read_view},
    provisioner::{ProvisionContext, ProvisionOutcome, RemoteProvisioner},
    reconcilers::{
        abort_cycle, list_eligible_clusters, owner_ref_from_object_ref, prune_stale,
        require_hub_client, teardown, to_console,
    },
    status::StatusHandler,
    store::HubStore,
};

pub const SYNC_PREFIX: &str = "ManagedClusterSync";
pub const CA_PREFIX: &str = "ManagedClusterCA";
pub const OAUTH_PREFIX: &str = "ManagedClusterOAuth";
pub const INGRESS_PREFIX: &str = "ManagedClusterIngressCert";
pub const CONFIG_PREFIX: &str = "ManagedClusterConfig";

pub struct ManagedClusterSync {
    store: Arc<dyn HubStore>,
    mediation: MediationClient,
    namespace: String,
    hub_oauth_client: String,
    provisioner: Option<Arc<dyn RemoteProvisioner>>,
}

impl ManagedClusterSync {
    /// Without a provisioner the OAuth step is skipped and the hub's OAuth
    /// client is not required.
    pub fn new(
        store: Arc<dyn HubStore>,
        config: &OperatorConfig,
        provisioner: Option<Arc<dyn RemoteProvisioner>>,
    ) -> Self {
        Self {
            mediation: MediationClient::new(store.clone()),
            store,
            namespace: config.namespace.clone(),
            hub_oauth_client: config.hub_oauth_client.clone(),
            provisioner,
        }
    }

    /// Run one sync cycle for `console`. Returns the first error of the cycle
    /// after every step has run and the conditions have been written.
    #[instrument(level = Level::DEBUG, skip(self, console), fields(console = %console.name_any()))]
    pub async fn sync(&self, console: &Console) -> Result<()> {
        let console_name = console.name_any();
        match console.management_state() {
            ManagementState::Unmanaged => {
                debug!("console is unmanaged, leaving managed cluster objects alone");
                return Ok(());
            }
            ManagementState::Removed => return self.remove(&console_name).await,
            ManagementState::Managed => {}
        }

        let owner = owner_ref_from_object_ref(&console.object_ref(&()))?;
        let mut status = StatusHandler::new();

        let hub_client = match &self.provisioner {
            Some(_) => {
                match require_hub_client(self.store.as_ref(), &self.hub_oauth_client).await {
                    Ok(client) => Some(client),
                    Err(error) => {
                        return abort_cycle(
                            self.store.as_ref(),
                            &self.namespace,
                            &LabelSelector::components(&Component::SYNC),
                            status,
                            &console_name,
                            SYNC_PREFIX,
                            error,
                        )
                        .await;
                    }
                }
            }
            None => None,
        };

        let clusters = match list_eligible_clusters(self.store.as_ref()).await {
            Ok(clusters) => clusters,
            Err(error) => {
                status.handle_degraded(SYNC_PREFIX, "ListFailed", Err(error));
                return status.flush(self.store.as_ref(), &console_name).await;
            }
        };
        status.handle_degraded(SYNC_PREFIX, "ListFailed", Ok(()));
        if clusters.is_empty() {
            info!("no eligible managed clusters");
            return status.flush(self.store.as_ref(), &console_name).await;
        }

        let failed_ca = self.propagate_ca(&clusters, &owner, &mut status).await;

        if let (Some(provisioner), Some(hub_client)) = (&self.provisioner, &hub_client) {
            self.provision_oauth(provisioner.as_ref(), &clusters, hub_client, &owner, &mut status)
                .await;
        }

        let failed_ingress = self.harvest_ingress(&clusters, &owner, &mut status).await;

        let published = self
            .publish_config(&clusters, &failed_ca, &failed_ingress, &owner)
            .await;
        status.handle_degraded(CONFIG_PREFIX, "PublishFailed", published);

        let pruned = prune_stale(
            self.store.as_ref(),
            &self.namespace,
            &LabelSelector::components(&Component::SYNC),
            &clusters,
        )
        .await
        .map(|count| {
            if count > 0 {
                info!(count, "pruned objects of clusters that are no longer eligible");
            }
        });
        status.handle_degraded(SYNC_PREFIX, "PruneFailed", pruned);

        status.flush(self.store.as_ref(), &console_name).await
    }

    async fn remove(&self, console: &str) -> Result<()> {
        let mut status = StatusHandler::new();
        let removed = teardown(self.store.as_ref(), &self.namespace, &LabelSelector::feature())
            .await
            .map(|count| info!(count, "removed managed cluster objects"));
        status.handle_degraded(SYNC_PREFIX, "TeardownFailed", removed);
        status.flush(self.store.as_ref(), console).await
    }

    /// Returns the clusters whose CA ConfigMap could not be written.
    async fn propagate_ca(
        &self,
        clusters: &[EligibleCluster],
        owner: &OwnerReference,
        status: &mut StatusHandler,
    ) -> BTreeSet<String> {
        let mut errors = MultiClusterError::default();
        let mut view_errors = MultiClusterError::default();

        for cluster in clusters {
            let served = match self
                .mediation
                .ensure_view(
                    &cluster.name,
                    API_SERVER_CA_VIEW_NAME,
                    Component::ApiServerCa,
                    appliers::api_server_ca_view(),
                )
                .await
            {
                Ok(view) => read_view::<CaBundle>(&view).ready(),
                Err(e) => {
                    view_errors.push(&cluster.name, e);
                    None
                }
            };

            let bundle = merge_ca_bundles(&cluster.ca_bundle, served.as_ref().map(|ca| ca.0.as_str()));
            let config_map = self.ca_config_map(
                labels::api_server_ca_config_map_name(&cluster.name),
                Component::ApiServerCa,
                &cluster.name,
                bundle,
                owner,
            );
            match self.store.apply_config_map(config_map).await {
                Ok((_, true)) => info!(cluster = %cluster.name, "published API server CA"),
                Ok((_, false)) => {}
                Err(e) => errors.push(&cluster.name, e),
            }
        }

        let failed = errors.clusters().map(str::to_string).collect();
        status.handle_degraded(CA_PREFIX, "ApplyFailed", errors.into_result());
        status.handle_degraded(CA_PREFIX, "ViewFailed", view_errors.into_result());
        failed
    }

    async fn provision_oauth(
        &self,
        provisioner: &dyn RemoteProvisioner,
        clusters: &[EligibleCluster],
        hub_client: &HubOAuthClient,
        owner: &OwnerReference,
        status: &mut StatusHandler,
    ) {
        let context = ProvisionContext {
            hub_client,
            owner: Some(owner),
        };
        let mut errors = MultiClusterError::default();
        let mut waiting = Vec::new();

        for cluster in clusters {
            match provisioner.provision(cluster, &context).await {
                Ok(ProvisionOutcome::Pending | ProvisionOutcome::Requested) => {
                    waiting.push(cluster.name.clone())
                }
                Ok(ProvisionOutcome::Present | ProvisionOutcome::Applied { .. }) => {}
                Err(e) => errors.push(&cluster.name, e),
            }
        }

        status.handle_degraded(OAUTH_PREFIX, "ProvisionFailed", errors.into_result());
        status.handle_progressing(OAUTH_PREFIX, "WaitingForRemote", &waiting);
    }

    /// Clusters that have not answered the ingress view are deferred, not
    /// failed. Returns the clusters that failed.
    async fn harvest_ingress(
        &self,
        clusters: &[EligibleCluster],
        owner: &OwnerReference,
        status: &mut StatusHandler,
    ) -> BTreeSet<String> {
        let mut errors = MultiClusterError::default();
        let mut waiting = Vec::new();

        for cluster in clusters {
            let view = match self
                .mediation
                .ensure_view(
                    &cluster.name,
                    INGRESS_CERT_VIEW_NAME,
                    Component::IngressCert,
                    appliers::ingress_cert_view(),
                )
                .await
            {
                Ok(view) => view,
                Err(e) => {
                    errors.push(&cluster.name, e);
                    continue;
                }
            };

            let CaBundle(pem) = match read_view::<CaBundle>(&view) {
                ViewResult::Ready(bundle) => bundle,
                ViewResult::Pending | ViewResult::Unusable => {
                    debug!(cluster = %cluster.name, "ingress certificate not reported yet");
                    waiting.push(cluster.name.clone());
                    continue;
                }
            };

            let config_map = self.ca_config_map(
                labels::ingress_cert_config_map_name(&cluster.name),
                Component::IngressCert,
                &cluster.name,
                pem,
                owner,
            );
            match self.store.apply_config_map(config_map).await {
                Ok((_, true)) => info!(cluster = %cluster.name, "published ingress certificate"),
                Ok((_, false)) => {}
                Err(e) => errors.push(&cluster.name, e),
            }
        }

        let failed = errors.clusters().map(str::to_string).collect();
        status.handle_degraded(INGRESS_PREFIX, "ApplyFailed", errors.into_result());
        status.handle_progressing(INGRESS_PREFIX, "WaitingForRemote", &waiting);
        failed
    }

    /// Only clusters whose CA ConfigMap exists, and was not just failed, are
    /// listed. Nothing is published while no cluster qualifies.
    async fn publish_config(
        &self,
        clusters: &[EligibleCluster],
        failed_ca: &BTreeSet<String>,
        failed_ingress: &BTreeSet<String>,
        owner: &OwnerReference,
    ) -> Result<()> {
        let with_ca = self.published_clusters(Component::ApiServerCa).await?;
        let with_ingress = self.published_clusters(Component::IngressCert).await?;

        let entries: Vec<ManagedClusterConfig> = clusters
            .iter()
            .filter(|c| with_ca.contains(&c.name) && !failed_ca.contains(&c.name))
            .map(|c| ManagedClusterConfig {
                name: c.name.clone(),
                api_server: ManagedClusterApiServer {
                    url: c.url.clone(),
                    ca_file: labels::api_server_ca_file(&c.name),
                },
                oauth: (with_ingress.contains(&c.name) && !failed_ingress.contains(&c.name)).then(
                    || ManagedClusterOAuth {
                        ca_file: labels::oauth_server_ca_file(&c.name),
                    },
                ),
            })
            .collect();

        if entries.is_empty() {
            debug!("no managed cluster has published CA data yet");
            return Ok(());
        }

        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some(CLUSTER_CONFIG_MAP_NAME.to_string()),
                namespace: Some(self.namespace.clone()),
                labels: Some(Component::ClusterConfig.labels(None)),
                owner_references: Some(vec![owner.clone()]),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                CLUSTER_CONFIG_KEY.to_string(),
                serde_yaml_ng::to_string(&entries)?,
            )])),
            ..Default::default()
        };

        let (_, changed) = self.store.apply_config_map(config_map).await?;
        if changed {
            info!(clusters = entries.len(), "published managed cluster configuration");
        }
        Ok(())
    }

    async fn published_clusters(&self, component: Component) -> Result<BTreeSet<String>> {
        Ok(self
            .store
            .list_config_maps(&self.namespace, &component.selector())
            .await?
            .iter()
            .filter_map(|cm| labels::cluster_of(cm.labels()).map(str::to_string))
            .collect())
    }

    fn ca_config_map(
        &self,
        name: String,
        component: Component,
        cluster: &str,
        pem: String,
        owner: &OwnerReference,
    ) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name),
                namespace: Some(self.namespace.clone()),
                labels: Some(component.labels(Some(cluster))),
                owner_references: Some(vec![owner.clone()]),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(CA_BUNDLE_KEY.to_string(), pem)])),
            ..Default::default()
        }
    }
}

/// Append `extra` to `base` unless it is already part of it.
pub(crate) fn merge_ca_bundles(base: &str, extra: Option<&str>) -> String {
    let mut bundle = base.trim_end().to_string();
    if let Some(extra) = extra
        .map(str::trim)
        .filter(|extra| !extra.is_empty() && !bundle.contains(extra))
    {
        bundle.push('\n');
        bundle.push_str(extra);
    }
    bundle.push('\n');
    bundle
}

struct ReconcilerCtx {
    sync: ManagedClusterSync,
    console_name: String,
    resync: Duration,
    error_requeue: Duration,
}

impl ReconcilerCtx {
    fn new(sync: ManagedClusterSync, config: &OperatorConfig) -> Self {
        Self {
            sync,
            console_name: config.console_name.clone(),
            resync: config.resync(),
            error_requeue: config.error_requeue(),
        }
    }
}

pub fn control_loop(
    client: Client,
    store: Arc<dyn HubStore>,
    config: OperatorConfig,
    provisioner: Option<Arc<dyn RemoteProvisioner>>,
) -> impl Stream<Item = Result<(ObjectRef<Console>, Action), ControllerError<Error, watcher::Error>>>
{
    let consoles = Api::<Console>::all(client.clone());
    let clusters = Api::<ManagedCluster>::all(client.clone());
    let config_maps = Api::<ConfigMap>::namespaced(client.clone(), &config.namespace);
    let views = Api::<RemoteView>::all(client.clone());
    let actions = Api::<RemoteAction>::all(client);

    let owned = watcher::Config::default()
        .labels(&LabelSelector::components(&Component::SYNC).to_string());
    let name = config.console_name.clone();

    let context = Arc::new(ReconcilerCtx::new(
        ManagedClusterSync::new(store, &config, provisioner),
        &config,
    ));

    Controller::new(consoles, watcher::Config::default())
        .watches(
            clusters,
            watcher::Config::default(),
            to_console::<ManagedCluster>(name.clone()),
        )
        .watches(config_maps, owned.clone(), to_console::<ConfigMap>(name.clone()))
        .watches(views, owned.clone(), to_console::<RemoteView>(name.clone()))
        .watches(actions, owned, to_console::<RemoteAction>(name.clone()))
        .shutdown_on_signal()
        .run(reconcile, error_policy, context)
}

#[instrument(level = Level::DEBUG, skip(context))]
async fn reconcile(console: Arc<Console>, context: Arc<ReconcilerCtx>) -> Result<Action> {
    if console.name_any() != context.console_name {
        debug!("not the configured console, ignoring");
        return Ok(Action::await_change());
    }

    tracing::info!("Reconciling managed clusters...");
    context.sync.sync(&console).await?;

    Ok(Action::requeue(context.resync))
}

fn error_policy(_console: Arc<Console>, _error: &Error, context: Arc<ReconcilerCtx>) -> Action {
    Action::requeue(context.error_requeue)
}
