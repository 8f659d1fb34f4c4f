//! Provisioning the console OAuth client inside managed clusters.
//!
//! Two strategies exist and keep distinct contracts:
//! [`ViewActionProvisioner`] creates the client once and never touches it
//! again, while [`WorkBundleProvisioner`] re-asserts the desired client on
//! every cycle.

use std::sync::Arc;

use async_trait::async_trait;
use garde::Validate;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{ResourceExt, api::ObjectMeta};
use tracing::{Level, debug, info, instrument, warn};

use crate::{
    Result,
    api::{EligibleCluster, Executor, HubOAuthClient, WorkBundle},
    appliers,
    labels::{Component, OAUTH_CLIENT_ACTION_NAME, OAUTH_CLIENT_VIEW_NAME, OAUTH_CLIENT_WORK_NAME},
    mediation::{MediationClient, RemoteOAuthClient, ViewResult, read_readiness, read_view},
    store::HubStore,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// The remote state is not known yet.
    Pending,
    /// Creation was requested and has not been confirmed.
    Requested,
    /// The client exists remotely. Nothing was issued.
    Present,
    /// Desired state was asserted. `changed` is set when something was written.
    Applied { changed: bool },
}

pub struct ProvisionContext<'a> {
    pub hub_client: &'a HubOAuthClient,
    /// Owner stamped on objects that are garbage collected with the Console.
    pub owner: Option<&'a OwnerReference>,
}

#[async_trait]
pub trait RemoteProvisioner: Send + Sync {
    /// Component whose labels mark this provisioner's objects.
    fn component(&self) -> Component;

    async fn provision(
        &self,
        cluster: &EligibleCluster,
        context: &ProvisionContext<'_>,
    ) -> Result<ProvisionOutcome>;
}

/// Queries the remote client with a view and issues a creation action when it
/// is absent. A client that exists is left alone, even when its secret no
/// longer matches the hub's.
pub struct ViewActionProvisioner {
    mediation: MediationClient,
}

impl ViewActionProvisioner {
    pub fn new(store: Arc<dyn HubStore>) -> Self {
        Self {
            mediation: MediationClient::new(store),
        }
    }
}

#[async_trait]
impl RemoteProvisioner for ViewActionProvisioner {
    fn component(&self) -> Component {
        Component::OAuthClient
    }

    #[instrument(level = Level::DEBUG, skip(self, context), fields(cluster = %cluster.name))]
    async fn provision(
        &self,
        cluster: &EligibleCluster,
        context: &ProvisionContext<'_>,
    ) -> Result<ProvisionOutcome> {
        let view = self
            .mediation
            .ensure_view(
                &cluster.name,
                OAUTH_CLIENT_VIEW_NAME,
                Component::OAuthClient,
                appliers::remote_oauth_client_view(),
            )
            .await?;

        let observed = match read_view::<RemoteOAuthClient>(&view) {
            ViewResult::Ready(observed) => observed,
            ViewResult::Pending | ViewResult::Unusable => {
                debug!("remote OAuth client not observed yet");
                return Ok(ProvisionOutcome::Pending);
            }
        };

        let applied = self
            .mediation
            .find_action(&cluster.name, OAUTH_CLIENT_ACTION_NAME)
            .await?
            .is_some_and(|action| read_readiness(&action));
        if applied {
            return Ok(ProvisionOutcome::Present);
        }

        match observed {
            RemoteOAuthClient::Present { secret, .. } => {
                if secret.as_deref() != Some(context.hub_client.secret.as_str()) {
                    // TODO: decide whether a rotated hub secret should reissue the creation action.
                    warn!("remote OAuth client secret differs from the hub's, leaving it untouched");
                }
                Ok(ProvisionOutcome::Present)
            }
            RemoteOAuthClient::Absent => {
                let action = self
                    .mediation
                    .ensure_action(
                        &cluster.name,
                        OAUTH_CLIENT_ACTION_NAME,
                        Component::OAuthClient,
                        appliers::create_remote_oauth_client_action(
                            &context.hub_client.secret,
                            &context.hub_client.redirect_uris,
                        ),
                    )
                    .await?;

                if read_readiness(&action) {
                    Ok(ProvisionOutcome::Present)
                } else {
                    info!("requested remote OAuth client creation");
                    Ok(ProvisionOutcome::Requested)
                }
            }
        }
    }
}

/// Keeps a work bundle carrying the remote OAuth client in every cluster's
/// namespace, updating it in place whenever the desired spec changes.
pub struct WorkBundleProvisioner {
    store: Arc<dyn HubStore>,
    executor: Executor,
}

impl WorkBundleProvisioner {
    pub fn new(store: Arc<dyn HubStore>, executor: Executor) -> Self {
        Self { store, executor }
    }

    fn desired(&self, cluster: &str, context: &ProvisionContext<'_>) -> WorkBundle {
        WorkBundle {
            metadata: ObjectMeta {
                name: Some(OAUTH_CLIENT_WORK_NAME.to_string()),
                namespace: Some(cluster.to_string()),
                labels: Some(Component::OAuthWork.labels(Some(cluster))),
                owner_references: context.owner.map(|owner| vec![owner.clone()]),
                ..Default::default()
            },
            spec: appliers::oauth_client_work_bundle(
                &context.hub_client.secret,
                &context.hub_client.redirect_uris,
                self.executor.clone(),
            ),
            status: None,
        }
    }
}

#[async_trait]
impl RemoteProvisioner for WorkBundleProvisioner {
    fn component(&self) -> Component {
        Component::OAuthWork
    }

    #[instrument(level = Level::DEBUG, skip(self, context), fields(cluster = %cluster.name))]
    async fn provision(
        &self,
        cluster: &EligibleCluster,
        context: &ProvisionContext<'_>,
    ) -> Result<ProvisionOutcome> {
        let mut desired = self.desired(&cluster.name, context);
        desired.spec.validate()?;

        match self
            .store
            .get_work_bundle(&cluster.name, OAUTH_CLIENT_WORK_NAME)
            .await?
        {
            None => {
                self.store.create_work_bundle(desired).await?;
                info!("created OAuth client work bundle");
                Ok(ProvisionOutcome::Applied { changed: true })
            }
            Some(existing) if existing.spec == desired.spec => {
                Ok(ProvisionOutcome::Applied { changed: false })
            }
            Some(existing) => {
                desired.metadata.resource_version = existing.resource_version();
                if desired.metadata.owner_references.is_none() {
                    desired.metadata.owner_references = existing.metadata.owner_references;
                }
                self.store.update_work_bundle(desired).await?;
                info!("updated drifted OAuth client work bundle");
                Ok(ProvisionOutcome::Applied { changed: true })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::OperatorConfig,
        store::MockHubStore,
        testing::{FakeStore, eligible, hub_client, ready_view},
    };

    fn context(client: &HubOAuthClient) -> ProvisionContext<'_> {
        ProvisionContext {
            hub_client: client,
            owner: None,
        }
    }

    #[tokio::test]
    async fn view_action_waits_for_the_view() {
        let store = Arc::new(FakeStore::default());
        let provisioner = ViewActionProvisioner::new(store.clone());
        let client = hub_client();

        let outcome = provisioner
            .provision(&eligible("acme"), &context(&client))
            .await
            .unwrap();

        assert_eq!(outcome, ProvisionOutcome::Pending);
        assert_eq!(store.views().len(), 1);
        assert!(store.actions().is_empty());
    }

    #[tokio::test]
    async fn view_action_creates_when_remote_client_is_absent() {
        let store = Arc::new(FakeStore::default());
        store.put_view(ready_view("acme", OAUTH_CLIENT_VIEW_NAME, &[("found", "false")]));
        let provisioner = ViewActionProvisioner::new(store.clone());
        let client = hub_client();

        let outcome = provisioner
            .provision(&eligible("acme"), &context(&client))
            .await
            .unwrap();

        assert_eq!(outcome, ProvisionOutcome::Requested);
        let actions = store.actions();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].name_any(), OAUTH_CLIENT_ACTION_NAME);
        assert_eq!(actions[0].spec.kube.template["secret"], client.secret);
    }

    #[tokio::test]
    async fn view_action_never_reissues_for_present_client() {
        let store = Arc::new(FakeStore::default());
        store.put_view(ready_view(
            "acme",
            OAUTH_CLIENT_VIEW_NAME,
            &[("found", "true"), ("secret", "rotated-away")],
        ));
        let provisioner = ViewActionProvisioner::new(store.clone());
        let client = hub_client();

        for _ in 0..2 {
            let outcome = provisioner
                .provision(&eligible("acme"), &context(&client))
                .await
                .unwrap();
            assert_eq!(outcome, ProvisionOutcome::Present);
        }
        assert!(store.actions().is_empty());
    }

    #[tokio::test]
    async fn view_action_treats_applied_action_as_present() {
        let store = Arc::new(FakeStore::default());
        store.put_view(ready_view("acme", OAUTH_CLIENT_VIEW_NAME, &[("found", "false")]));
        let provisioner = ViewActionProvisioner::new(store.clone());
        let client = hub_client();

        provisioner
            .provision(&eligible("acme"), &context(&client))
            .await
            .unwrap();
        store.mark_action_ready("acme", OAUTH_CLIENT_ACTION_NAME);

        let outcome = provisioner
            .provision(&eligible("acme"), &context(&client))
            .await
            .unwrap();
        assert_eq!(outcome, ProvisionOutcome::Present);
        assert_eq!(store.actions().len(), 1);
    }

    #[tokio::test]
    async fn work_bundle_is_created_then_left_alone() {
        let store = Arc::new(FakeStore::default());
        let provisioner =
            WorkBundleProvisioner::new(store.clone(), OperatorConfig::default().executor());
        let client = hub_client();

        let first = provisioner
            .provision(&eligible("acme"), &context(&client))
            .await
            .unwrap();
        let second = provisioner
            .provision(&eligible("acme"), &context(&client))
            .await
            .unwrap();

        assert_eq!(first, ProvisionOutcome::Applied { changed: true });
        assert_eq!(second, ProvisionOutcome::Applied { changed: false });
        assert_eq!(store.calls().work_bundle_creates, 1);
        assert_eq!(store.calls().work_bundle_updates, 0);
    }

    #[tokio::test]
    async fn work_bundle_update_carries_resource_version() {
        let mut store = MockHubStore::new();
        store.expect_get_work_bundle().returning(|namespace, name| {
            let mut existing = WorkBundle::new(
                name,
                appliers::oauth_client_work_bundle(
                    "old",
                    &[],
                    OperatorConfig::default().executor(),
                ),
            );
            existing.metadata.namespace = Some(namespace.to_string());
            existing.metadata.resource_version = Some("42".to_string());
            Ok(Some(existing))
        });
        store
            .expect_update_work_bundle()
            .withf(|bundle| {
                bundle.metadata.resource_version.as_deref() == Some("42")
                    && bundle.spec.workload.manifests[0]["secret"] == "s3cret"
            })
            .times(1)
            .returning(Ok);
        store.expect_create_work_bundle().never();

        let provisioner =
            WorkBundleProvisioner::new(Arc::new(store), OperatorConfig::default().executor());
        let client = hub_client();
        let outcome = provisioner
            .provision(&eligible("acme"), &context(&client))
            .await
            .unwrap();

        assert_eq!(outcome, ProvisionOutcome::Applied { changed: true });
    }
}
