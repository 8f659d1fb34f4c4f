use std::collections::BTreeSet;

use k8s_openapi::{
    api::core::v1::ObjectReference, apimachinery::pkg::apis::meta::v1::OwnerReference,
};
use kube::{Resource, ResourceExt, runtime::reflector::ObjectRef};
use tracing::{debug, info};

use super::{Error, MultiClusterError, Result};
use crate::{
    api::{Console, EligibleCluster, HubOAuthClient},
    labels::{LabelSelector, cluster_of},
    status::StatusHandler,
    store::HubStore,
};

pub mod managed_cluster;
pub mod oauth_work;

pub(crate) fn owner_ref_from_object_ref(object_ref: &ObjectReference) -> Result<OwnerReference> {
    Ok(OwnerReference {
        api_version: object_ref
            .api_version
            .clone()
            .ok_or(Error::MissingField("apiVersion"))?,
        kind: object_ref.kind.clone().ok_or(Error::MissingField("kind"))?,
        name: object_ref.name.clone().ok_or(Error::MissingField("name"))?,
        uid: object_ref.uid.clone().ok_or(Error::MissingField("uid"))?,
        ..Default::default()
    })
}

/// Watch mapper sending every event to the one Console the orchestrators
/// report on.
pub(crate) fn to_console<K>(name: String) -> impl Fn(K) -> Option<ObjectRef<Console>> + Send + Sync + 'static
where
    K: 'static,
{
    move |_| Some(ObjectRef::new(&name))
}

/// Managed clusters that pass the eligibility filter, sorted by name.
pub(crate) async fn list_eligible_clusters(store: &dyn HubStore) -> Result<Vec<EligibleCluster>> {
    let mut eligible = Vec::new();
    for cluster in store.list_managed_clusters().await? {
        match cluster.eligible() {
            Some(cluster) => eligible.push(cluster),
            None => info!(cluster = %cluster.name_any(), "skipping ineligible managed cluster"),
        }
    }
    eligible.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(eligible)
}

/// The hub's OAuth client. Its absence fails the cycle's precondition.
pub(crate) async fn require_hub_client(store: &dyn HubStore, name: &str) -> Result<HubOAuthClient> {
    store
        .get_hub_oauth_client(name)
        .await?
        .ok_or_else(|| Error::Precondition(format!("hub OAuth client {name} not found")))
}

/// Tear down everything `selector` matches, record the failed precondition
/// and end the cycle with it.
pub(crate) async fn abort_cycle(
    store: &dyn HubStore,
    namespace: &str,
    selector: &LabelSelector,
    mut status: StatusHandler,
    console: &str,
    prefix: &str,
    error: Error,
) -> Result<()> {
    status.handle_degraded(prefix, "PreconditionFailed", Err(error));
    let removed = teardown(store, namespace, selector).await.map(|count| {
        info!(count, "removed managed cluster objects after failed precondition");
    });
    status.handle_degraded(prefix, "TeardownFailed", removed);
    status.flush(store, console).await
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    ConfigMap,
    RemoteView,
    RemoteAction,
    WorkBundle,
}

#[derive(Debug)]
struct Owned {
    kind: Kind,
    namespace: String,
    name: String,
    cluster: Option<String>,
}

impl Owned {
    fn of<K: Resource>(kind: Kind, object: &K) -> Self {
        Self {
            kind,
            namespace: object.namespace().unwrap_or_default(),
            name: object.name_any(),
            cluster: cluster_of(object.labels()).map(str::to_string),
        }
    }
}

/// Every object `selector` matches: ConfigMaps in `namespace` and mediating
/// resources across all cluster namespaces.
async fn list_owned(
    store: &dyn HubStore,
    namespace: &str,
    selector: &LabelSelector,
) -> Result<Vec<Owned>> {
    let mut owned = Vec::new();
    owned.extend(
        store
            .list_config_maps(namespace, selector)
            .await?
            .iter()
            .map(|o| Owned::of(Kind::ConfigMap, o)),
    );
    owned.extend(
        store
            .list_views(selector)
            .await?
            .iter()
            .map(|o| Owned::of(Kind::RemoteView, o)),
    );
    owned.extend(
        store
            .list_actions(selector)
            .await?
            .iter()
            .map(|o| Owned::of(Kind::RemoteAction, o)),
    );
    owned.extend(
        store
            .list_work_bundles(selector)
            .await?
            .iter()
            .map(|o| Owned::of(Kind::WorkBundle, o)),
    );
    Ok(owned)
}

async fn delete_owned(store: &dyn HubStore, object: &Owned) -> Result<()> {
    let (namespace, name) = (object.namespace.as_str(), object.name.as_str());
    let result = match object.kind {
        Kind::ConfigMap => store.delete_config_map(namespace, name).await,
        Kind::RemoteView => store.delete_view(namespace, name).await,
        Kind::RemoteAction => store.delete_action(namespace, name).await,
        Kind::WorkBundle => store.delete_work_bundle(namespace, name).await,
    };
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

/// Attempts every deletion before reporting the failures together.
async fn delete_all(store: &dyn HubStore, objects: Vec<Owned>) -> Result<usize> {
    let mut errors = MultiClusterError::default();
    let mut deleted = 0;
    for object in objects {
        match delete_owned(store, &object).await {
            Ok(()) => {
                debug!(kind = ?object.kind, namespace = %object.namespace, name = %object.name, "deleted");
                deleted += 1;
            }
            Err(e) => errors.push(object.cluster.as_deref().unwrap_or("hub"), e),
        }
    }
    errors.into_result()?;
    Ok(deleted)
}

/// Delete every object labelled for `selector`. Objects already gone count as
/// deleted.
pub(crate) async fn teardown(
    store: &dyn HubStore,
    namespace: &str,
    selector: &LabelSelector,
) -> Result<usize> {
    let objects = list_owned(store, namespace, selector).await?;
    delete_all(store, objects).await
}

/// Delete per-cluster objects matching `selector` whose cluster is no longer
/// eligible. Objects without a cluster label are kept.
pub(crate) async fn prune_stale(
    store: &dyn HubStore,
    namespace: &str,
    selector: &LabelSelector,
    eligible: &[EligibleCluster],
) -> Result<usize> {
    let keep: BTreeSet<&str> = eligible.iter().map(|c| c.name.as_str()).collect();
    let stale = list_owned(store, namespace, selector)
        .await?
        .into_iter()
        .filter(|o| o.cluster.as_deref().is_some_and(|c| !keep.contains(c)))
        .collect();
    delete_all(store, stale).await
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;

    use super::*;
    use crate::{
        api::ManagedCluster,
        labels::Component,
        store::MockHubStore,
        testing::{FakeStore, eligible, managed_cluster, ready_cluster},
    };

    fn labelled_config_map(name: &str, component: Component, cluster: Option<&str>) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("openshift-console".to_string()),
                labels: Some(component.labels(cluster)),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn owner_ref_requires_uid() {
        let object_ref = ObjectReference {
            api_version: Some("operator.openshift.io/v1".to_string()),
            kind: Some("Console".to_string()),
            name: Some("cluster".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            owner_ref_from_object_ref(&object_ref),
            Err(Error::MissingField("uid"))
        ));
    }

    #[tokio::test]
    async fn eligible_clusters_are_filtered_and_sorted() {
        let mut local = ready_cluster("local-cluster");
        local
            .labels_mut()
            .insert("local-cluster".to_string(), "true".to_string());
        let clusters: Vec<ManagedCluster> = vec![
            ready_cluster("west"),
            managed_cluster("no-ca", Some("https://api.no-ca:6443"), None),
            managed_cluster("no-url", None, Some("PEM")),
            local,
            ready_cluster("east"),
        ];
        let store = FakeStore::with_clusters(clusters);

        let names: Vec<String> = list_eligible_clusters(&store)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["east", "west"]);
    }

    #[tokio::test]
    async fn missing_hub_client_is_a_precondition_failure() {
        let store = FakeStore::default();
        assert!(matches!(
            require_hub_client(&store, "console").await,
            Err(Error::Precondition(_))
        ));
    }

    #[tokio::test]
    async fn teardown_tolerates_objects_already_gone() {
        let mut store = MockHubStore::new();
        store.expect_list_config_maps().returning(|_, _| {
            Ok(vec![labelled_config_map(
                "acme-managed-cluster-api-server-ca",
                Component::ApiServerCa,
                Some("acme"),
            )])
        });
        store.expect_list_views().returning(|_| Ok(vec![]));
        store.expect_list_actions().returning(|_| Ok(vec![]));
        store.expect_list_work_bundles().returning(|_| Ok(vec![]));
        store
            .expect_delete_config_map()
            .times(1)
            .returning(|_, name| {
                Err(Error::NotFound {
                    kind: "ConfigMap",
                    name: name.to_string(),
                })
            });

        assert_eq!(
            teardown(&store, "openshift-console", &LabelSelector::feature())
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn teardown_reports_failures_after_trying_everything() {
        let mut store = MockHubStore::new();
        store.expect_list_config_maps().returning(|_, _| {
            Ok(vec![
                labelled_config_map("east-ca", Component::ApiServerCa, Some("east")),
                labelled_config_map("west-ca", Component::ApiServerCa, Some("west")),
            ])
        });
        store.expect_list_views().returning(|_| Ok(vec![]));
        store.expect_list_actions().returning(|_| Ok(vec![]));
        store.expect_list_work_bundles().returning(|_| Ok(vec![]));
        store
            .expect_delete_config_map()
            .times(2)
            .returning(|_, name| match name {
                "east-ca" => Err(Error::Conflict {
                    kind: "ConfigMap",
                    name: name.to_string(),
                }),
                _ => Ok(()),
            });

        let error = teardown(&store, "openshift-console", &LabelSelector::feature())
            .await
            .unwrap_err();
        match error {
            Error::MultiCluster(errors) => {
                assert_eq!(errors.clusters().collect::<Vec<_>>(), vec!["east"])
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn prune_keeps_eligible_and_unlabelled_objects() {
        let store = FakeStore::default();
        for config_map in [
            labelled_config_map("east-ca", Component::ApiServerCa, Some("east")),
            labelled_config_map("gone-ca", Component::ApiServerCa, Some("gone")),
            labelled_config_map("managed-clusters", Component::ClusterConfig, None),
        ] {
            store.put_config_map(config_map);
        }

        let pruned = prune_stale(
            &store,
            "openshift-console",
            &LabelSelector::feature(),
            &[eligible("east")],
        )
        .await
        .unwrap();

        assert_eq!(pruned, 1);
        assert!(store.config_map("openshift-console", "gone-ca").is_none());
        assert!(store.config_map("openshift-console", "east-ca").is_some());
        assert!(store.config_map("openshift-console", "managed-clusters").is_some());
    }
}
