//! Access to the hub API server.
//!
//! Every read and write the orchestrators perform goes through [`HubStore`],
//! so the sync logic can be exercised without a cluster.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{
    Api, Client, Resource, ResourceExt,
    api::{DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams, PostParams},
    discovery::ApiResource,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{Level, instrument};

#[cfg(test)]
use mockall::automock;

use crate::{
    Error, Result,
    api::{
        Console, HubOAuthClient, ManagedCluster, OperatorCondition, RemoteAction, RemoteView,
        WorkBundle,
    },
    labels::LabelSelector,
    status::merge_conditions,
};

/// Hub API operations used by the managed-cluster features.
///
/// Implementations report a missing object as [`Error::NotFound`], a create
/// over an existing name as [`Error::AlreadyExists`] and a stale write as
/// [`Error::Conflict`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HubStore: Send + Sync {
    async fn list_managed_clusters(&self) -> Result<Vec<ManagedCluster>>;

    /// Fetch the hub's OAuth client, `None` if it does not exist.
    async fn get_hub_oauth_client(&self, name: &str) -> Result<Option<HubOAuthClient>>;

    /// Merge `conditions` into the Console's status, keyed by condition type.
    async fn update_console_conditions(
        &self,
        name: &str,
        conditions: Vec<OperatorCondition>,
    ) -> Result<()>;

    async fn list_config_maps(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ConfigMap>>;

    /// Create the ConfigMap, or replace it if its data or labels differ.
    /// Returns the stored object and whether anything was written.
    async fn apply_config_map(&self, desired: ConfigMap) -> Result<(ConfigMap, bool)>;

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()>;

    async fn get_view(&self, namespace: &str, name: &str) -> Result<Option<RemoteView>>;

    async fn create_view(&self, view: RemoteView) -> Result<RemoteView>;

    async fn list_views(&self, selector: &LabelSelector) -> Result<Vec<RemoteView>>;

    async fn delete_view(&self, namespace: &str, name: &str) -> Result<()>;

    async fn get_action(&self, namespace: &str, name: &str) -> Result<Option<RemoteAction>>;

    async fn create_action(&self, action: RemoteAction) -> Result<RemoteAction>;

    async fn list_actions(&self, selector: &LabelSelector) -> Result<Vec<RemoteAction>>;

    async fn delete_action(&self, namespace: &str, name: &str) -> Result<()>;

    async fn get_work_bundle(&self, namespace: &str, name: &str) -> Result<Option<WorkBundle>>;

    async fn create_work_bundle(&self, bundle: WorkBundle) -> Result<WorkBundle>;

    /// Replace an existing bundle. `bundle` must carry the resource version
    /// it was read at.
    async fn update_work_bundle(&self, bundle: WorkBundle) -> Result<WorkBundle>;

    async fn list_work_bundles(&self, selector: &LabelSelector) -> Result<Vec<WorkBundle>>;

    async fn delete_work_bundle(&self, namespace: &str, name: &str) -> Result<()>;
}

/// [`HubStore`] backed by the hub API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn oauth_clients(&self) -> Api<DynamicObject> {
        let resource = ApiResource::from_gvk(&GroupVersionKind::gvk(
            "oauth.openshift.io",
            "v1",
            "OAuthClient",
        ));
        Api::all_with(self.client.clone(), &resource)
    }
}

/// Map status codes the callers branch on onto typed errors.
fn classify(error: kube::Error, kind: &'static str, name: &str) -> Error {
    match &error {
        kube::Error::Api(response) if response.code == 404 => Error::NotFound {
            kind,
            name: name.to_string(),
        },
        kube::Error::Api(response) if response.code == 409 && response.reason == "AlreadyExists" => {
            Error::AlreadyExists {
                kind,
                name: name.to_string(),
            }
        }
        kube::Error::Api(response) if response.code == 409 => Error::Conflict {
            kind,
            name: name.to_string(),
        },
        _ => Error::Kube(error),
    }
}

fn list_params(selector: &LabelSelector) -> ListParams {
    ListParams::default().labels(&selector.to_string())
}

#[derive(Deserialize)]
struct OAuthClientFields {
    #[serde(default)]
    secret: Option<String>,
    #[serde(default, rename = "redirectURIs")]
    redirect_uris: Vec<String>,
}

fn same_config_map(current: &ConfigMap, desired: &ConfigMap) -> bool {
    current.data == desired.data
        && current.binary_data == desired.binary_data
        && desired
            .labels()
            .iter()
            .all(|(k, v)| current.labels().get(k) == Some(v))
}

#[async_trait]
impl HubStore for KubeStore {
    #[instrument(level = Level::DEBUG, skip(self))]
    async fn list_managed_clusters(&self) -> Result<Vec<ManagedCluster>> {
        let clusters = Api::<ManagedCluster>::all(self.client.clone());
        Ok(clusters.list(&ListParams::default()).await?.items)
    }

    #[instrument(level = Level::DEBUG, skip(self))]
    async fn get_hub_oauth_client(&self, name: &str) -> Result<Option<HubOAuthClient>> {
        let Some(object) = self.oauth_clients().get_opt(name).await? else {
            return Ok(None);
        };

        let fields: OAuthClientFields = serde_json::from_value(object.data)?;
        let secret = fields
            .secret
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Precondition(format!("OAuth client {name} has no secret")))?;

        Ok(Some(HubOAuthClient {
            name: name.to_string(),
            secret,
            redirect_uris: fields.redirect_uris,
        }))
    }

    #[instrument(level = Level::DEBUG, skip(self, conditions))]
    async fn update_console_conditions(
        &self,
        name: &str,
        conditions: Vec<OperatorCondition>,
    ) -> Result<()> {
        let consoles = Api::<Console>::all(self.client.clone());
        let console = consoles
            .get(name)
            .await
            .map_err(|e| classify(e, "Console", name))?;

        let merged = merge_conditions(console.conditions(), conditions);
        if merged.as_slice() == console.conditions() {
            return Ok(());
        }

        // Carrying the resource version turns a concurrent status write into a conflict.
        consoles
            .patch_status(
                name,
                &PatchParams::default(),
                &Patch::Merge(json!({
                    "metadata": { "resourceVersion": console.resource_version() },
                    "status": { "conditions": merged },
                })),
            )
            .await
            .map_err(|e| classify(e, "Console", name))?;

        Ok(())
    }

    #[instrument(level = Level::DEBUG, skip(self))]
    async fn list_config_maps(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ConfigMap>> {
        let config_maps = self.namespaced::<ConfigMap>(namespace);
        Ok(config_maps.list(&list_params(selector)).await?.items)
    }

    #[instrument(level = Level::DEBUG, skip(self, desired), fields(name = desired.name_any()))]
    async fn apply_config_map(&self, desired: ConfigMap) -> Result<(ConfigMap, bool)> {
        let name = desired.name_any();
        let namespace = desired.namespace().ok_or(Error::MissingField("namespace"))?;
        let config_maps = self.namespaced::<ConfigMap>(&namespace);

        match config_maps.get_opt(&name).await? {
            None => {
                let created = config_maps
                    .create(&PostParams::default(), &desired)
                    .await
                    .map_err(|e| classify(e, "ConfigMap", &name))?;
                Ok((created, true))
            }
            Some(current) if same_config_map(&current, &desired) => Ok((current, false)),
            Some(current) => {
                let mut updated = desired;
                updated.metadata.resource_version = current.metadata.resource_version.clone();
                let mut labels: BTreeMap<String, String> = current.labels().clone();
                labels.extend(updated.labels().clone());
                updated.metadata.labels = Some(labels);
                updated.metadata.owner_references = updated
                    .metadata
                    .owner_references
                    .or(current.metadata.owner_references);

                let replaced = config_maps
                    .replace(&name, &PostParams::default(), &updated)
                    .await
                    .map_err(|e| classify(e, "ConfigMap", &name))?;
                Ok((replaced, true))
            }
        }
    }

    #[instrument(level = Level::DEBUG, skip(self))]
    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()> {
        self.namespaced::<ConfigMap>(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| classify(e, "ConfigMap", name))?;
        Ok(())
    }

    async fn get_view(&self, namespace: &str, name: &str) -> Result<Option<RemoteView>> {
        Ok(self.namespaced::<RemoteView>(namespace).get_opt(name).await?)
    }

    #[instrument(level = Level::DEBUG, skip(self, view), fields(name = view.name_any()))]
    async fn create_view(&self, view: RemoteView) -> Result<RemoteView> {
        let name = view.name_any();
        let namespace = view.namespace().ok_or(Error::MissingField("namespace"))?;
        self.namespaced::<RemoteView>(&namespace)
            .create(&PostParams::default(), &view)
            .await
            .map_err(|e| classify(e, "RemoteView", &name))
    }

    async fn list_views(&self, selector: &LabelSelector) -> Result<Vec<RemoteView>> {
        let views = Api::<RemoteView>::all(self.client.clone());
        Ok(views.list(&list_params(selector)).await?.items)
    }

    #[instrument(level = Level::DEBUG, skip(self))]
    async fn delete_view(&self, namespace: &str, name: &str) -> Result<()> {
        self.namespaced::<RemoteView>(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| classify(e, "RemoteView", name))?;
        Ok(())
    }

    async fn get_action(&self, namespace: &str, name: &str) -> Result<Option<RemoteAction>> {
        Ok(self.namespaced::<RemoteAction>(namespace).get_opt(name).await?)
    }

    #[instrument(level = Level::DEBUG, skip(self, action), fields(name = action.name_any()))]
    async fn create_action(&self, action: RemoteAction) -> Result<RemoteAction> {
        let name = action.name_any();
        let namespace = action.namespace().ok_or(Error::MissingField("namespace"))?;
        self.namespaced::<RemoteAction>(&namespace)
            .create(&PostParams::default(), &action)
            .await
            .map_err(|e| classify(e, "RemoteAction", &name))
    }

    async fn list_actions(&self, selector: &LabelSelector) -> Result<Vec<RemoteAction>> {
        let actions = Api::<RemoteAction>::all(self.client.clone());
        Ok(actions.list(&list_params(selector)).await?.items)
    }

    #[instrument(level = Level::DEBUG, skip(self))]
    async fn delete_action(&self, namespace: &str, name: &str) -> Result<()> {
        self.namespaced::<RemoteAction>(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| classify(e, "RemoteAction", name))?;
        Ok(())
    }

    async fn get_work_bundle(&self, namespace: &str, name: &str) -> Result<Option<WorkBundle>> {
        Ok(self.namespaced::<WorkBundle>(namespace).get_opt(name).await?)
    }

    #[instrument(level = Level::DEBUG, skip(self, bundle), fields(name = bundle.name_any()))]
    async fn create_work_bundle(&self, bundle: WorkBundle) -> Result<WorkBundle> {
        let name = bundle.name_any();
        let namespace = bundle.namespace().ok_or(Error::MissingField("namespace"))?;
        self.namespaced::<WorkBundle>(&namespace)
            .create(&PostParams::default(), &bundle)
            .await
            .map_err(|e| classify(e, "WorkBundle", &name))
    }

    #[instrument(level = Level::DEBUG, skip(self, bundle), fields(name = bundle.name_any()))]
    async fn update_work_bundle(&self, bundle: WorkBundle) -> Result<WorkBundle> {
        let name = bundle.name_any();
        let namespace = bundle.namespace().ok_or(Error::MissingField("namespace"))?;
        self.namespaced::<WorkBundle>(&namespace)
            .replace(&name, &PostParams::default(), &bundle)
            .await
            .map_err(|e| classify(e, "WorkBundle", &name))
    }

    async fn list_work_bundles(&self, selector: &LabelSelector) -> Result<Vec<WorkBundle>> {
        let bundles = Api::<WorkBundle>::all(self.client.clone());
        Ok(bundles.list(&list_params(selector)).await?.items)
    }

    #[instrument(level = Level::DEBUG, skip(self))]
    async fn delete_work_bundle(&self, namespace: &str, name: &str) -> Result<()> {
        self.namespaced::<WorkBundle>(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| classify(e, "WorkBundle", name))?;
        Ok(())
    }
}
