//! In-memory hub used by the orchestrator tests.

use std::{
    collections::{BTreeMap, HashSet},
    sync::Mutex,
};

use async_trait::async_trait;
use k8s_openapi::{ByteString, api::core::v1::ConfigMap};
use kube::{Resource, ResourceExt, api::ObjectMeta};

use crate::{
    Error, Result,
    api::{
        ClientConfig, Console, ConsoleSpec, EligibleCluster, HubOAuthClient, ManagedCluster,
        ManagedClusterSpec, ManagementState, MediationCondition, OperatorCondition, RemoteAction,
        RemoteActionStatus, RemoteView, RemoteViewStatus, WorkBundle,
    },
    appliers,
    labels::LabelSelector,
    status::merge_conditions,
    store::HubStore,
};

type Key = (String, String);

#[derive(Clone, Debug, Default)]
pub struct Calls {
    pub config_map_writes: usize,
    pub work_bundle_creates: usize,
    pub work_bundle_updates: usize,
    pub creates: usize,
    pub deletes: usize,
}

#[derive(Default)]
struct State {
    clusters: Vec<ManagedCluster>,
    hub_client: Option<HubOAuthClient>,
    hub_client_unavailable: bool,
    conditions: Vec<OperatorCondition>,
    config_maps: BTreeMap<Key, ConfigMap>,
    views: BTreeMap<Key, RemoteView>,
    actions: BTreeMap<Key, RemoteAction>,
    bundles: BTreeMap<Key, WorkBundle>,
    failing_config_maps: HashSet<String>,
    failing_view_namespaces: HashSet<String>,
    calls: Calls,
    revision: u64,
}

impl State {
    fn stamp(&mut self, metadata: &mut ObjectMeta) {
        self.revision += 1;
        metadata.resource_version = Some(self.revision.to_string());
        if metadata.uid.is_none() {
            metadata.uid = Some(format!("uid-{}", self.revision));
        }
    }
}

#[derive(Default)]
pub struct FakeStore {
    state: Mutex<State>,
}

fn key<K: Resource>(object: &K) -> Key {
    (object.namespace().unwrap_or_default(), object.name_any())
}

fn owned(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

impl FakeStore {
    pub fn with_clusters(clusters: Vec<ManagedCluster>) -> Self {
        let store = Self::default();
        {
            let mut state = store.state.lock().unwrap();
            state.clusters = clusters;
            state.hub_client = Some(hub_client());
        }
        store
    }

    pub fn set_clusters(&self, clusters: Vec<ManagedCluster>) {
        self.state.lock().unwrap().clusters = clusters;
    }

    pub fn set_hub_client(&self, client: Option<HubOAuthClient>) {
        self.state.lock().unwrap().hub_client = client;
    }

    pub fn set_hub_client_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().hub_client_unavailable = unavailable;
    }

    /// Fail writes and deletes of the ConfigMap named `name`.
    pub fn fail_config_map(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_config_maps
            .insert(name.to_string());
    }

    /// Fail every view created in `namespace`.
    pub fn fail_views_in(&self, namespace: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_view_namespaces
            .insert(namespace.to_string());
    }

    pub fn calls(&self) -> Calls {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn conditions(&self) -> Vec<OperatorCondition> {
        self.state.lock().unwrap().conditions.clone()
    }

    pub fn condition(&self, type_: &str) -> Option<OperatorCondition> {
        self.conditions().into_iter().find(|c| c.type_ == type_)
    }

    pub fn config_maps(&self) -> Vec<ConfigMap> {
        self.state.lock().unwrap().config_maps.values().cloned().collect()
    }

    pub fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        self.state
            .lock()
            .unwrap()
            .config_maps
            .get(&owned(namespace, name))
            .cloned()
    }

    /// Store an unrelated object the operator must never touch.
    pub fn put_config_map(&self, config_map: ConfigMap) {
        let mut state = self.state.lock().unwrap();
        state.config_maps.insert(key(&config_map), config_map);
    }

    pub fn views(&self) -> Vec<RemoteView> {
        self.state.lock().unwrap().views.values().cloned().collect()
    }

    pub fn put_view(&self, view: RemoteView) {
        let mut state = self.state.lock().unwrap();
        state.views.insert(key(&view), view);
    }

    /// Answer a previously issued view the way the remote agent would.
    pub fn answer_view(&self, namespace: &str, name: &str, result: &[(&str, &str)]) {
        let mut state = self.state.lock().unwrap();
        if let Some(view) = state.views.get_mut(&owned(namespace, name)) {
            view.status = ready_view(namespace, name, result).status;
        }
    }

    pub fn actions(&self) -> Vec<RemoteAction> {
        self.state.lock().unwrap().actions.values().cloned().collect()
    }

    pub fn mark_action_ready(&self, namespace: &str, name: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(action) = state.actions.get_mut(&owned(namespace, name)) {
            action.status = Some(RemoteActionStatus {
                conditions: vec![MediationCondition::new("Completed", "True")],
            });
        }
    }

    pub fn work_bundles(&self) -> Vec<WorkBundle> {
        self.state.lock().unwrap().bundles.values().cloned().collect()
    }

    pub fn put_work_bundle(&self, mut bundle: WorkBundle) {
        let mut state = self.state.lock().unwrap();
        state.stamp(&mut bundle.metadata);
        state.bundles.insert(key(&bundle), bundle);
    }

    /// Every object the operator could have created.
    pub fn object_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.config_maps.len() + state.views.len() + state.actions.len() + state.bundles.len()
    }
}

fn not_found(kind: &'static str, namespace: &str, name: &str) -> Error {
    Error::NotFound {
        kind,
        name: format!("{namespace}/{name}"),
    }
}

fn already_exists(kind: &'static str, key: &Key) -> Error {
    Error::AlreadyExists {
        kind,
        name: format!("{}/{}", key.0, key.1),
    }
}

#[async_trait]
impl HubStore for FakeStore {
    async fn list_managed_clusters(&self) -> Result<Vec<ManagedCluster>> {
        Ok(self.state.lock().unwrap().clusters.clone())
    }

    async fn get_hub_oauth_client(&self, name: &str) -> Result<Option<HubOAuthClient>> {
        let state = self.state.lock().unwrap();
        if state.hub_client_unavailable {
            return Err(Error::Conflict {
                kind: "OAuthClient",
                name: name.to_string(),
            });
        }
        Ok(state.hub_client.clone().filter(|c| c.name == name))
    }

    async fn update_console_conditions(
        &self,
        _name: &str,
        conditions: Vec<OperatorCondition>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.conditions = merge_conditions(&state.conditions, conditions);
        Ok(())
    }

    async fn list_config_maps(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ConfigMap>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .config_maps
            .iter()
            .filter(|((ns, _), cm)| ns == namespace && selector.matches(cm.labels()))
            .map(|(_, cm)| cm.clone())
            .collect())
    }

    async fn apply_config_map(&self, mut desired: ConfigMap) -> Result<(ConfigMap, bool)> {
        let mut state = self.state.lock().unwrap();
        let key = key(&desired);
        if state.failing_config_maps.contains(&key.1) {
            return Err(Error::Conflict {
                kind: "ConfigMap",
                name: key.1,
            });
        }
        let unchanged = state
            .config_maps
            .get(&key)
            .filter(|current| current.data == desired.data && current.labels() == desired.labels())
            .cloned();
        if let Some(current) = unchanged {
            return Ok((current, false));
        }
        state.calls.config_map_writes += 1;
        if let Some(current) = state.config_maps.get(&key) {
            desired.metadata.uid = current.metadata.uid.clone();
        }
        state.stamp(&mut desired.metadata);
        state.config_maps.insert(key, desired.clone());
        Ok((desired, true))
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing_config_maps.contains(name) {
            return Err(Error::Conflict {
                kind: "ConfigMap",
                name: name.to_string(),
            });
        }
        state.calls.deletes += 1;
        state
            .config_maps
            .remove(&owned(namespace, name))
            .map(|_| ())
            .ok_or_else(|| not_found("ConfigMap", namespace, name))
    }

    async fn get_view(&self, namespace: &str, name: &str) -> Result<Option<RemoteView>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .views
            .get(&owned(namespace, name))
            .cloned())
    }

    async fn create_view(&self, mut view: RemoteView) -> Result<RemoteView> {
        let mut state = self.state.lock().unwrap();
        let key = key(&view);
        if state.failing_view_namespaces.contains(&key.0) {
            return Err(Error::Conflict {
                kind: "RemoteView",
                name: key.1,
            });
        }
        if state.views.contains_key(&key) {
            return Err(already_exists("RemoteView", &key));
        }
        state.calls.creates += 1;
        state.stamp(&mut view.metadata);
        state.views.insert(key, view.clone());
        Ok(view)
    }

    async fn list_views(&self, selector: &LabelSelector) -> Result<Vec<RemoteView>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .views
            .values()
            .filter(|v| selector.matches(v.labels()))
            .cloned()
            .collect())
    }

    async fn delete_view(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.deletes += 1;
        state
            .views
            .remove(&owned(namespace, name))
            .map(|_| ())
            .ok_or_else(|| not_found("RemoteView", namespace, name))
    }

    async fn get_action(&self, namespace: &str, name: &str) -> Result<Option<RemoteAction>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .actions
            .get(&owned(namespace, name))
            .cloned())
    }

    async fn create_action(&self, mut action: RemoteAction) -> Result<RemoteAction> {
        let mut state = self.state.lock().unwrap();
        let key = key(&action);
        if state.actions.contains_key(&key) {
            return Err(already_exists("RemoteAction", &key));
        }
        state.calls.creates += 1;
        state.stamp(&mut action.metadata);
        state.actions.insert(key, action.clone());
        Ok(action)
    }

    async fn list_actions(&self, selector: &LabelSelector) -> Result<Vec<RemoteAction>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .actions
            .values()
            .filter(|a| selector.matches(a.labels()))
            .cloned()
            .collect())
    }

    async fn delete_action(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.deletes += 1;
        state
            .actions
            .remove(&owned(namespace, name))
            .map(|_| ())
            .ok_or_else(|| not_found("RemoteAction", namespace, name))
    }

    async fn get_work_bundle(&self, namespace: &str, name: &str) -> Result<Option<WorkBundle>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .bundles
            .get(&owned(namespace, name))
            .cloned())
    }

    async fn create_work_bundle(&self, mut bundle: WorkBundle) -> Result<WorkBundle> {
        let mut state = self.state.lock().unwrap();
        let key = key(&bundle);
        if state.bundles.contains_key(&key) {
            return Err(already_exists("WorkBundle", &key));
        }
        state.calls.creates += 1;
        state.calls.work_bundle_creates += 1;
        state.stamp(&mut bundle.metadata);
        state.bundles.insert(key, bundle.clone());
        Ok(bundle)
    }

    async fn update_work_bundle(&self, mut bundle: WorkBundle) -> Result<WorkBundle> {
        let mut state = self.state.lock().unwrap();
        let key = key(&bundle);
        let current = state
            .bundles
            .get(&key)
            .ok_or_else(|| not_found("WorkBundle", &key.0, &key.1))?;
        if current.metadata.resource_version != bundle.metadata.resource_version {
            return Err(Error::Conflict {
                kind: "WorkBundle",
                name: key.1,
            });
        }
        bundle.metadata.uid = current.metadata.uid.clone();
        state.calls.work_bundle_updates += 1;
        state.stamp(&mut bundle.metadata);
        state.bundles.insert(key, bundle.clone());
        Ok(bundle)
    }

    async fn list_work_bundles(&self, selector: &LabelSelector) -> Result<Vec<WorkBundle>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .bundles
            .values()
            .filter(|b| selector.matches(b.labels()))
            .cloned()
            .collect())
    }

    async fn delete_work_bundle(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.deletes += 1;
        state
            .bundles
            .remove(&owned(namespace, name))
            .map(|_| ())
            .ok_or_else(|| not_found("WorkBundle", namespace, name))
    }
}

pub fn managed_cluster(name: &str, url: Option<&str>, ca_bundle: Option<&str>) -> ManagedCluster {
    ManagedCluster::new(
        name,
        ManagedClusterSpec {
            managed_cluster_client_configs: vec![ClientConfig {
                url: url.unwrap_or_default().to_string(),
                ca_bundle: ca_bundle.map(|pem| ByteString(pem.as_bytes().to_vec())),
            }],
            hub_accepts_client: true,
        },
    )
}

/// A cluster that passes the eligibility filter, with a CA derived from its name.
pub fn ready_cluster(name: &str) -> ManagedCluster {
    managed_cluster(
        name,
        Some(&format!("https://api.{name}:6443")),
        Some(&format!("{name}-ca")),
    )
}

pub fn eligible(name: &str) -> EligibleCluster {
    ready_cluster(name)
        .eligible()
        .unwrap_or_else(|| panic!("{name} should be eligible"))
}

pub fn hub_client() -> HubOAuthClient {
    HubOAuthClient {
        name: "console".to_string(),
        secret: "s3cret".to_string(),
        redirect_uris: vec!["https://console.hub/auth/callback".to_string()],
    }
}

pub fn console(state: ManagementState) -> Console {
    let mut console = Console::new(
        "cluster",
        ConsoleSpec {
            management_state: state,
        },
    );
    console.metadata.uid = Some("console-uid".to_string());
    console
}

/// A view in `namespace` whose agent has answered with `result`.
pub fn ready_view(namespace: &str, name: &str, result: &[(&str, &str)]) -> RemoteView {
    let mut view = RemoteView::new(name, appliers::ingress_cert_view());
    view.metadata.namespace = Some(namespace.to_string());
    view.status = Some(RemoteViewStatus {
        conditions: vec![MediationCondition::new("Processing", "True")],
        result: Some(
            result
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ),
    });
    view
}
