//! Request/response with managed clusters over mediating custom resources.
//!
//! A request is a [`RemoteView`] or [`RemoteAction`] created in the namespace
//! named after the target cluster. An agent in that cluster answers by writing
//! the first status condition (and, for views, a flat result map). Nothing
//! here waits: readiness is evaluated on the object as it is right now, and a
//! request that is not ready yet is simply checked again on the next cycle.

use std::{collections::BTreeMap, sync::Arc};

use garde::Validate;
use kube::{ResourceExt, api::ObjectMeta};
use tracing::{Level, debug, instrument};

use crate::{
    Result,
    api::{MediationCondition, RemoteAction, RemoteActionSpec, RemoteView, RemoteViewSpec},
    labels::{CA_BUNDLE_KEY, Component},
    store::HubStore,
};

/// Protocol state of a mediated request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Readiness {
    /// Issued, the agent has not confirmed it.
    Requested,
    /// `conditions[0].status == "True"`.
    Ready,
}

impl Readiness {
    /// Only the first condition is consulted. Anything other than an exact
    /// `"True"` there is treated as not ready.
    pub fn of(conditions: &[MediationCondition]) -> Self {
        match conditions.first() {
            Some(condition) if condition.status == "True" => Readiness::Ready,
            _ => Readiness::Requested,
        }
    }

    pub fn is_ready(self) -> bool {
        self == Readiness::Ready
    }
}

/// Outcome of reading a view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ViewResult<T> {
    /// Not answered yet.
    Pending,
    /// Ready, but the result is missing or does not parse. Usually the agent's
    /// write has not reached the cache yet.
    Unusable,
    Ready(T),
}

impl<T> ViewResult<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            ViewResult::Ready(value) => Some(value),
            _ => None,
        }
    }
}

/// Typed payloads decoded from a view's flat result map.
pub trait ViewPayload: Sized {
    fn from_result(result: &BTreeMap<String, String>) -> Option<Self>;
}

/// PEM bundle stored under `ca-bundle.crt`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaBundle(pub String);

impl ViewPayload for CaBundle {
    fn from_result(result: &BTreeMap<String, String>) -> Option<Self> {
        result
            .get(CA_BUNDLE_KEY)
            .filter(|pem| !pem.trim().is_empty())
            .map(|pem| CaBundle(pem.clone()))
    }
}

/// What the agent reports about the OAuth client inside its cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteOAuthClient {
    Absent,
    Present {
        secret: Option<String>,
        redirect_uris: Vec<String>,
    },
}

impl ViewPayload for RemoteOAuthClient {
    fn from_result(result: &BTreeMap<String, String>) -> Option<Self> {
        match result.get("found").map(String::as_str)? {
            "false" => Some(RemoteOAuthClient::Absent),
            "true" => Some(RemoteOAuthClient::Present {
                secret: result.get("secret").cloned(),
                redirect_uris: result
                    .get("redirectURIs")
                    .map(|uris| {
                        uris.split(',')
                            .map(str::trim)
                            .filter(|uri| !uri.is_empty())
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
            }),
            _ => None,
        }
    }
}

/// Raw result of a view: `(result, ready)`. A ready view without a result is
/// reported as not ready.
pub fn read_result(view: &RemoteView) -> (Option<&BTreeMap<String, String>>, bool) {
    let Some(status) = view.status.as_ref() else {
        return (None, false);
    };
    if !Readiness::of(&status.conditions).is_ready() {
        return (None, false);
    }
    match status.result.as_ref().filter(|r| !r.is_empty()) {
        Some(result) => (Some(result), true),
        None => (None, false),
    }
}

/// Decode a view into a typed payload.
pub fn read_view<T: ViewPayload>(view: &RemoteView) -> ViewResult<T> {
    let conditions = view
        .status
        .as_ref()
        .map(|s| s.conditions.as_slice())
        .unwrap_or_default();
    if !Readiness::of(conditions).is_ready() {
        return ViewResult::Pending;
    }

    match read_result(view).0.and_then(T::from_result) {
        Some(payload) => ViewResult::Ready(payload),
        None => {
            debug!(
                view = %view.name_any(),
                cluster = %view.namespace().unwrap_or_default(),
                "view is ready but carries no usable result"
            );
            ViewResult::Unusable
        }
    }
}

/// Whether the agent has applied an action.
pub fn read_readiness(action: &RemoteAction) -> bool {
    action
        .status
        .as_ref()
        .is_some_and(|s| Readiness::of(&s.conditions).is_ready())
}

/// Idempotent create-or-fetch of mediating requests.
#[derive(Clone)]
pub struct MediationClient {
    store: Arc<dyn HubStore>,
}

impl MediationClient {
    pub fn new(store: Arc<dyn HubStore>) -> Self {
        Self { store }
    }

    /// Issue a view named `name` in the cluster's namespace, or return the one
    /// already issued. An existing view's spec is never changed.
    #[instrument(level = Level::DEBUG, skip(self, spec))]
    pub async fn ensure_view(
        &self,
        cluster: &str,
        name: &str,
        component: Component,
        spec: RemoteViewSpec,
    ) -> Result<RemoteView> {
        spec.validate()?;
        let view = RemoteView {
            metadata: request_metadata(cluster, name, component),
            spec,
            status: None,
        };

        match self.store.create_view(view).await {
            Ok(created) => {
                debug!("created view");
                Ok(created)
            }
            Err(e) if e.is_already_exists() => self.fetch_view(cluster, name).await,
            Err(e) => Err(e),
        }
    }

    async fn fetch_view(&self, cluster: &str, name: &str) -> Result<RemoteView> {
        self.store
            .get_view(cluster, name)
            .await?
            .ok_or_else(|| crate::Error::NotFound {
                kind: "RemoteView",
                name: format!("{cluster}/{name}"),
            })
    }

    /// Same idempotency as [`MediationClient::ensure_view`].
    #[instrument(level = Level::DEBUG, skip(self, spec))]
    pub async fn ensure_action(
        &self,
        cluster: &str,
        name: &str,
        component: Component,
        spec: RemoteActionSpec,
    ) -> Result<RemoteAction> {
        spec.validate()?;
        let action = RemoteAction {
            metadata: request_metadata(cluster, name, component),
            spec,
            status: None,
        };

        match self.store.create_action(action).await {
            Ok(created) => {
                debug!("created action");
                Ok(created)
            }
            Err(e) if e.is_already_exists() => self
                .store
                .get_action(cluster, name)
                .await?
                .ok_or_else(|| crate::Error::NotFound {
                    kind: "RemoteAction",
                    name: format!("{cluster}/{name}"),
                }),
            Err(e) => Err(e),
        }
    }

    /// Look up an action without issuing it.
    pub async fn find_action(&self, cluster: &str, name: &str) -> Result<Option<RemoteAction>> {
        self.store.get_action(cluster, name).await
    }
}

fn request_metadata(cluster: &str, name: &str, component: Component) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(cluster.to_string()),
        labels: Some(component.labels(Some(cluster))),
        ..Default::default()
    }
}
