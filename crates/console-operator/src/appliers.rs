//! Builders for the requests the managed-cluster features issue.
//!
//! All of them are pure. Views and actions are only ever identified by name,
//! so the same inputs must always produce the same spec.

use serde_json::{Value, json};

use crate::{
    api::{
        ActionType, Executor, KubeWork, RemoteActionSpec, RemoteViewSpec, ViewScope,
        WorkBundleSpec, Workload,
    },
    labels::REMOTE_OAUTH_CLIENT_NAME,
};

const CONFIG_MANAGED_NAMESPACE: &str = "openshift-config-managed";
const VIEW_UPDATE_INTERVAL_SECONDS: u32 = 300;

fn config_map_view(name: &str) -> RemoteViewSpec {
    RemoteViewSpec {
        scope: ViewScope {
            resource: "configmaps".to_string(),
            api_group: None,
            version: "v1".to_string(),
            name: name.to_string(),
            namespace: Some(CONFIG_MANAGED_NAMESPACE.to_string()),
            update_interval_seconds: Some(VIEW_UPDATE_INTERVAL_SECONDS),
        },
    }
}

/// CA bundle serving the managed cluster's API server.
pub fn api_server_ca_view() -> RemoteViewSpec {
    config_map_view("kube-apiserver-server-ca")
}

/// CA of the managed cluster's default ingress, which fronts its OAuth server.
pub fn ingress_cert_view() -> RemoteViewSpec {
    config_map_view("default-ingress-cert")
}

/// The console OAuth client inside the managed cluster, if any.
pub fn remote_oauth_client_view() -> RemoteViewSpec {
    RemoteViewSpec {
        scope: ViewScope {
            resource: "oauthclients".to_string(),
            api_group: Some("oauth.openshift.io".to_string()),
            version: "v1".to_string(),
            name: REMOTE_OAUTH_CLIENT_NAME.to_string(),
            namespace: None,
            update_interval_seconds: Some(VIEW_UPDATE_INTERVAL_SECONDS),
        },
    }
}

/// Manifest of the OAuth client every managed cluster should carry.
pub fn remote_oauth_client_manifest(secret: &str, redirect_uris: &[String]) -> Value {
    json!({
        "apiVersion": "oauth.openshift.io/v1",
        "kind": "OAuthClient",
        "metadata": {
            "name": REMOTE_OAUTH_CLIENT_NAME,
        },
        "grantMethod": "auto",
        "secret": secret,
        "redirectURIs": redirect_uris,
    })
}

pub fn create_remote_oauth_client_action(
    secret: &str,
    redirect_uris: &[String],
) -> RemoteActionSpec {
    RemoteActionSpec {
        action_type: ActionType::Create,
        kube: KubeWork {
            resource: "oauthclient".to_string(),
            name: REMOTE_OAUTH_CLIENT_NAME.to_string(),
            namespace: None,
            template: remote_oauth_client_manifest(secret, redirect_uris),
        },
    }
}

pub fn oauth_client_work_bundle(
    secret: &str,
    redirect_uris: &[String],
    executor: Executor,
) -> WorkBundleSpec {
    WorkBundleSpec {
        workload: Workload {
            manifests: vec![remote_oauth_client_manifest(secret, redirect_uris)],
        },
        executor,
    }
}
