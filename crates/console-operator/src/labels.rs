//! Label scheme shared by every object the managed-cluster features create,
//! and the deterministic names the console server depends on.
//!
//! Listing by these labels is the only way objects are enumerated, diffed and
//! cleaned up. There is no other index.

use std::{collections::BTreeMap, fmt};

/// Marks an object as created by the managed-cluster features. The value is
/// the [`Component`] that owns it.
pub const FEATURE_LABEL: &str = "console.openshift.io/managed-cluster-sync";

/// Name of the managed cluster a per-cluster object belongs to.
pub const CLUSTER_LABEL: &str = "console.openshift.io/managed-cluster-name";

/// Key holding PEM data in every CA ConfigMap and in view results.
pub const CA_BUNDLE_KEY: &str = "ca-bundle.crt";

pub const API_SERVER_CA_SUFFIX: &str = "managed-cluster-api-server-ca";
pub const INGRESS_CERT_SUFFIX: &str = "managed-cluster-ingress-cert";

pub const API_SERVER_CA_MOUNT_DIR: &str = "/var/managed-cluster-api-server-certs";
pub const OAUTH_SERVER_CA_MOUNT_DIR: &str = "/var/managed-cluster-oauth-server-certs";

pub const CLUSTER_CONFIG_MAP_NAME: &str = "managed-clusters";
pub const CLUSTER_CONFIG_KEY: &str = "managed-clusters.yaml";

pub const API_SERVER_CA_VIEW_NAME: &str = "console-api-server-ca";
pub const INGRESS_CERT_VIEW_NAME: &str = "console-ingress-cert";
pub const OAUTH_CLIENT_VIEW_NAME: &str = "console-oauth-client";
pub const OAUTH_CLIENT_ACTION_NAME: &str = "console-create-oauth-client";
pub const OAUTH_CLIENT_WORK_NAME: &str = "console-oauth-client";

/// Name of the OAuth client created inside every managed cluster.
pub const REMOTE_OAUTH_CLIENT_NAME: &str = "console-managed-cluster-oauth-client";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Component {
    ApiServerCa,
    IngressCert,
    OAuthClient,
    ClusterConfig,
    OAuthWork,
}

impl Component {
    /// Components owned by the view/action based sync controller.
    pub const SYNC: [Component; 4] = [
        Component::ApiServerCa,
        Component::IngressCert,
        Component::OAuthClient,
        Component::ClusterConfig,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::ApiServerCa => "api-server-ca",
            Component::IngressCert => "ingress-cert",
            Component::OAuthClient => "oauth-client",
            Component::ClusterConfig => "cluster-config",
            Component::OAuthWork => "oauth-work",
        }
    }

    /// Labels stamped on an object owned by this component.
    pub fn labels(&self, cluster: Option<&str>) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::from([(FEATURE_LABEL.to_string(), self.as_str().to_string())]);
        if let Some(cluster) = cluster {
            labels.insert(CLUSTER_LABEL.to_string(), cluster.to_string());
        }
        labels
    }

    pub fn selector(&self) -> LabelSelector {
        LabelSelector::Equals(FEATURE_LABEL, self.as_str())
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Label selectors the operator lists with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LabelSelector {
    Exists(&'static str),
    Equals(&'static str, &'static str),
    In(&'static str, Vec<&'static str>),
}

impl LabelSelector {
    /// Everything any managed-cluster feature created.
    pub fn feature() -> Self {
        LabelSelector::Exists(FEATURE_LABEL)
    }

    pub fn components(components: &[Component]) -> Self {
        LabelSelector::In(
            FEATURE_LABEL,
            components.iter().map(Component::as_str).collect(),
        )
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            LabelSelector::Exists(key) => labels.contains_key(*key),
            LabelSelector::Equals(key, value) => labels.get(*key).is_some_and(|v| v == value),
            LabelSelector::In(key, values) => labels
                .get(*key)
                .is_some_and(|v| values.iter().any(|candidate| v == candidate)),
        }
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelSelector::Exists(key) => f.write_str(key),
            LabelSelector::Equals(key, value) => write!(f, "{key}={value}"),
            LabelSelector::In(key, values) => write!(f, "{key} in ({})", values.join(",")),
        }
    }
}

pub fn cluster_of(labels: &BTreeMap<String, String>) -> Option<&str> {
    labels.get(CLUSTER_LABEL).map(String::as_str)
}

pub fn api_server_ca_config_map_name(cluster: &str) -> String {
    format!("{cluster}-{API_SERVER_CA_SUFFIX}")
}

pub fn ingress_cert_config_map_name(cluster: &str) -> String {
    format!("{cluster}-{INGRESS_CERT_SUFFIX}")
}

/// Path at which the console server finds a cluster's API server CA.
pub fn api_server_ca_file(cluster: &str) -> String {
    format!(
        "{API_SERVER_CA_MOUNT_DIR}/{}/{CA_BUNDLE_KEY}",
        api_server_ca_config_map_name(cluster)
    )
}

/// Path at which the console server finds a cluster's OAuth server CA.
pub fn oauth_server_ca_file(cluster: &str) -> String {
    format!(
        "{OAUTH_SERVER_CA_MOUNT_DIR}/{}/{CA_BUNDLE_KEY}",
        ingress_cert_config_map_name(cluster)
    )
}
