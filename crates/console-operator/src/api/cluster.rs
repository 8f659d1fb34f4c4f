use garde::Validate;
use k8s_openapi::ByteString;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reserved label marking the hub's own registration.
pub const LOCAL_CLUSTER_LABEL: &str = "local-cluster";

/// Registration of a remote cluster with the hub. Read only to this operator.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, Validate, JsonSchema)]
#[kube(
    group = "cluster.open-cluster-management.io",
    version = "v1",
    kind = "ManagedCluster"
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterSpec {
    #[garde(skip)]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub managed_cluster_client_configs: Vec<ClientConfig>,
    #[garde(skip)]
    #[serde(default)]
    pub hub_accepts_client: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    #[serde(default)]
    pub url: String,
    /// Base64-encoded PEM bundle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub ca_bundle: Option<ByteString>,
}

/// A managed cluster that passed the eligibility filter for this sync cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EligibleCluster {
    pub name: String,
    pub url: String,
    pub ca_bundle: String,
}

impl ManagedCluster {
    pub fn is_local(&self) -> bool {
        self.labels()
            .get(LOCAL_CLUSTER_LABEL)
            .is_some_and(|v| v == "true")
    }

    /// Only the first client config is considered: it must carry both an API
    /// URL and a CA bundle, and the cluster must not be the hub itself.
    pub fn eligible(&self) -> Option<EligibleCluster> {
        if self.is_local() {
            return None;
        }
        let config = self.spec.managed_cluster_client_configs.first()?;
        if config.url.is_empty() {
            return None;
        }
        let ca_bundle = config.ca_bundle.as_ref()?;

        Some(EligibleCluster {
            name: self.name_any(),
            url: config.url.clone(),
            ca_bundle: String::from_utf8_lossy(&ca_bundle.0).into_owned(),
        })
    }
}
