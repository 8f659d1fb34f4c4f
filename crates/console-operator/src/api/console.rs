use std::fmt;

use garde::Validate;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Operator configuration for the console. The managed-cluster features
/// report their conditions on its status.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, Validate, JsonSchema)]
#[kube(group = "operator.openshift.io", version = "v1", kind = "Console")]
#[kube(status = "ConsoleStatus")]
#[serde(rename_all = "camelCase")]
pub struct ConsoleSpec {
    #[garde(skip)]
    #[serde(default)]
    pub management_state: ManagementState,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum ManagementState {
    #[default]
    Managed,
    Unmanaged,
    Removed,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct ConsoleStatus {
    #[serde(default)]
    pub conditions: Vec<OperatorCondition>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperatorCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionStatus::True => f.write_str("True"),
            ConditionStatus::False => f.write_str("False"),
            ConditionStatus::Unknown => f.write_str("Unknown"),
        }
    }
}

impl Console {
    pub fn management_state(&self) -> ManagementState {
        self.spec.management_state
    }

    pub fn conditions(&self) -> &[OperatorCondition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }
}

/// The hub's own OAuth client, whose secret and redirect URIs are replicated
/// into every managed cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HubOAuthClient {
    pub name: String,
    pub secret: String,
    pub redirect_uris: Vec<String>,
}

/// One entry of the aggregated managed cluster document read by the console
/// server.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterConfig {
    pub name: String,
    pub api_server: ManagedClusterApiServer,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth: Option<ManagedClusterOAuth>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterApiServer {
    pub url: String,
    pub ca_file: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterOAuth {
    pub ca_file: String,
}
