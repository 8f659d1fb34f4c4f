use std::collections::BTreeMap;

use garde::Validate;
use kube::CustomResource;
use schemars::{JsonSchema, Schema, SchemaGenerator, json_schema};
use serde::{Deserialize, Serialize};

/// A read-only query answered by the agent running inside a managed cluster.
///
/// Lives in the namespace named after the target cluster. Its query is never
/// changed after creation.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, Validate, JsonSchema)]
#[kube(
    group = "view.console.openshift.io",
    version = "v1beta1",
    kind = "RemoteView",
    namespaced
)]
#[kube(status = "RemoteViewStatus")]
pub struct RemoteViewSpec {
    #[garde(dive)]
    pub scope: ViewScope,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, Validate, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ViewScope {
    #[garde(length(min = 1))]
    pub resource: String,
    #[garde(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_group: Option<String>,
    #[garde(length(min = 1))]
    pub version: String,
    #[garde(length(min = 1))]
    pub name: String,
    #[garde(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[garde(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_interval_seconds: Option<u32>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct RemoteViewStatus {
    #[serde(default)]
    pub conditions: Vec<MediationCondition>,
    /// Flat result written by the remote agent once the query has been answered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<BTreeMap<String, String>>,
}

/// A mutation to perform inside a managed cluster.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, Validate, JsonSchema)]
#[kube(
    group = "action.console.openshift.io",
    version = "v1beta1",
    kind = "RemoteAction",
    namespaced
)]
#[kube(status = "RemoteActionStatus")]
#[serde(rename_all = "camelCase")]
pub struct RemoteActionSpec {
    #[garde(skip)]
    pub action_type: ActionType,
    #[garde(dive)]
    pub kube: KubeWork,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum ActionType {
    Create,
    Update,
    Delete,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Validate, JsonSchema)]
pub struct KubeWork {
    #[garde(length(min = 1))]
    pub resource: String,
    #[garde(length(min = 1))]
    pub name: String,
    #[garde(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[garde(skip)]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub template: serde_json::Value,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct RemoteActionStatus {
    #[serde(default)]
    pub conditions: Vec<MediationCondition>,
}

/// Manifests applied verbatim inside a managed cluster and kept in sync.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, Validate, JsonSchema)]
#[kube(
    group = "work.console.openshift.io",
    version = "v1",
    kind = "WorkBundle",
    namespaced
)]
#[kube(status = "WorkBundleStatus")]
pub struct WorkBundleSpec {
    #[garde(dive)]
    pub workload: Workload,
    #[garde(dive)]
    pub executor: Executor,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Validate, JsonSchema)]
pub struct Workload {
    #[garde(length(min = 1))]
    #[schemars(schema_with = "preserve_unknown_fields_list")]
    pub manifests: Vec<serde_json::Value>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, Validate, JsonSchema)]
pub struct Executor {
    #[garde(dive)]
    pub subject: ExecutorSubject,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, Validate, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorSubject {
    #[garde(skip)]
    #[serde(rename = "type")]
    pub type_: SubjectType,
    #[garde(dive)]
    pub service_account: ServiceAccountSubject,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum SubjectType {
    ServiceAccount,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, Validate, JsonSchema)]
pub struct ServiceAccountSubject {
    #[garde(length(min = 1))]
    pub namespace: String,
    #[garde(length(min = 1))]
    pub name: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct WorkBundleStatus {
    #[serde(default)]
    pub conditions: Vec<MediationCondition>,
}

/// Condition written back by the remote agent. Only the first one is read.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MediationCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl MediationCondition {
    pub fn new(type_: &str, status: &str) -> Self {
        Self {
            type_: type_.to_string(),
            status: status.to_string(),
            reason: None,
            message: None,
            last_transition_time: None,
        }
    }
}

fn preserve_unknown_fields(_: &mut SchemaGenerator) -> Schema {
    json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true,
    })
}

fn preserve_unknown_fields_list(_: &mut SchemaGenerator) -> Schema {
    json_schema!({
        "type": "array",
        "items": {
            "type": "object",
            "x-kubernetes-preserve-unknown-fields": true,
        },
    })
}
