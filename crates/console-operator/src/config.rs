use std::time::Duration;

use clap::{Args, ValueEnum};
use garde::Validate;

use crate::{
    Result,
    api::{Executor, ExecutorSubject, ServiceAccountSubject, SubjectType},
};

/// How the remote OAuth client is provisioned in managed clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OAuthStrategy {
    /// Query with a view, create once with an action
    ViewAction,
    /// Continuously re-apply a work bundle
    WorkBundle,
    /// Do not provision remote OAuth clients
    Disabled,
}

#[derive(Debug, Clone, Args, Validate)]
pub struct OperatorConfig {
    /// Hub namespace holding the published ConfigMaps
    #[arg(long, env = "CONSOLE_NAMESPACE", default_value = "openshift-console")]
    #[garde(length(min = 1))]
    pub namespace: String,

    /// Name of the Console configuration object to reconcile
    #[arg(long, env = "CONSOLE_CONFIG_NAME", default_value = "cluster")]
    #[garde(length(min = 1))]
    pub console_name: String,

    /// Name of the hub's own OAuth client
    #[arg(long, env = "CONSOLE_OAUTH_CLIENT", default_value = "console")]
    #[garde(length(min = 1))]
    pub hub_oauth_client: String,

    /// Seconds between level-triggered sync cycles
    #[arg(long, env = "CONSOLE_RESYNC_SECONDS", default_value_t = 300)]
    #[garde(range(min = 10))]
    pub resync_seconds: u64,

    /// Seconds before retrying a failed sync cycle
    #[arg(long, env = "CONSOLE_ERROR_REQUEUE_SECONDS", default_value_t = 10)]
    #[garde(range(min = 1))]
    pub error_requeue_seconds: u64,

    #[arg(long, env = "CONSOLE_OAUTH_STRATEGY", value_enum, default_value_t = OAuthStrategy::ViewAction)]
    #[garde(skip)]
    pub oauth_strategy: OAuthStrategy,

    /// Service account applying work bundles inside managed clusters
    #[arg(long, env = "CONSOLE_WORK_EXECUTOR", default_value = "klusterlet-work-sa")]
    #[garde(length(min = 1))]
    pub work_executor_name: String,

    #[arg(
        long,
        env = "CONSOLE_WORK_EXECUTOR_NAMESPACE",
        default_value = "open-cluster-management-agent"
    )]
    #[garde(length(min = 1))]
    pub work_executor_namespace: String,
}

impl OperatorConfig {
    /// Validate, failing start-up with the full report.
    pub fn validated(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }

    pub fn resync(&self) -> Duration {
        Duration::from_secs(self.resync_seconds)
    }

    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_seconds)
    }

    pub fn executor(&self) -> Executor {
        Executor {
            subject: ExecutorSubject {
                type_: SubjectType::ServiceAccount,
                service_account: ServiceAccountSubject {
                    namespace: self.work_executor_namespace.clone(),
                    name: self.work_executor_name.clone(),
                },
            },
        }
    }
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: "openshift-console".to_string(),
            console_name: "cluster".to_string(),
            hub_oauth_client: "console".to_string(),
            resync_seconds: 300,
            error_requeue_seconds: 10,
            oauth_strategy: OAuthStrategy::ViewAction,
            work_executor_name: "klusterlet-work-sa".to_string(),
            work_executor_namespace: "open-cluster-management-agent".to_string(),
        }
    }
}
