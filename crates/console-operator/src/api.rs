/// Cluster registry types owned by the cluster manager
pub mod cluster;

/// The owning Console configuration and hub-side documents
pub mod console;

/// Mediating resources: views, actions and work bundles
pub mod mediation;

pub use cluster::{
    ClientConfig, EligibleCluster, LOCAL_CLUSTER_LABEL, ManagedCluster, ManagedClusterSpec,
};
pub use console::{
    ConditionStatus, Console, ConsoleSpec, ConsoleStatus, HubOAuthClient, ManagedClusterApiServer,
    ManagedClusterConfig, ManagedClusterOAuth, ManagementState, OperatorCondition,
};
pub use mediation::{
    ActionType, Executor, ExecutorSubject, KubeWork, MediationCondition, RemoteAction,
    RemoteActionSpec, RemoteActionStatus, RemoteView, RemoteViewSpec, RemoteViewStatus,
    ServiceAccountSubject, SubjectType, ViewScope, WorkBundle, WorkBundleSpec, WorkBundleStatus,
    Workload,
};
