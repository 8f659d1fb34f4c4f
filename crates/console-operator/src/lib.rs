/// K8s API objects
pub mod api;

/// Pure builders for mediating resource specs
pub mod appliers;

/// Operator configuration
pub mod config;

/// Label scheme and deterministic object names
pub mod labels;

/// Request/response over mediating custom resources
pub mod mediation;

/// Remote OAuth client provisioning strategies
pub mod provisioner;

/// K8s reconciliation logic
pub mod reconcilers;

/// Condition accumulation for the owning Console
pub mod status;

/// Hub API access
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kube error: {0}")]
    Kube(#[from] kube::Error),
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },
    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: String },
    #[error("conflict writing {kind} {name}, object was modified")]
    Conflict { kind: &'static str, name: String },
    #[error("Serde error: {0}")]
    SerdeYaml(#[from] serde_yaml_ng::Error),
    #[error("Serde error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("Missing field: {0}")]
    MissingField(&'static str),
    #[error("Precondition failed: {0}")]
    Precondition(String),
    #[error(transparent)]
    MultiCluster(#[from] MultiClusterError),
    #[error("Invalid configuration: {0}")]
    Config(#[from] garde::Report),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists { .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures of one sync step, keyed by the cluster they happened for.
#[derive(Debug, Default)]
pub struct MultiClusterError {
    pub failures: Vec<(String, String)>,
}

impl MultiClusterError {
    pub fn push(&mut self, cluster: &str, error: impl fmt::Display) {
        self.failures.push((cluster.to_string(), error.to_string()));
    }

    pub fn clusters(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|(cluster, _)| cluster.as_str())
    }

    /// `Ok(())` when nothing failed.
    pub fn into_result(self) -> Result<()> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(Error::MultiCluster(self))
        }
    }
}

impl fmt::Display for MultiClusterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed for {} cluster(s): ", self.failures.len())?;
        for (i, (cluster, message)) in self.failures.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{cluster}: {message}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiClusterError {}
