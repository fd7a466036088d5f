//! Error types for orchestrator I/O.

use thiserror::Error;

pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors surfaced by [`crate::ClusterClient`] implementations.
///
/// Conflicts are kept distinct from other API failures: the control
/// loops expect them (the claim reconciler and the group coordinator may
/// race on the same claim) and classify them as transient.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("write conflict on {0}")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("api error: {0}")]
    Api(String),

    #[error("node agent request failed: {0}")]
    NodeAgent(String),
}

impl ClusterError {
    /// True for optimistic-concurrency conflicts.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ClusterError::Conflict(_))
    }
}

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(response) if response.code == 409 => {
                ClusterError::Conflict(response.message.clone())
            }
            kube::Error::Api(response) if response.code == 404 => {
                ClusterError::NotFound(response.message.clone())
            }
            _ => ClusterError::Api(err.to_string()),
        }
    }
}
