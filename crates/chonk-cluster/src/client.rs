//! The orchestrator client seam.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::api::storage::v1::StorageClass;

use chonk_api::{PVCGroup, PVCPolicy};

use crate::error::ClusterResult;

/// Severity of an emitted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSeverity {
    Normal,
    Warning,
}

impl EventSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            EventSeverity::Normal => "Normal",
            EventSeverity::Warning => "Warning",
        }
    }
}

/// An event to publish against a claim or a group.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    /// Kind of the object the event regards.
    pub kind: String,
    /// API version of that object.
    pub api_version: String,
    pub namespace: String,
    pub name: String,
    pub uid: Option<String>,
    pub severity: EventSeverity,
    pub reason: String,
    pub message: String,
}

impl EventRecord {
    pub fn for_claim(
        claim: &PersistentVolumeClaim,
        severity: EventSeverity,
        reason: &str,
        message: String,
    ) -> Self {
        Self {
            kind: "PersistentVolumeClaim".to_string(),
            api_version: "v1".to_string(),
            namespace: claim.metadata.namespace.clone().unwrap_or_default(),
            name: claim.metadata.name.clone().unwrap_or_default(),
            uid: claim.metadata.uid.clone(),
            severity,
            reason: reason.to_string(),
            message,
        }
    }

    pub fn for_group(
        group: &PVCGroup,
        severity: EventSeverity,
        reason: &str,
        message: String,
    ) -> Self {
        Self {
            kind: "PVCGroup".to_string(),
            api_version: "pvc-chonker.io/v1alpha1".to_string(),
            namespace: group.metadata.namespace.clone().unwrap_or_default(),
            name: group.metadata.name.clone().unwrap_or_default(),
            uid: group.metadata.uid.clone(),
            severity,
            reason: reason.to_string(),
            message,
        }
    }
}

/// Everything the control loops need from the orchestrator.
///
/// Implementations must be safe to share across tasks; all methods take
/// `&self`. Claim and status updates use optimistic concurrency — a
/// stale resource version surfaces as [`ClusterError::Conflict`] and the
/// caller retries on its next cycle or requeue.
///
/// [`ClusterError::Conflict`]: crate::error::ClusterError::Conflict
#[async_trait]
pub trait ClusterClient: Send + Sync + 'static {
    /// List claims across all namespaces.
    async fn list_claims(&self) -> ClusterResult<Vec<PersistentVolumeClaim>>;

    /// List claims in one namespace.
    async fn list_claims_in(&self, namespace: &str) -> ClusterResult<Vec<PersistentVolumeClaim>>;

    /// Replace a claim (spec and annotations).
    async fn update_claim(&self, claim: &PersistentVolumeClaim) -> ClusterResult<()>;

    /// Names of every node in the cluster.
    async fn list_node_names(&self) -> ClusterResult<Vec<String>>;

    /// Fetch a node agent's metrics payload through the API proxy.
    async fn node_metrics_text(&self, node: &str) -> ClusterResult<String>;

    /// Fetch a storage class; `Ok(None)` when it does not exist.
    async fn get_storage_class(&self, name: &str) -> ClusterResult<Option<StorageClass>>;

    /// List policies in one namespace.
    async fn list_policies_in(&self, namespace: &str) -> ClusterResult<Vec<PVCPolicy>>;

    /// Write a policy's status subresource.
    async fn update_policy_status(&self, policy: &PVCPolicy) -> ClusterResult<()>;

    /// Fetch a group; `Ok(None)` when it does not exist.
    async fn get_group(&self, namespace: &str, name: &str) -> ClusterResult<Option<PVCGroup>>;

    /// Write a group's status subresource.
    async fn update_group_status(&self, group: &PVCGroup) -> ClusterResult<()>;

    /// Publish an event.
    async fn publish_event(&self, event: EventRecord) -> ClusterResult<()>;
}
