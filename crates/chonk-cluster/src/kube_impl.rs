//! The kube-backed [`ClusterClient`] implementation.
//!
//! A thin translation layer: every method is one API call plus a client
//! request counter. Optimistic-concurrency conflicts surface as
//! [`ClusterError::Conflict`] and are handled by the callers.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::{Event, Node, ObjectReference, PersistentVolumeClaim};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::api::{Api, ListParams, PostParams};
use kube::Client;
use tracing::debug;

use chonk_api::{PVCGroup, PVCPolicy};
use chonk_metrics::Metrics;

use crate::client::{ClusterClient, EventRecord};
use crate::error::{ClusterError, ClusterResult};

pub struct KubeCluster {
    client: Client,
    metrics: Arc<Metrics>,
}

impl KubeCluster {
    pub fn new(client: Client, metrics: Arc<Metrics>) -> Self {
        Self { client, metrics }
    }

    /// The underlying client, for wiring that needs raw `Api` handles
    /// (the event-driven controllers).
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    fn count<T>(&self, operation: &str, result: &ClusterResult<T>) {
        self.metrics.record_api_request(operation, result.is_ok());
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn list_claims(&self) -> ClusterResult<Vec<PersistentVolumeClaim>> {
        let api: Api<PersistentVolumeClaim> = Api::all(self.client.clone());
        let result = api
            .list(&ListParams::default())
            .await
            .map(|list| list.items)
            .map_err(ClusterError::from);
        self.count("list_pvcs", &result);
        result
    }

    async fn list_claims_in(&self, namespace: &str) -> ClusterResult<Vec<PersistentVolumeClaim>> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        let result = api
            .list(&ListParams::default())
            .await
            .map(|list| list.items)
            .map_err(ClusterError::from);
        self.count("list_pvcs", &result);
        result
    }

    async fn update_claim(&self, claim: &PersistentVolumeClaim) -> ClusterResult<()> {
        let namespace = claim.metadata.namespace.as_deref().unwrap_or_default();
        let name = claim.metadata.name.as_deref().unwrap_or_default();
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        let result = api
            .replace(name, &PostParams::default(), claim)
            .await
            .map(|_| ())
            .map_err(ClusterError::from);
        self.count("update_pvc", &result);
        result
    }

    async fn list_node_names(&self) -> ClusterResult<Vec<String>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let result = api
            .list(&ListParams::default())
            .await
            .map(|list| {
                list.items
                    .into_iter()
                    .filter_map(|node| node.metadata.name)
                    .collect()
            })
            .map_err(ClusterError::from);
        self.count("list_nodes", &result);
        result
    }

    async fn node_metrics_text(&self, node: &str) -> ClusterResult<String> {
        let path = format!("/api/v1/nodes/{node}/proxy/metrics");
        let request = http::Request::get(path.as_str())
            .body(Vec::new())
            .map_err(|e| ClusterError::NodeAgent(e.to_string()))?;
        let result = self
            .client
            .request_text(request)
            .await
            .map_err(|e| ClusterError::NodeAgent(format!("node {node}: {e}")));
        self.count("node_proxy_metrics", &result);
        result
    }

    async fn get_storage_class(&self, name: &str) -> ClusterResult<Option<StorageClass>> {
        let api: Api<StorageClass> = Api::all(self.client.clone());
        let result = api.get_opt(name).await.map_err(ClusterError::from);
        self.count("get_storageclass", &result);
        result
    }

    async fn list_policies_in(&self, namespace: &str) -> ClusterResult<Vec<PVCPolicy>> {
        let api: Api<PVCPolicy> = Api::namespaced(self.client.clone(), namespace);
        let result = api
            .list(&ListParams::default())
            .await
            .map(|list| list.items)
            .map_err(ClusterError::from);
        self.count("list_policies", &result);
        result
    }

    async fn update_policy_status(&self, policy: &PVCPolicy) -> ClusterResult<()> {
        let namespace = policy.metadata.namespace.as_deref().unwrap_or_default();
        let name = policy.metadata.name.as_deref().unwrap_or_default();
        let api: Api<PVCPolicy> = Api::namespaced(self.client.clone(), namespace);
        let body = serde_json::to_vec(policy)
            .map_err(|e| ClusterError::Api(format!("encode policy status: {e}")))?;
        let result = api
            .replace_status(name, &PostParams::default(), body)
            .await
            .map(|_| ())
            .map_err(ClusterError::from);
        self.count("update_policy_status", &result);
        result
    }

    async fn get_group(&self, namespace: &str, name: &str) -> ClusterResult<Option<PVCGroup>> {
        let api: Api<PVCGroup> = Api::namespaced(self.client.clone(), namespace);
        let result = api.get_opt(name).await.map_err(ClusterError::from);
        self.count("get_pvcgroup", &result);
        result
    }

    async fn update_group_status(&self, group: &PVCGroup) -> ClusterResult<()> {
        let namespace = group.metadata.namespace.as_deref().unwrap_or_default();
        let name = group.metadata.name.as_deref().unwrap_or_default();
        let api: Api<PVCGroup> = Api::namespaced(self.client.clone(), namespace);
        let body = serde_json::to_vec(group)
            .map_err(|e| ClusterError::Api(format!("encode group status: {e}")))?;
        let result = api
            .replace_status(name, &PostParams::default(), body)
            .await
            .map(|_| ())
            .map_err(ClusterError::from);
        self.count("update_pvcgroup_status", &result);
        result
    }

    async fn publish_event(&self, record: EventRecord) -> ClusterResult<()> {
        let api: Api<Event> = Api::namespaced(self.client.clone(), &record.namespace);
        let event = build_event(&record);
        let result = api
            .create(&PostParams::default(), &event)
            .await
            .map(|_| ())
            .map_err(ClusterError::from);
        self.count("create_event", &result);
        debug!(
            object = %format!("{}/{}", record.namespace, record.name),
            reason = %record.reason,
            "event published"
        );
        result
    }
}

fn build_event(record: &EventRecord) -> Event {
    let now = Time(Utc::now());
    // Event names must be unique per object; suffix with a nanosecond stamp.
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    Event {
        metadata: ObjectMeta {
            name: Some(format!("{}.{:x}", record.name, nanos)),
            namespace: Some(record.namespace.clone()),
            ..Default::default()
        },
        involved_object: ObjectReference {
            api_version: Some(record.api_version.clone()),
            kind: Some(record.kind.clone()),
            name: Some(record.name.clone()),
            namespace: Some(record.namespace.clone()),
            uid: record.uid.clone(),
            ..Default::default()
        },
        reason: Some(record.reason.clone()),
        message: Some(record.message.clone()),
        type_: Some(record.severity.as_str().to_string()),
        first_timestamp: Some(now.clone()),
        last_timestamp: Some(now),
        count: Some(1),
        reporting_component: Some("pvc-chonker".to_string()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::EventSeverity;

    #[test]
    fn event_carries_object_reference_and_type() {
        let record = EventRecord {
            kind: "PersistentVolumeClaim".to_string(),
            api_version: "v1".to_string(),
            namespace: "prod".to_string(),
            name: "data".to_string(),
            uid: Some("abc-123".to_string()),
            severity: EventSeverity::Warning,
            reason: "ExpansionFailed".to_string(),
            message: "new size 12Gi exceeds max size 11Gi".to_string(),
        };
        let event = build_event(&record);
        assert_eq!(event.type_.as_deref(), Some("Warning"));
        assert_eq!(event.involved_object.name.as_deref(), Some("data"));
        assert_eq!(event.involved_object.uid.as_deref(), Some("abc-123"));
        assert!(event
            .metadata
            .name
            .as_deref()
            .unwrap()
            .starts_with("data."));
    }
}
