//! An in-memory [`ClusterClient`] for tests.
//!
//! Plays the role a fake API server plays in the integration suites of
//! real operators: claims, storage classes, policies, groups, and node
//! payloads live in maps, events are captured in a log, and failures
//! (list errors, write conflicts) can be injected per call.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::api::storage::v1::StorageClass;

use chonk_api::{PVCGroup, PVCPolicy};

use crate::claims::claim_key;
use crate::client::{ClusterClient, EventRecord};
use crate::error::{ClusterError, ClusterResult};

#[derive(Default)]
struct FakeState {
    claims: BTreeMap<String, PersistentVolumeClaim>,
    storage_classes: BTreeMap<String, StorageClass>,
    policies: BTreeMap<String, PVCPolicy>,
    groups: BTreeMap<String, PVCGroup>,
    nodes: Vec<String>,
    node_payloads: BTreeMap<String, String>,
    events: Vec<EventRecord>,
    claim_updates: u64,
    storage_class_gets: u64,

    fail_list_claims: bool,
    fail_list_nodes: bool,
    /// Claim keys whose next update returns a conflict; consumed on use.
    conflict_on_update: Vec<String>,
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<FakeState>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ── Seeding ────────────────────────────────────────────────────

    pub fn add_claim(&self, claim: PersistentVolumeClaim) {
        let key = claim_key(&claim);
        self.lock().claims.insert(key, claim);
    }

    pub fn add_storage_class(&self, sc: StorageClass) {
        let name = sc.metadata.name.clone().unwrap_or_default();
        self.lock().storage_classes.insert(name, sc);
    }

    pub fn add_policy(&self, policy: PVCPolicy) {
        let key = namespaced_key(
            policy.metadata.namespace.as_deref().unwrap_or_default(),
            policy.metadata.name.as_deref().unwrap_or_default(),
        );
        self.lock().policies.insert(key, policy);
    }

    pub fn add_group(&self, group: PVCGroup) {
        let key = namespaced_key(
            group.metadata.namespace.as_deref().unwrap_or_default(),
            group.metadata.name.as_deref().unwrap_or_default(),
        );
        self.lock().groups.insert(key, group);
    }

    /// Register a node together with its agent's metrics payload.
    pub fn add_node(&self, name: &str, payload: &str) {
        let mut state = self.lock();
        state.nodes.push(name.to_string());
        state.node_payloads.insert(name.to_string(), payload.to_string());
    }

    /// Register a node whose agent cannot be reached.
    pub fn add_unreachable_node(&self, name: &str) {
        self.lock().nodes.push(name.to_string());
    }

    // ── Failure injection ──────────────────────────────────────────

    pub fn fail_list_claims(&self, fail: bool) {
        self.lock().fail_list_claims = fail;
    }

    pub fn fail_list_nodes(&self, fail: bool) {
        self.lock().fail_list_nodes = fail;
    }

    /// Make the next update of `namespace/name` return a conflict.
    pub fn conflict_next_update(&self, namespace: &str, name: &str) {
        self.lock()
            .conflict_on_update
            .push(namespaced_key(namespace, name));
    }

    // ── Inspection ─────────────────────────────────────────────────

    pub fn claim(&self, namespace: &str, name: &str) -> Option<PersistentVolumeClaim> {
        self.lock().claims.get(&namespaced_key(namespace, name)).cloned()
    }

    pub fn group(&self, namespace: &str, name: &str) -> Option<PVCGroup> {
        self.lock().groups.get(&namespaced_key(namespace, name)).cloned()
    }

    pub fn policy(&self, namespace: &str, name: &str) -> Option<PVCPolicy> {
        self.lock().policies.get(&namespaced_key(namespace, name)).cloned()
    }

    pub fn events(&self) -> Vec<EventRecord> {
        self.lock().events.clone()
    }

    /// Number of claim writes that went through.
    pub fn claim_update_count(&self) -> u64 {
        self.lock().claim_updates
    }

    /// Number of storage class fetches served.
    pub fn storage_class_get_count(&self) -> u64 {
        self.lock().storage_class_gets
    }
}

fn namespaced_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn list_claims(&self) -> ClusterResult<Vec<PersistentVolumeClaim>> {
        let state = self.lock();
        if state.fail_list_claims {
            return Err(ClusterError::Api("injected: list claims".to_string()));
        }
        Ok(state.claims.values().cloned().collect())
    }

    async fn list_claims_in(&self, namespace: &str) -> ClusterResult<Vec<PersistentVolumeClaim>> {
        let prefix = format!("{namespace}/");
        let state = self.lock();
        if state.fail_list_claims {
            return Err(ClusterError::Api("injected: list claims".to_string()));
        }
        Ok(state
            .claims
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(_, claim)| claim.clone())
            .collect())
    }

    async fn update_claim(&self, claim: &PersistentVolumeClaim) -> ClusterResult<()> {
        let key = claim_key(claim);
        let mut state = self.lock();
        if let Some(pos) = state.conflict_on_update.iter().position(|k| *k == key) {
            state.conflict_on_update.remove(pos);
            return Err(ClusterError::Conflict(key));
        }
        if !state.claims.contains_key(&key) {
            return Err(ClusterError::NotFound(key));
        }
        state.claims.insert(key, claim.clone());
        state.claim_updates += 1;
        Ok(())
    }

    async fn list_node_names(&self) -> ClusterResult<Vec<String>> {
        let state = self.lock();
        if state.fail_list_nodes {
            return Err(ClusterError::Api("injected: list nodes".to_string()));
        }
        Ok(state.nodes.clone())
    }

    async fn node_metrics_text(&self, node: &str) -> ClusterResult<String> {
        let state = self.lock();
        state
            .node_payloads
            .get(node)
            .cloned()
            .ok_or_else(|| ClusterError::NodeAgent(format!("node {node}: no payload")))
    }

    async fn get_storage_class(&self, name: &str) -> ClusterResult<Option<StorageClass>> {
        let mut state = self.lock();
        state.storage_class_gets += 1;
        Ok(state.storage_classes.get(name).cloned())
    }

    async fn list_policies_in(&self, namespace: &str) -> ClusterResult<Vec<PVCPolicy>> {
        let prefix = format!("{namespace}/");
        Ok(self
            .lock()
            .policies
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(_, policy)| policy.clone())
            .collect())
    }

    async fn update_policy_status(&self, policy: &PVCPolicy) -> ClusterResult<()> {
        let key = namespaced_key(
            policy.metadata.namespace.as_deref().unwrap_or_default(),
            policy.metadata.name.as_deref().unwrap_or_default(),
        );
        let mut state = self.lock();
        if !state.policies.contains_key(&key) {
            return Err(ClusterError::NotFound(key));
        }
        state.policies.insert(key, policy.clone());
        Ok(())
    }

    async fn get_group(&self, namespace: &str, name: &str) -> ClusterResult<Option<PVCGroup>> {
        Ok(self.lock().groups.get(&namespaced_key(namespace, name)).cloned())
    }

    async fn update_group_status(&self, group: &PVCGroup) -> ClusterResult<()> {
        let key = namespaced_key(
            group.metadata.namespace.as_deref().unwrap_or_default(),
            group.metadata.name.as_deref().unwrap_or_default(),
        );
        let mut state = self.lock();
        if !state.groups.contains_key(&key) {
            return Err(ClusterError::NotFound(key));
        }
        state.groups.insert(key, group.clone());
        Ok(())
    }

    async fn publish_event(&self, event: EventRecord) -> ClusterResult<()> {
        self.lock().events.push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::{requested_bytes, set_requested_bytes, STORAGE_RESOURCE};
    use k8s_openapi::api::core::v1::{PersistentVolumeClaimSpec, VolumeResourceRequirements};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn claim(namespace: &str, name: &str, size: &str) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                resources: Some(VolumeResourceRequirements {
                    requests: Some(
                        [(STORAGE_RESOURCE.to_string(), Quantity(size.to_string()))]
                            .into_iter()
                            .collect(),
                    ),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            status: None,
        }
    }

    #[tokio::test]
    async fn claims_round_trip() {
        let fake = FakeCluster::new();
        fake.add_claim(claim("prod", "data", "10Gi"));

        let listed = fake.list_claims().await.unwrap();
        assert_eq!(listed.len(), 1);

        let mut updated = listed[0].clone();
        set_requested_bytes(&mut updated, 12 << 30);
        fake.update_claim(&updated).await.unwrap();

        let stored = fake.claim("prod", "data").unwrap();
        assert_eq!(requested_bytes(&stored).unwrap(), 12 << 30);
        assert_eq!(fake.claim_update_count(), 1);
    }

    #[tokio::test]
    async fn namespace_listing_filters() {
        let fake = FakeCluster::new();
        fake.add_claim(claim("a", "one", "1Gi"));
        fake.add_claim(claim("b", "two", "1Gi"));

        let in_a = fake.list_claims_in("a").await.unwrap();
        assert_eq!(in_a.len(), 1);
        assert_eq!(in_a[0].metadata.name.as_deref(), Some("one"));
    }

    #[tokio::test]
    async fn injected_conflict_fires_once() {
        let fake = FakeCluster::new();
        fake.add_claim(claim("prod", "data", "10Gi"));
        fake.conflict_next_update("prod", "data");

        let c = fake.claim("prod", "data").unwrap();
        let err = fake.update_claim(&c).await.unwrap_err();
        assert!(err.is_conflict());

        // Second attempt goes through.
        fake.update_claim(&c).await.unwrap();
    }

    #[tokio::test]
    async fn injected_list_failure() {
        let fake = FakeCluster::new();
        fake.fail_list_claims(true);
        assert!(fake.list_claims().await.is_err());
        fake.fail_list_claims(false);
        assert!(fake.list_claims().await.is_ok());
    }

    #[tokio::test]
    async fn missing_node_payload_is_an_error() {
        let fake = FakeCluster::new();
        fake.add_node("worker-0", "# empty\n");
        assert!(fake.node_metrics_text("worker-0").await.is_ok());
        assert!(fake.node_metrics_text("worker-1").await.is_err());
    }
}
