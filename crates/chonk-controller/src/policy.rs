//! The policy controller.
//!
//! Keeps each policy's status current: how many claims its selector
//! matches, and when it was last processed. Never mutates claims.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info};

use chonk_api::{LabelSelector, PVCPolicyStatus};
use chonk_cluster::claims::claim_labels;
use chonk_cluster::{ClusterClient, ClusterError};

/// Periodic requeue for every policy.
pub const REQUEUE_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("failed to list policies: {0}")]
    ListPolicies(#[source] ClusterError),

    #[error("failed to list claims: {0}")]
    ListClaims(#[source] ClusterError),

    #[error("failed to update policy status: {0}")]
    Status(#[source] ClusterError),
}

pub struct PolicyController<C> {
    cluster: Arc<C>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// Selectors seen per namespace, refreshed on every reconcile. The
    /// claim-watch mapper uses this to find the policies a changed
    /// claim matches without an API round-trip.
    selectors: Mutex<HashMap<String, Vec<(String, LabelSelector)>>>,
}

impl<C: ClusterClient> PolicyController<C> {
    pub fn new(cluster: Arc<C>) -> Self {
        Self {
            cluster,
            locks: Mutex::new(HashMap::new()),
            selectors: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Names of the known policies in `namespace` whose selectors match
    /// the given labels.
    pub fn matching_policy_names(
        &self,
        namespace: &str,
        labels: &std::collections::BTreeMap<String, String>,
    ) -> Vec<String> {
        let selectors = self
            .selectors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        selectors
            .get(namespace)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(_, selector)| selector.matches(labels))
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Reconcile one policy: count matching claims, write the status.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Duration, PolicyError> {
        let lock = self.lock_for(&format!("{namespace}/{name}"));
        let _guard = lock.lock().await;

        let policies = self
            .cluster
            .list_policies_in(namespace)
            .await
            .map_err(PolicyError::ListPolicies)?;

        // Refresh the selector index for the whole namespace while the
        // list is in hand.
        {
            let mut selectors = self
                .selectors
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            selectors.insert(
                namespace.to_string(),
                policies
                    .iter()
                    .filter_map(|p| {
                        p.metadata
                            .name
                            .clone()
                            .map(|n| (n, p.spec.selector.clone()))
                    })
                    .collect(),
            );
        }

        let Some(mut policy) = policies
            .into_iter()
            .find(|p| p.metadata.name.as_deref() == Some(name))
        else {
            debug!(policy = %format!("{namespace}/{name}"), "policy gone; nothing to do");
            return Ok(REQUEUE_INTERVAL);
        };

        let claims = self
            .cluster
            .list_claims_in(namespace)
            .await
            .map_err(PolicyError::ListClaims)?;
        let matched = claims
            .iter()
            .filter(|claim| policy.spec.selector.matches(claim_labels(claim)))
            .count();

        policy.status = Some(PVCPolicyStatus {
            matched_pvcs: matched as i32,
            last_updated: Some(Utc::now()),
        });
        self.cluster
            .update_policy_status(&policy)
            .await
            .map_err(PolicyError::Status)?;

        info!(
            policy = %format!("{namespace}/{name}"),
            matched,
            "policy reconciled"
        );
        Ok(REQUEUE_INTERVAL)
    }
}
