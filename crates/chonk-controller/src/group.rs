//! The group coordinator.
//!
//! Claims join a group by annotation; the coordinator keeps every
//! active member's requested capacity at the group's largest. It only
//! ever raises sizes — combined with the claim reconciler's expansions,
//! a group converges to the maximum observed size within one pass.
//! Reconciles for the same group are serialized through a per-name
//! mutex; different groups proceed concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use chonk_api::PVCGroupStatus;
use chonk_cluster::claims::{
    claim_annotations, claim_key, claim_name, requested_bytes, set_requested_bytes,
};
use chonk_cluster::{ClusterClient, ClusterError, EventRecord, EventSeverity};
use chonk_core::annotations;
use chonk_core::quantity::format_bytes;

use crate::events;

/// Safety-net requeue when nothing went wrong.
pub const REQUEUE_INTERVAL: Duration = Duration::from_secs(10 * 60);
/// Short requeue after a coordination failure.
pub const FAILURE_REQUEUE: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("failed to fetch group: {0}")]
    Fetch(#[source] ClusterError),

    #[error("failed to list claims: {0}")]
    ListClaims(#[source] ClusterError),

    #[error("failed to update PVC {claim}: {source}")]
    MemberUpdate {
        claim: String,
        #[source]
        source: ClusterError,
    },

    #[error("failed to update group status: {0}")]
    Status(#[source] ClusterError),
}

pub struct GroupCoordinator<C> {
    cluster: Arc<C>,
    dry_run: bool,
    /// Per-group serialization; lookup-or-insert happens atomically
    /// under the outer lock.
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<C: ClusterClient> GroupCoordinator<C> {
    pub fn new(cluster: Arc<C>, dry_run: bool) -> Self {
        Self {
            cluster,
            dry_run,
            locks: Mutex::new(HashMap::new()),
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

    /// Reconcile one group. Returns the requeue interval on success; a
    /// failure was already reported as an event and the caller requeues
    /// after [`FAILURE_REQUEUE`].
    pub async fn reconcile(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Duration, CoordinationError> {
        let lock = self.lock_for(&format!("{namespace}/{name}"));
        let _guard = lock.lock().await;

        let Some(mut group) = self
            .cluster
            .get_group(namespace, name)
            .await
            .map_err(CoordinationError::Fetch)?
        else {
            debug!(group = %format!("{namespace}/{name}"), "group gone; nothing to do");
            return Ok(REQUEUE_INTERVAL);
        };

        let claims = self
            .cluster
            .list_claims_in(namespace)
            .await
            .map_err(CoordinationError::ListClaims)?;

        // Active members: group annotation matches, enabled is "true".
        let members: Vec<_> = claims
            .into_iter()
            .filter(|claim| {
                let ann = claim_annotations(claim);
                ann.get(annotations::GROUP).map(String::as_str) == Some(name)
                    && ann.get(annotations::ENABLED).map(String::as_str) == Some("true")
            })
            .collect();

        let mut target = 0i64;
        for member in &members {
            match requested_bytes(member) {
                Ok(bytes) => target = target.max(bytes),
                Err(err) => warn!(
                    claim = %claim_key(member),
                    error = %err,
                    "member carries an unparseable request; ignoring for target"
                ),
            }
        }

        let now = Utc::now();
        let previous = group.status.clone().unwrap_or_default();
        group.status = Some(PVCGroupStatus {
            member_count: members.len() as i32,
            current_size: (target > 0).then(|| format_bytes(target)),
            last_expansion: previous.last_expansion,
            last_updated: Some(now),
        });
        self.cluster
            .update_group_status(&group)
            .await
            .map_err(CoordinationError::Status)?;

        if members.is_empty() || target == 0 {
            debug!(group = %format!("{namespace}/{name}"), "no active members");
            return Ok(REQUEUE_INTERVAL);
        }

        let mut raised = false;
        for member in &members {
            let Ok(current) = requested_bytes(member) else {
                continue;
            };
            if current >= target {
                continue;
            }

            if self.dry_run {
                info!(
                    claim = %claim_key(member),
                    from = %format_bytes(current),
                    to = %format_bytes(target),
                    "dry run: would coordinate member size"
                );
                continue;
            }

            let mut updated = member.clone();
            set_requested_bytes(&mut updated, target);
            if let Err(source) = self.cluster.update_claim(&updated).await {
                self.emit(EventRecord::for_group(
                    &group,
                    EventSeverity::Warning,
                    events::COORDINATION_FAILED,
                    format!("failed to update PVC {}: {source}", claim_name(member)),
                ))
                .await;
                return Err(CoordinationError::MemberUpdate {
                    claim: claim_key(member),
                    source,
                });
            }

            raised = true;
            info!(
                claim = %claim_key(member),
                from = %format_bytes(current),
                to = %format_bytes(target),
                "member size coordinated"
            );
            self.emit(EventRecord::for_group(
                &group,
                EventSeverity::Normal,
                events::PVC_COORDINATED,
                format!(
                    "PVC {} size coordinated from {} to {}",
                    claim_name(member),
                    format_bytes(current),
                    format_bytes(target)
                ),
            ))
            .await;
        }

        if raised {
            if let Some(status) = group.status.as_mut() {
                status.last_expansion = Some(now);
            }
            self.cluster
                .update_group_status(&group)
                .await
                .map_err(CoordinationError::Status)?;
        }

        info!(
            group = %format!("{namespace}/{name}"),
            members = members.len(),
            size = %format_bytes(target),
            "group reconciled"
        );
        Ok(REQUEUE_INTERVAL)
    }

    async fn emit(&self, event: EventRecord) {
        if let Err(err) = self.cluster.publish_event(event).await {
            warn!(error = %err, "failed to publish event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_table_returns_same_mutex_for_same_group() {
        let coordinator =
            GroupCoordinator::new(Arc::new(chonk_cluster::FakeCluster::new()), false);
        let a = coordinator.lock_for("ns/g");
        let b = coordinator.lock_for("ns/g");
        let c = coordinator.lock_for("ns/other");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
