//! Lease-based leader election.
//!
//! At most one replica runs the control loops; the others only serve
//! their HTTP endpoints. Election rides on a coordination.k8s.io Lease:
//! the holder renews at a third of the lease duration, and a candidate
//! takes over once the recorded renew time has aged past the duration.
//! Leadership is published over a `watch` channel; losing the lease
//! flips it back and the caller shuts its loops down.

use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::Client;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{ClusterError, ClusterResult};

pub const LEASE_NAME: &str = "pvc-chonker-leader-election";
const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(15);

pub struct LeaseElector {
    api: Api<Lease>,
    identity: String,
    lease_duration: Duration,
}

impl LeaseElector {
    pub fn new(client: Client, namespace: &str, identity: String) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            identity,
            lease_duration: DEFAULT_LEASE_DURATION,
        }
    }

    pub fn with_lease_duration(mut self, duration: Duration) -> Self {
        self.lease_duration = duration;
        self
    }

    /// Run the election loop until shutdown, publishing leadership over
    /// `leader_tx`. On shutdown a leader releases the lease so a peer
    /// can take over immediately.
    pub async fn run(self, leader_tx: watch::Sender<bool>, mut shutdown: watch::Receiver<bool>) {
        let renew_interval = self.lease_duration / 3;
        let mut leading = false;

        info!(identity = %self.identity, "leader election started");
        loop {
            match self.try_acquire_or_renew().await {
                Ok(acquired) => {
                    if acquired != leading {
                        if acquired {
                            info!(identity = %self.identity, "acquired leadership");
                        } else {
                            warn!(identity = %self.identity, "lost leadership");
                        }
                        leading = acquired;
                        let _ = leader_tx.send(leading);
                    }
                }
                Err(err) => {
                    // Conflicts mean a peer won the update race this round.
                    if !err.is_conflict() {
                        warn!(error = %err, "lease renewal failed");
                    }
                    if leading {
                        leading = false;
                        let _ = leader_tx.send(false);
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(renew_interval) => {}
                _ = shutdown.changed() => {
                    if leading {
                        self.release().await;
                    }
                    info!("leader election stopped");
                    return;
                }
            }
        }
    }

    /// One election round. Returns whether this process holds the lease.
    async fn try_acquire_or_renew(&self) -> ClusterResult<bool> {
        let now = MicroTime(Utc::now());

        let Some(mut lease) = self.api.get_opt(LEASE_NAME).await.map_err(ClusterError::from)?
        else {
            let lease = self.fresh_lease(now);
            self.api
                .create(&PostParams::default(), &lease)
                .await
                .map_err(ClusterError::from)?;
            return Ok(true);
        };

        let spec = lease.spec.get_or_insert_with(Default::default);
        let holder = spec.holder_identity.as_deref();

        if holder == Some(self.identity.as_str()) {
            spec.renew_time = Some(now);
            self.replace(&lease).await?;
            return Ok(true);
        }

        if !Self::expired(spec, self.lease_duration) {
            debug!(holder = ?spec.holder_identity, "lease held by peer");
            return Ok(false);
        }

        // Expired: take over.
        spec.holder_identity = Some(self.identity.clone());
        spec.lease_duration_seconds = Some(self.lease_duration.as_secs() as i32);
        spec.acquire_time = Some(now.clone());
        spec.renew_time = Some(now);
        spec.lease_transitions = Some(spec.lease_transitions.unwrap_or(0) + 1);
        self.replace(&lease).await?;
        Ok(true)
    }

    fn expired(spec: &LeaseSpec, fallback_duration: Duration) -> bool {
        let Some(renew) = &spec.renew_time else {
            return true;
        };
        let duration = spec
            .lease_duration_seconds
            .map(|secs| Duration::from_secs(secs.max(0) as u64))
            .unwrap_or(fallback_duration);
        match Utc::now().signed_duration_since(renew.0).to_std() {
            Ok(age) => age > duration,
            Err(_) => false, // renew time in the future: not expired
        }
    }

    fn fresh_lease(&self, now: MicroTime) -> Lease {
        Lease {
            metadata: ObjectMeta {
                name: Some(LEASE_NAME.to_string()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                lease_duration_seconds: Some(self.lease_duration.as_secs() as i32),
                acquire_time: Some(now.clone()),
                renew_time: Some(now),
                lease_transitions: Some(1),
                ..Default::default()
            }),
        }
    }

    async fn replace(&self, lease: &Lease) -> ClusterResult<()> {
        self.api
            .replace(LEASE_NAME, &PostParams::default(), lease)
            .await
            .map(|_| ())
            .map_err(ClusterError::from)
    }

    /// Clear the holder so a peer does not have to wait out the lease.
    async fn release(&self) {
        if let Ok(Some(mut lease)) = self.api.get_opt(LEASE_NAME).await {
            if let Some(spec) = lease.spec.as_mut() {
                if spec.holder_identity.as_deref() == Some(self.identity.as_str()) {
                    spec.holder_identity = None;
                    spec.renew_time = None;
                    if let Err(err) = self.replace(&lease).await {
                        warn!(error = %err, "failed to release lease");
                    } else {
                        info!("lease released");
                    }
                }
            }
        }
    }
}
