//! The claim reconciler — the periodic cluster-wide sweep.
//!
//! One cycle: list claims, resolve each claim's configuration, collect
//! telemetry from every node, then fan per-claim decisions out to a
//! bounded worker pool. A claim expands when its storage or inode usage
//! crosses the resolved threshold, subject to the eligibility,
//! expandability, in-flight, and cooldown gates. Failures in one claim
//! never affect another; cycle-level failures abandon the whole cycle
//! and the next tick retries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

use chonk_api::PVCPolicy;
use chonk_cluster::claims::{
    actual_bytes, claim_annotations, claim_key, claim_labels, claim_name, claim_namespace,
    has_status_conditions, is_bound, is_filesystem_mode, set_requested_bytes,
    stamp_last_expansion, storage_class_name,
};
use chonk_cluster::{ClusterClient, EventRecord, EventSeverity};
use chonk_core::quantity::format_bytes;
use chonk_core::sanitize;
use chonk_core::{resolve, ConfigTemplate, EffectiveConfig, ExpansionError, GlobalConfig, Resolution};
use chonk_metrics::{reason, Metrics};
use chonk_telemetry::{Collector, StatsCache, VolumeStats};

use crate::events;
use crate::storage_class::{StorageClassCache, StorageClassInfo};

pub const DEFAULT_MAX_PARALLEL: usize = 4;

pub struct ClaimReconciler<C> {
    cluster: Arc<C>,
    collector: Collector<C>,
    global: GlobalConfig,
    metrics: Arc<Metrics>,
    watch_interval: Duration,
    max_parallel: usize,
    dry_run: bool,
    storage_classes: StorageClassCache,
}

impl<C: ClusterClient> ClaimReconciler<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cluster: Arc<C>,
        collector: Collector<C>,
        global: GlobalConfig,
        metrics: Arc<Metrics>,
        watch_interval: Duration,
        max_parallel: i64,
        dry_run: bool,
    ) -> Self {
        let max_parallel = if max_parallel <= 0 {
            DEFAULT_MAX_PARALLEL
        } else {
            max_parallel as usize
        };
        Self {
            cluster,
            collector,
            global,
            metrics,
            watch_interval,
            max_parallel,
            dry_run,
            storage_classes: StorageClassCache::new(),
        }
    }

    /// Run the periodic loop: one cycle immediately, then one per
    /// watch interval, until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.watch_interval.as_secs(),
            dry_run = self.dry_run,
            max_parallel = self.max_parallel,
            "claim reconciler started"
        );

        self.reconcile_all().await;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.watch_interval) => {
                    self.reconcile_all().await;
                }
                _ = shutdown.changed() => {
                    info!("claim reconciler stopped");
                    return;
                }
            }
        }
    }

    /// One full reconciliation cycle.
    pub async fn reconcile_all(&self) {
        let started = Instant::now();
        self.storage_classes.clear();

        let claims = match self.cluster.list_claims().await {
            Ok(claims) => claims,
            Err(err) => {
                error!(error = %err, "failed to list claims; abandoning cycle");
                self.metrics.mark_cycle(false);
                return;
            }
        };
        let total = claims.len();

        let managed = self.classify(claims).await;

        let stats = match self.collector.collect().await {
            Ok(stats) => {
                self.metrics.record_kubelet_request(true);
                Arc::new(stats)
            }
            Err(err) => {
                error!(error = %err, "telemetry collection failed; abandoning cycle");
                self.metrics.record_kubelet_request(false);
                self.metrics.mark_cycle(false);
                return;
            }
        };

        self.metrics.managed_pvcs_total.set(managed.len() as i64);
        let managed_count = managed.len();

        // Fan out per-claim workers, gated by a counting semaphore so at
        // most `max_parallel` claims are in flight at once.
        let semaphore = Semaphore::new(self.max_parallel);
        stream::iter(managed)
            .for_each_concurrent(None, |(claim, config)| {
                let semaphore = &semaphore;
                let stats = Arc::clone(&stats);
                async move {
                    let Ok(_permit) = semaphore.acquire().await else {
                        return;
                    };
                    self.reconcile_one(&claim, &config, &stats).await;
                }
            })
            .await;

        let elapsed = started.elapsed();
        self.metrics.loop_seconds.observe(elapsed.as_secs_f64());
        self.metrics.mark_cycle(true);
        info!(
            total,
            managed = managed_count,
            elapsed_ms = elapsed.as_millis() as u64,
            "reconciliation cycle complete"
        );
    }

    /// Resolve every claim's configuration, keeping the managed subset.
    /// Policies are listed once per namespace per cycle.
    async fn classify(
        &self,
        claims: Vec<PersistentVolumeClaim>,
    ) -> Vec<(PersistentVolumeClaim, EffectiveConfig)> {
        let mut policies_by_ns: HashMap<String, Vec<PVCPolicy>> = HashMap::new();
        let mut managed = Vec::new();

        for claim in claims {
            let namespace = claim_namespace(&claim).to_string();
            if !policies_by_ns.contains_key(&namespace) {
                let mut policies = match self.cluster.list_policies_in(&namespace).await {
                    Ok(policies) => policies,
                    Err(err) => {
                        warn!(
                            namespace = %namespace,
                            error = %err,
                            "failed to list policies; claims in this namespace fall back to annotations"
                        );
                        Vec::new()
                    }
                };
                policies.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
                policies_by_ns.insert(namespace.clone(), policies);
            }
            let policies = &policies_by_ns[&namespace];

            if let Some(config) = self.resolve_claim(&claim, policies) {
                managed.push((claim, config));
            }
        }
        managed
    }

    fn resolve_claim(
        &self,
        claim: &PersistentVolumeClaim,
        policies: &[PVCPolicy],
    ) -> Option<EffectiveConfig> {
        let labels = claim_labels(claim);
        let matching: Vec<&ConfigTemplate> = policies
            .iter()
            .filter(|policy| policy.spec.selector.matches(labels))
            .map(|policy| &policy.spec.template)
            .collect();

        match resolve(claim_annotations(claim), &matching, &self.global) {
            Ok(Resolution::Managed(config)) => Some(config),
            Ok(Resolution::Disabled(_)) | Ok(Resolution::Unmanaged) => None,
            Err(err) => {
                debug!(
                    claim = %claim_key(claim),
                    error = %sanitize::for_logging(&err.to_string()),
                    "invalid configuration; claim unmanaged this cycle"
                );
                None
            }
        }
    }

    /// The per-claim decision pipeline.
    async fn reconcile_one(
        &self,
        claim: &PersistentVolumeClaim,
        config: &EffectiveConfig,
        stats: &StatsCache,
    ) {
        let name = claim_name(claim);
        let namespace = claim_namespace(claim);

        if !is_filesystem_mode(claim) || !is_bound(claim) {
            debug!(claim = %claim_key(claim), "claim not eligible for expansion");
            return;
        }

        let info = match self.storage_class_info(claim).await {
            Some(info) if info.expandable => info,
            _ => {
                self.metrics
                    .record_failed_resize(name, namespace, reason::STORAGE_CLASS_NOT_EXPANDABLE);
                debug!(claim = %claim_key(claim), "storage class does not allow expansion");
                return;
            }
        };

        if has_status_conditions(claim) {
            self.metrics.record_resize_in_progress(name, namespace);
            debug!(claim = %claim_key(claim), "resize already in flight");
            return;
        }

        if config.in_cooldown(Utc::now()) {
            self.metrics.record_cooldown_skipped(name, namespace);
            debug!(claim = %claim_key(claim), "inside cooldown window");
            return;
        }

        let Some(volume) = stats.get(namespace, name) else {
            self.metrics
                .record_failed_resize(name, namespace, reason::METRICS_NOT_FOUND);
            debug!(claim = %claim_key(claim), "no telemetry sample for claim");
            return;
        };

        let current = match actual_bytes(claim) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(
                    claim = %claim_key(claim),
                    error = %err,
                    "claim carries an unparseable capacity"
                );
                return;
            }
        };

        self.metrics.update_claim_gauges(
            name,
            namespace,
            volume.usage_percent,
            current,
            volume.inodes_usage_percent,
            volume.inodes_total,
        );

        let storage_hit = volume.usage_percent >= config.threshold;
        let inode_hit =
            volume.inodes_total > 0 && volume.inodes_usage_percent >= config.inodes_threshold;
        if !storage_hit && !inode_hit {
            return;
        }

        self.metrics.record_threshold_reached(name, namespace);

        let fixed_inode_pressure = inode_hit && info.has_fixed_inodes();
        if fixed_inode_pressure {
            // Expansion still proceeds; more space is still the right
            // response to a full volume, it just cannot add inodes.
            warn!(
                claim = %claim_key(claim),
                filesystem = %info.fs_type,
                inodes_usage = volume.inodes_usage_percent,
                "inode threshold reached on fixed-inode filesystem; expansion will not add inodes"
            );
        }

        info!(
            claim = %claim_key(claim),
            storage_usage = volume.usage_percent,
            inodes_usage = volume.inodes_usage_percent,
            threshold = config.threshold,
            dry_run = self.dry_run,
            "threshold reached; initiating expansion"
        );

        self.expand(claim, config, volume, &info, current).await;
    }

    async fn expand(
        &self,
        claim: &PersistentVolumeClaim,
        config: &EffectiveConfig,
        volume: &VolumeStats,
        info: &StorageClassInfo,
        current: i64,
    ) {
        let name = claim_name(claim);
        let namespace = claim_namespace(claim);

        let new = match config.plan_expansion(current) {
            Ok(new) => new,
            Err(err @ ExpansionError::ExceedsMaxSize { .. }) => {
                self.metrics.record_limit_reached(name, namespace);
                self.emit(EventRecord::for_claim(
                    claim,
                    EventSeverity::Warning,
                    events::EXPANSION_FAILED,
                    format!("Failed to expand PVC: {err}"),
                ))
                .await;
                warn!(claim = %claim_key(claim), error = %err, "expansion refused by ceiling");
                return;
            }
            Err(err) => {
                self.metrics
                    .record_failed_resize(name, namespace, reason::EXPANSION_FAILED);
                self.emit(EventRecord::for_claim(
                    claim,
                    EventSeverity::Warning,
                    events::EXPANSION_FAILED,
                    format!("Failed to expand PVC: {err}"),
                ))
                .await;
                warn!(claim = %claim_key(claim), error = %err, "size computation failed");
                return;
            }
        };

        if self.dry_run {
            info!(
                claim = %claim_key(claim),
                from = %format_bytes(current),
                to = %format_bytes(new),
                "dry run: would expand claim"
            );
        } else {
            let mut updated = claim.clone();
            set_requested_bytes(&mut updated, new);
            stamp_last_expansion(&mut updated, Utc::now());

            if let Err(err) = self.cluster.update_claim(&updated).await {
                self.metrics
                    .record_failed_resize(name, namespace, reason::EXPANSION_FAILED);
                self.emit(EventRecord::for_claim(
                    claim,
                    EventSeverity::Warning,
                    events::EXPANSION_FAILED,
                    format!("Failed to expand PVC: {}", sanitize::for_logging(&err.to_string())),
                ))
                .await;
                warn!(claim = %claim_key(claim), error = %err, "claim update failed");
                return;
            }
        }

        self.metrics.record_success_resize(name, namespace);
        self.emit(expansion_event(claim, config, volume, info, current, new))
            .await;
        info!(
            claim = %claim_key(claim),
            from = %format_bytes(current),
            to = %format_bytes(new),
            "claim expansion requested"
        );
    }

    async fn storage_class_info(&self, claim: &PersistentVolumeClaim) -> Option<StorageClassInfo> {
        let name = storage_class_name(claim)?;
        if let Some(info) = self.storage_classes.get(name) {
            return Some(info);
        }
        match self.cluster.get_storage_class(name).await {
            Ok(Some(sc)) => {
                let info = StorageClassInfo::from_class(&sc);
                self.storage_classes.insert(name, info.clone());
                Some(info)
            }
            Ok(None) => {
                warn!(storage_class = %name, "storage class not found");
                None
            }
            Err(err) => {
                warn!(storage_class = %name, error = %err, "failed to fetch storage class");
                None
            }
        }
    }

    async fn emit(&self, event: EventRecord) {
        if let Err(err) = self.cluster.publish_event(event).await {
            warn!(error = %err, "failed to publish event");
        }
    }
}

/// Choose the success event for an expansion.
fn expansion_event(
    claim: &PersistentVolumeClaim,
    config: &EffectiveConfig,
    volume: &VolumeStats,
    info: &StorageClassInfo,
    from: i64,
    to: i64,
) -> EventRecord {
    let inode_hit =
        volume.inodes_total > 0 && volume.inodes_usage_percent >= config.inodes_threshold;

    if inode_hit {
        if info.has_fixed_inodes() {
            EventRecord::for_claim(
                claim,
                EventSeverity::Warning,
                events::EXPANDED_INODE_PRESSURE,
                format!(
                    "PVC expanded from {} to {} due to inode pressure (storage: {:.1}%, inodes: {:.1}%) - \
                     WARNING: {} filesystem has fixed inode count, expansion will not resolve inode pressure",
                    format_bytes(from),
                    format_bytes(to),
                    volume.usage_percent,
                    volume.inodes_usage_percent,
                    info.fs_type
                ),
            )
        } else {
            EventRecord::for_claim(
                claim,
                EventSeverity::Normal,
                events::EXPANDED_INODE_PRESSURE,
                format!(
                    "PVC expanded from {} to {} due to inode pressure (storage: {:.1}%, inodes: {:.1}%) - {} filesystem",
                    format_bytes(from),
                    format_bytes(to),
                    volume.usage_percent,
                    volume.inodes_usage_percent,
                    info.fs_type
                ),
            )
        }
    } else {
        EventRecord::for_claim(
            claim,
            EventSeverity::Normal,
            events::EXPANDED,
            format!(
                "PVC expanded from {} to {} (storage: {:.1}%)",
                format_bytes(from),
                format_bytes(to),
                volume.usage_percent
            ),
        )
    }
}
