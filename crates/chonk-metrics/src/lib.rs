//! chonk-metrics — the observability surface.
//!
//! One [`Metrics`] value owns a dedicated prometheus registry and every
//! counter, gauge, and histogram the controllers touch. There is no
//! global registry: the value is built once at startup and shared by
//! `Arc`, so tests get their own isolated instance. All handles are safe
//! under concurrent update.

use prometheus::{
    Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry, TextEncoder,
};
use thiserror::Error;

const NAMESPACE: &str = "pvcchonker";
const RESIZER: &str = "resizer";

/// Skip reasons recorded under `failed_resize_total{reason}`.
pub mod reason {
    pub const STORAGE_CLASS_NOT_EXPANDABLE: &str = "storage_class_not_expandable";
    pub const METRICS_NOT_FOUND: &str = "metrics_not_found";
    pub const EXPANSION_FAILED: &str = "expansion_failed";
}

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metric registration failed: {0}")]
    Register(#[from] prometheus::Error),

    #[error("metric encoding failed: {0}")]
    Encode(String),
}

/// Every metric the controllers publish.
pub struct Metrics {
    registry: Registry,

    // Resizer counters.
    pub success_resize_total: IntCounterVec,
    pub failed_resize_total: IntCounterVec,
    pub threshold_reached_total: IntCounterVec,
    pub limit_reached_total: IntCounterVec,
    pub cooldown_skipped_total: IntCounterVec,
    pub resize_in_progress_total: IntCounterVec,
    pub loop_seconds: Histogram,

    // Client counters.
    pub kubernetes_client_requests_total: IntCounterVec,
    pub kubelet_client_requests_total: IntCounterVec,
    pub kubelet_client_response_seconds: Histogram,

    // Gauges.
    pub managed_pvcs_total: IntGauge,
    pub pvc_usage_percent: GaugeVec,
    pub pvc_capacity_bytes: IntGaugeVec,
    pub pvc_inodes_usage_percent: GaugeVec,
    pub pvc_inodes_total: IntGaugeVec,
    pub reconciliation_status: IntGaugeVec,
    pub last_reconciliation_timestamp_seconds: Gauge,
}

fn resizer_opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help).namespace(NAMESPACE).subsystem(RESIZER)
}

fn opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help).namespace(NAMESPACE)
}

impl Metrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let success_resize_total = IntCounterVec::new(
            resizer_opts("success_resize_total", "Successful claim expansions."),
            &["pvc", "namespace"],
        )?;
        let failed_resize_total = IntCounterVec::new(
            resizer_opts("failed_resize_total", "Skipped or failed claim expansions."),
            &["pvc", "namespace", "reason"],
        )?;
        let threshold_reached_total = IntCounterVec::new(
            resizer_opts("threshold_reached_total", "Usage threshold crossings."),
            &["pvc", "namespace"],
        )?;
        let limit_reached_total = IntCounterVec::new(
            resizer_opts("limit_reached_total", "Expansions refused by the size ceiling."),
            &["pvc", "namespace"],
        )?;
        let cooldown_skipped_total = IntCounterVec::new(
            resizer_opts("cooldown_skipped_total", "Claims skipped inside their cooldown window."),
            &["pvc", "namespace"],
        )?;
        let resize_in_progress_total = IntCounterVec::new(
            resizer_opts("resize_in_progress_total", "Claims skipped with a resize in flight."),
            &["pvc", "namespace"],
        )?;
        let loop_seconds = Histogram::with_opts(HistogramOpts::from(resizer_opts(
            "loop_seconds",
            "Duration of one reconciliation cycle.",
        )))?;

        let kubernetes_client_requests_total = IntCounterVec::new(
            opts("kubernetes_client_requests_total", "Orchestrator API requests by outcome."),
            &["operation", "status"],
        )?;
        let kubelet_client_requests_total = IntCounterVec::new(
            opts("kubelet_client_requests_total", "Node-agent metric collections by outcome."),
            &["status"],
        )?;
        let kubelet_client_response_seconds = Histogram::with_opts(HistogramOpts::from(opts(
            "kubelet_client_response_seconds",
            "Latency of one full node-agent collection.",
        )))?;

        let managed_pvcs_total = IntGauge::with_opts(opts(
            "managed_pvcs_total",
            "Claims currently under management.",
        ))?;
        let pvc_usage_percent = GaugeVec::new(
            opts("pvc_usage_percent", "Storage usage percentage per claim."),
            &["pvc", "namespace"],
        )?;
        let pvc_capacity_bytes = IntGaugeVec::new(
            opts("pvc_capacity_bytes", "Volume capacity in bytes per claim."),
            &["pvc", "namespace"],
        )?;
        let pvc_inodes_usage_percent = GaugeVec::new(
            opts("pvc_inodes_usage_percent", "Inode usage percentage per claim."),
            &["pvc", "namespace"],
        )?;
        let pvc_inodes_total = IntGaugeVec::new(
            opts("pvc_inodes_total", "Total inodes per claim."),
            &["pvc", "namespace"],
        )?;
        let reconciliation_status = IntGaugeVec::new(
            opts("reconciliation_status", "Outcome of the last cycle (1 = in that state)."),
            &["status"],
        )?;
        let last_reconciliation_timestamp_seconds = Gauge::with_opts(opts(
            "last_reconciliation_timestamp_seconds",
            "Unix timestamp of the last cycle.",
        ))?;

        registry.register(Box::new(success_resize_total.clone()))?;
        registry.register(Box::new(failed_resize_total.clone()))?;
        registry.register(Box::new(threshold_reached_total.clone()))?;
        registry.register(Box::new(limit_reached_total.clone()))?;
        registry.register(Box::new(cooldown_skipped_total.clone()))?;
        registry.register(Box::new(resize_in_progress_total.clone()))?;
        registry.register(Box::new(loop_seconds.clone()))?;
        registry.register(Box::new(kubernetes_client_requests_total.clone()))?;
        registry.register(Box::new(kubelet_client_requests_total.clone()))?;
        registry.register(Box::new(kubelet_client_response_seconds.clone()))?;
        registry.register(Box::new(managed_pvcs_total.clone()))?;
        registry.register(Box::new(pvc_usage_percent.clone()))?;
        registry.register(Box::new(pvc_capacity_bytes.clone()))?;
        registry.register(Box::new(pvc_inodes_usage_percent.clone()))?;
        registry.register(Box::new(pvc_inodes_total.clone()))?;
        registry.register(Box::new(reconciliation_status.clone()))?;
        registry.register(Box::new(last_reconciliation_timestamp_seconds.clone()))?;

        Ok(Self {
            registry,
            success_resize_total,
            failed_resize_total,
            threshold_reached_total,
            limit_reached_total,
            cooldown_skipped_total,
            resize_in_progress_total,
            loop_seconds,
            kubernetes_client_requests_total,
            kubelet_client_requests_total,
            kubelet_client_response_seconds,
            managed_pvcs_total,
            pvc_usage_percent,
            pvc_capacity_bytes,
            pvc_inodes_usage_percent,
            pvc_inodes_total,
            reconciliation_status,
            last_reconciliation_timestamp_seconds,
        })
    }

    /// Record a per-claim skip or failure under its reason.
    pub fn record_failed_resize(&self, pvc: &str, namespace: &str, why: &str) {
        self.failed_resize_total
            .with_label_values(&[pvc, namespace, why])
            .inc();
    }

    pub fn record_success_resize(&self, pvc: &str, namespace: &str) {
        self.success_resize_total
            .with_label_values(&[pvc, namespace])
            .inc();
    }

    pub fn record_threshold_reached(&self, pvc: &str, namespace: &str) {
        self.threshold_reached_total
            .with_label_values(&[pvc, namespace])
            .inc();
    }

    pub fn record_limit_reached(&self, pvc: &str, namespace: &str) {
        self.limit_reached_total
            .with_label_values(&[pvc, namespace])
            .inc();
    }

    pub fn record_cooldown_skipped(&self, pvc: &str, namespace: &str) {
        self.cooldown_skipped_total
            .with_label_values(&[pvc, namespace])
            .inc();
    }

    pub fn record_resize_in_progress(&self, pvc: &str, namespace: &str) {
        self.resize_in_progress_total
            .with_label_values(&[pvc, namespace])
            .inc();
    }

    /// Record an orchestrator API request outcome.
    pub fn record_api_request(&self, operation: &str, ok: bool) {
        let status = if ok { "success" } else { "failed" };
        self.kubernetes_client_requests_total
            .with_label_values(&[operation, status])
            .inc();
    }

    /// Record a node-agent collection outcome.
    pub fn record_kubelet_request(&self, ok: bool) {
        let status = if ok { "success" } else { "failed" };
        self.kubelet_client_requests_total
            .with_label_values(&[status])
            .inc();
    }

    /// Publish per-claim usage gauges.
    pub fn update_claim_gauges(
        &self,
        pvc: &str,
        namespace: &str,
        usage_percent: f64,
        capacity_bytes: i64,
        inodes_usage_percent: f64,
        inodes_total: i64,
    ) {
        self.pvc_usage_percent
            .with_label_values(&[pvc, namespace])
            .set(usage_percent);
        self.pvc_capacity_bytes
            .with_label_values(&[pvc, namespace])
            .set(capacity_bytes);
        self.pvc_inodes_usage_percent
            .with_label_values(&[pvc, namespace])
            .set(inodes_usage_percent);
        self.pvc_inodes_total
            .with_label_values(&[pvc, namespace])
            .set(inodes_total);
    }

    /// Flip the cycle status gauges and stamp the cycle timestamp.
    pub fn mark_cycle(&self, success: bool) {
        self.reconciliation_status
            .with_label_values(&["success"])
            .set(i64::from(success));
        self.reconciliation_status
            .with_label_values(&["failure"])
            .set(i64::from(!success));
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        self.last_reconciliation_timestamp_seconds.set(now);
    }

    /// Render the registry in the text exposition format.
    pub fn render(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buf)
            .map_err(|e| MetricsError::Encode(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| MetricsError::Encode(e.to_string()))
    }

    /// Counter value helper for tests and status reporting.
    pub fn success_count(&self, pvc: &str, namespace: &str) -> u64 {
        self.success_resize_total
            .with_label_values(&[pvc, namespace])
            .get()
    }

    /// Counter value helper for tests and status reporting.
    pub fn failed_count(&self, pvc: &str, namespace: &str, why: &str) -> u64 {
        self.failed_resize_total
            .with_label_values(&[pvc, namespace, why])
            .get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_and_renders() {
        let metrics = Metrics::new().unwrap();
        metrics.record_success_resize("data", "prod");
        metrics.record_failed_resize("data", "prod", reason::METRICS_NOT_FOUND);
        metrics.mark_cycle(true);

        let text = metrics.render().unwrap();
        assert!(text.contains("pvcchonker_resizer_success_resize_total"));
        assert!(text.contains("pvc=\"data\""));
        assert!(text.contains("reason=\"metrics_not_found\""));
        assert!(text.contains("pvcchonker_reconciliation_status"));
    }

    #[test]
    fn cycle_status_gauges_are_exclusive() {
        let metrics = Metrics::new().unwrap();
        metrics.mark_cycle(false);
        assert_eq!(
            metrics
                .reconciliation_status
                .with_label_values(&["failure"])
                .get(),
            1
        );
        assert_eq!(
            metrics
                .reconciliation_status
                .with_label_values(&["success"])
                .get(),
            0
        );

        metrics.mark_cycle(true);
        assert_eq!(
            metrics
                .reconciliation_status
                .with_label_values(&["success"])
                .get(),
            1
        );
    }

    #[test]
    fn counters_accumulate_per_label_set() {
        let metrics = Metrics::new().unwrap();
        metrics.record_success_resize("a", "ns");
        metrics.record_success_resize("a", "ns");
        metrics.record_success_resize("b", "ns");
        assert_eq!(metrics.success_count("a", "ns"), 2);
        assert_eq!(metrics.success_count("b", "ns"), 1);
        assert_eq!(metrics.success_count("c", "ns"), 0);
    }

    #[test]
    fn independent_instances_do_not_share_state() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.record_success_resize("x", "ns");
        assert_eq!(b.success_count("x", "ns"), 0);
    }
}
