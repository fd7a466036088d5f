//! Parallel node-agent collection.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::try_join_all;
use thiserror::Error;
use tracing::debug;
use url::Url;

use chonk_cluster::{ClusterClient, ClusterError};
use chonk_metrics::Metrics;

use crate::cache::StatsCache;
use crate::parse::{parse_volume_samples, ParseError, VolumeSample};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Hosts the direct fetch mode refuses to talk to.
const BLOCKED_HOSTS: &[&str] = &["169.254.169.254", "metadata.google.internal", "localhost"];

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid node agent URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error("no nodes found")]
    NoNodes,

    #[error("failed to list nodes: {0}")]
    ListNodes(#[source] ClusterError),

    #[error("fetch from node {node} failed: {reason}")]
    Fetch { node: String, reason: String },

    #[error("parse failure for node {node}: {source}")]
    Parse {
        node: String,
        #[source]
        source: ParseError,
    },
}

/// Validate a direct-mode node agent URL.
///
/// Only http/https with a real host are accepted, and the usual
/// metadata/loopback targets are refused outright.
pub fn validate_agent_url(raw: &str) -> Result<Url, TelemetryError> {
    let invalid = |reason: &str| TelemetryError::InvalidUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("only http and https schemes are allowed"));
    }
    let Some(host) = url.host_str() else {
        return Err(invalid("URL must have a host"));
    };
    let host = host.to_ascii_lowercase();
    if BLOCKED_HOSTS.iter().any(|blocked| host.contains(blocked)) {
        return Err(invalid("blocked host"));
    }
    Ok(url)
}

/// Fetches volume stats from every node agent in parallel.
///
/// Two modes: the orchestrator API proxy (default), or direct HTTP to a
/// fixed URL (test clusters). Collection is all-or-nothing: the first
/// node that fails to fetch or parse fails the cycle.
pub struct Collector<C> {
    cluster: Arc<C>,
    agent_url: Option<Url>,
    http: reqwest::Client,
    metrics: Arc<Metrics>,
}

impl<C: ClusterClient> Collector<C> {
    pub fn new(
        cluster: Arc<C>,
        agent_url: Option<&str>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, TelemetryError> {
        let agent_url = match agent_url {
            Some(raw) if !raw.is_empty() => Some(validate_agent_url(raw)?),
            _ => None,
        };
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| TelemetryError::HttpClient(e.to_string()))?;
        Ok(Self {
            cluster,
            agent_url,
            http,
            metrics,
        })
    }

    /// Collect one cycle's worth of volume stats.
    pub async fn collect(&self) -> Result<StatsCache, TelemetryError> {
        let started = Instant::now();
        let result = self.collect_inner().await;
        self.metrics
            .kubelet_client_response_seconds
            .observe(started.elapsed().as_secs_f64());
        result
    }

    async fn collect_inner(&self) -> Result<StatsCache, TelemetryError> {
        let nodes = self
            .cluster
            .list_node_names()
            .await
            .map_err(TelemetryError::ListNodes)?;
        if nodes.is_empty() {
            return Err(TelemetryError::NoNodes);
        }

        // First failure drops the remaining fetch futures; partial data
        // is never merged.
        let per_node = try_join_all(nodes.iter().map(|node| self.fetch_and_parse(node))).await?;

        let samples: Vec<VolumeSample> = per_node.into_iter().flatten().collect();
        let cache = StatsCache::from_samples(samples);
        debug!(nodes = nodes.len(), volumes = cache.len(), "telemetry collected");
        Ok(cache)
    }

    async fn fetch_and_parse(&self, node: &str) -> Result<Vec<VolumeSample>, TelemetryError> {
        let payload = match &self.agent_url {
            Some(url) => self.fetch_direct(url, node).await?,
            None => self
                .cluster
                .node_metrics_text(node)
                .await
                .map_err(|e| TelemetryError::Fetch {
                    node: node.to_string(),
                    reason: e.to_string(),
                })?,
        };

        parse_volume_samples(&payload).map_err(|source| TelemetryError::Parse {
            node: node.to_string(),
            source,
        })
    }

    async fn fetch_direct(&self, base: &Url, node: &str) -> Result<String, TelemetryError> {
        let fetch_err = |reason: String| TelemetryError::Fetch {
            node: node.to_string(),
            reason,
        };

        let url = base
            .join("metrics")
            .map_err(|e| fetch_err(e.to_string()))?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_err(e.to_string()))?;
        if !response.status().is_success() {
            return Err(fetch_err(format!("unexpected status {}", response.status())));
        }
        response.text().await.map_err(|e| fetch_err(e.to_string()))
    }

    /// Readiness probe: can we still reach the telemetry source?
    pub async fn probe(&self) -> Result<(), TelemetryError> {
        let nodes = self
            .cluster
            .list_node_names()
            .await
            .map_err(TelemetryError::ListNodes)?;
        let Some(node) = nodes.first() else {
            return Err(TelemetryError::NoNodes);
        };
        self.fetch_and_parse(node).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chonk_cluster::FakeCluster;

    const GOOD_PAYLOAD: &str = concat!(
        "kubelet_volume_stats_capacity_bytes{namespace=\"prod\",persistentvolumeclaim=\"data\"} 10737418240\n",
        "kubelet_volume_stats_available_bytes{namespace=\"prod\",persistentvolumeclaim=\"data\"} 1073741824\n",
    );

    fn collector(fake: Arc<FakeCluster>) -> Collector<FakeCluster> {
        Collector::new(fake, None, Arc::new(Metrics::new().unwrap())).unwrap()
    }

    #[test]
    fn url_validation() {
        assert!(validate_agent_url("http://node-agent:10255").is_ok());
        assert!(validate_agent_url("https://10.0.0.5:10250").is_ok());

        assert!(validate_agent_url("ftp://node:21").is_err());
        assert!(validate_agent_url("http://").is_err());
        assert!(validate_agent_url("not a url").is_err());
        assert!(validate_agent_url("http://169.254.169.254/latest").is_err());
        assert!(validate_agent_url("http://metadata.google.internal").is_err());
        assert!(validate_agent_url("http://localhost:10255").is_err());
        assert!(validate_agent_url("http://LOCALHOST:10255").is_err());
    }

    #[tokio::test]
    async fn collects_and_merges_nodes() {
        let fake = Arc::new(FakeCluster::new());
        fake.add_node("worker-0", GOOD_PAYLOAD);
        fake.add_node(
            "worker-1",
            "kubelet_volume_stats_capacity_bytes{namespace=\"dev\",persistentvolumeclaim=\"scratch\"} 100\n",
        );

        let cache = collector(fake).collect().await.unwrap();
        assert_eq!(cache.len(), 2);
        let stats = cache.get("prod", "data").unwrap();
        assert!((stats.usage_percent - 90.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn empty_cluster_is_an_error() {
        let fake = Arc::new(FakeCluster::new());
        let err = collector(fake).collect().await.unwrap_err();
        assert!(matches!(err, TelemetryError::NoNodes));
    }

    #[tokio::test]
    async fn one_bad_node_fails_the_collection() {
        let fake = Arc::new(FakeCluster::new());
        fake.add_node("worker-0", GOOD_PAYLOAD);
        fake.add_node(
            "worker-1",
            "kubelet_volume_stats_inodes{namespace=\"a\",persistentvolumeclaim=\"b\"} banana\n",
        );

        let err = collector(fake).collect().await.unwrap_err();
        assert!(matches!(err, TelemetryError::Parse { .. }));
    }

    #[tokio::test]
    async fn unreachable_node_fails_the_collection() {
        let fake = Arc::new(FakeCluster::new());
        fake.add_node("worker-0", GOOD_PAYLOAD);
        fake.add_unreachable_node("worker-1");

        let err = collector(fake).collect().await.unwrap_err();
        assert!(matches!(err, TelemetryError::Fetch { .. }));
    }

    #[tokio::test]
    async fn node_list_failure_fails_the_collection() {
        let fake = Arc::new(FakeCluster::new());
        fake.add_node("worker-0", GOOD_PAYLOAD);
        fake.fail_list_nodes(true);

        let err = collector(fake).collect().await.unwrap_err();
        assert!(matches!(err, TelemetryError::ListNodes(_)));
    }

    #[tokio::test]
    async fn probe_reports_reachability() {
        let fake = Arc::new(FakeCluster::new());
        fake.add_node("worker-0", GOOD_PAYLOAD);
        assert!(collector(fake.clone()).probe().await.is_ok());

        let empty = Arc::new(FakeCluster::new());
        assert!(collector(empty).probe().await.is_err());
    }
}
