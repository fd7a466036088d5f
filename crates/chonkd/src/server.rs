//! The metrics and health endpoints.
//!
//! Served by every replica, leader or not. `/metrics` renders the
//! process registry; `/healthz` is a liveness ping; `/readyz` checks
//! telemetry reachability under a five-second bound.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tokio::sync::watch;
use tracing::{error, info};

use chonk_cluster::KubeCluster;
use chonk_metrics::Metrics;
use chonk_telemetry::Collector;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn serve_metrics(
    addr: SocketAddr,
    metrics: Arc<Metrics>,
    shutdown: watch::Receiver<bool>,
) {
    let router = Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(metrics);
    serve(addr, router, shutdown, "metrics").await;
}

pub async fn serve_health(
    addr: SocketAddr,
    collector: Arc<Collector<KubeCluster>>,
    shutdown: watch::Receiver<bool>,
) {
    let router = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readyz))
        .with_state(collector);
    serve(addr, router, shutdown, "health").await;
}

async fn serve(addr: SocketAddr, router: Router, mut shutdown: watch::Receiver<bool>, name: &str) {
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%addr, error = %err, "failed to bind {name} endpoint");
            return;
        }
    };
    info!(%addr, "{name} endpoint listening");

    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        let _ = shutdown.changed().await;
    });
    if let Err(err) = server.await {
        error!(error = %err, "{name} endpoint failed");
    }
}

async fn render_metrics(
    State(metrics): State<Arc<Metrics>>,
) -> Result<String, (StatusCode, String)> {
    metrics
        .render()
        .map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))
}

async fn readyz(
    State(collector): State<Arc<Collector<KubeCluster>>>,
) -> Result<&'static str, (StatusCode, String)> {
    match tokio::time::timeout(PROBE_TIMEOUT, collector.probe()).await {
        Ok(Ok(())) => Ok("ok"),
        Ok(Err(err)) => Err((StatusCode::SERVICE_UNAVAILABLE, err.to_string())),
        Err(_) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "telemetry probe timed out".to_string(),
        )),
    }
}
