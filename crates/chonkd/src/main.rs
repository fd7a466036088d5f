//! chonkd — the pvc-chonker daemon.
//!
//! Wires the control loops to a cluster: flag parsing, logging, the
//! metrics and health endpoints, leader election, and graceful
//! shutdown. All decision logic lives in the library crates; this
//! binary only assembles them.
//!
//! # Usage
//!
//! ```text
//! chonkd --watch-interval 5m --default-threshold 80 --default-increase 10%
//! chonkd --leader-elect --dry-run --log-format console
//! ```

mod server;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use chonk_cluster::{KubeCluster, LeaseElector};
use chonk_controller::watch::{run_group_watch, run_policy_watch};
use chonk_controller::{ClaimReconciler, GroupCoordinator, PolicyController};
use chonk_core::quantity::parse_quantity;
use chonk_core::GlobalConfig;
use chonk_metrics::Metrics;
use chonk_telemetry::{validate_agent_url, Collector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Json,
    Console,
}

#[derive(Parser, Debug)]
#[command(name = "chonkd", version, about = "Auto-expansion controller for persistent volume claims")]
struct Cli {
    /// Interval between reconciliation cycles.
    #[arg(long, env = "CHONK_WATCH_INTERVAL", default_value = "5m", value_parser = parse_duration_flag)]
    watch_interval: Duration,

    /// Maximum concurrent per-claim workers per cycle.
    #[arg(long, env = "CHONK_MAX_PARALLEL", default_value_t = 4)]
    max_parallel: i64,

    /// Enable Lease-based leader election.
    #[arg(long, env = "CHONK_LEADER_ELECT")]
    leader_elect: bool,

    /// Namespace holding the election lease.
    #[arg(long, env = "CHONK_LEADER_ELECTION_NAMESPACE", default_value = "default")]
    leader_election_namespace: String,

    /// Compute and report decisions without writing any claim.
    #[arg(long, env = "CHONK_DRY_RUN")]
    dry_run: bool,

    /// Bind address for the metrics endpoint.
    #[arg(long, env = "CHONK_METRICS_BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    metrics_bind_address: SocketAddr,

    /// Bind address for the health probes.
    #[arg(long, env = "CHONK_HEALTH_PROBE_BIND_ADDRESS", default_value = "0.0.0.0:8081")]
    health_probe_bind_address: SocketAddr,

    /// Fetch node-agent metrics from this URL instead of the API proxy
    /// (test clusters).
    #[arg(long, env = "CHONK_NODE_AGENT_URL")]
    node_agent_url: Option<String>,

    /// Default storage usage threshold percentage (0 keeps the built-in
    /// default).
    #[arg(long, env = "CHONK_DEFAULT_THRESHOLD", default_value_t = 0.0)]
    default_threshold: f64,

    /// Default inode usage threshold percentage (0 keeps the built-in
    /// default).
    #[arg(long, env = "CHONK_DEFAULT_INODES_THRESHOLD", default_value_t = 0.0)]
    default_inodes_threshold: f64,

    /// Default expansion amount, a percentage or a quantity.
    #[arg(long, env = "CHONK_DEFAULT_INCREASE", default_value = "")]
    default_increase: String,

    /// Default cooldown between expansions (0 keeps the built-in
    /// default).
    #[arg(long, env = "CHONK_DEFAULT_COOLDOWN", default_value = "0s", value_parser = parse_duration_flag)]
    default_cooldown: Duration,

    /// Default minimum expansion amount.
    #[arg(long, env = "CHONK_DEFAULT_MIN_SCALE_UP", default_value = "")]
    default_min_scale_up: String,

    /// Default size ceiling (empty means unbounded).
    #[arg(long, env = "CHONK_DEFAULT_MAX_SIZE", default_value = "")]
    default_max_size: String,

    /// Log output format.
    #[arg(long, env = "CHONK_LOG_FORMAT", value_enum, default_value = "json")]
    log_format: LogFormat,

    /// Log level filter (tracing syntax).
    #[arg(long, env = "CHONK_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

fn parse_duration_flag(raw: &str) -> Result<Duration, String> {
    humantime::parse_duration(raw).map_err(|e| e.to_string())
}

fn init_logging(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    match cli.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Console => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

/// Build the global config, failing fast on unparseable flag values.
fn build_global_config(cli: &Cli) -> anyhow::Result<GlobalConfig> {
    let min_scale_up = if cli.default_min_scale_up.is_empty() {
        0
    } else {
        parse_quantity(&cli.default_min_scale_up).context("invalid --default-min-scale-up")?
    };
    let max_size = if cli.default_max_size.is_empty() {
        0
    } else {
        parse_quantity(&cli.default_max_size).context("invalid --default-max-size")?
    };
    if !cli.default_increase.is_empty() && !cli.default_increase.ends_with('%') {
        parse_quantity(&cli.default_increase).context("invalid --default-increase")?;
    }
    Ok(GlobalConfig::from_flags(
        cli.default_threshold,
        cli.default_inodes_threshold,
        &cli.default_increase,
        cli.default_cooldown,
        min_scale_up,
        max_size,
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    if cli.dry_run {
        info!("starting in dry-run mode: no claim will be modified");
    }

    let global = build_global_config(&cli)?;
    if let Some(url) = &cli.node_agent_url {
        validate_agent_url(url).context("invalid --node-agent-url")?;
    }

    let metrics = Arc::new(Metrics::new().context("failed to build metrics registry")?);

    let client = kube::Client::try_default()
        .await
        .context("failed to build cluster client")?;
    let cluster = Arc::new(KubeCluster::new(client.clone(), Arc::clone(&metrics)));

    let collector = Collector::new(
        Arc::clone(&cluster),
        cli.node_agent_url.as_deref(),
        Arc::clone(&metrics),
    )
    .context("failed to build telemetry collector")?;
    let probe_collector = Arc::new(Collector::new(
        Arc::clone(&cluster),
        cli.node_agent_url.as_deref(),
        Arc::clone(&metrics),
    )?);

    let reconciler = Arc::new(ClaimReconciler::new(
        Arc::clone(&cluster),
        collector,
        global,
        Arc::clone(&metrics),
        cli.watch_interval,
        cli.max_parallel,
        cli.dry_run,
    ));
    let coordinator = Arc::new(GroupCoordinator::new(Arc::clone(&cluster), cli.dry_run));
    let policy_controller = Arc::new(PolicyController::new(Arc::clone(&cluster)));

    // ── Shutdown plumbing ──────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn({
        let shutdown_tx = shutdown_tx.clone();
        async move {
            wait_for_signal().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    // ── HTTP endpoints (served by leaders and followers alike) ─────

    let metrics_server = tokio::spawn(server::serve_metrics(
        cli.metrics_bind_address,
        Arc::clone(&metrics),
        shutdown_rx.clone(),
    ));
    let health_server = tokio::spawn(server::serve_health(
        cli.health_probe_bind_address,
        Arc::clone(&probe_collector),
        shutdown_rx.clone(),
    ));

    // ── Leader election ────────────────────────────────────────────

    let (leader_tx, mut leader_rx) = watch::channel(false);
    if cli.leader_elect {
        let identity = format!(
            "{}-{}",
            std::env::var("HOSTNAME").unwrap_or_else(|_| "chonkd".to_string()),
            std::process::id()
        );
        let elector = LeaseElector::new(client.clone(), &cli.leader_election_namespace, identity);
        tokio::spawn(elector.run(leader_tx, shutdown_rx.clone()));

        info!("waiting for leadership");
        let mut shutdown = shutdown_rx.clone();
        while !*leader_rx.borrow() {
            tokio::select! {
                changed = leader_rx.changed() => {
                    if changed.is_err() {
                        anyhow::bail!("leader election ended unexpectedly");
                    }
                }
                _ = shutdown.changed() => {
                    info!("shut down before acquiring leadership");
                    return Ok(());
                }
            }
        }
    } else {
        let _ = leader_tx.send(true);
    }

    // ── Control loops ──────────────────────────────────────────────

    info!(
        interval = ?cli.watch_interval,
        dry_run = cli.dry_run,
        "starting control loops"
    );

    let reconciler_handle = tokio::spawn(Arc::clone(&reconciler).run(shutdown_rx.clone()));
    let group_handle = tokio::spawn(run_group_watch(
        client.clone(),
        coordinator,
        shutdown_rx.clone(),
    ));
    let policy_handle = tokio::spawn(run_policy_watch(
        client.clone(),
        policy_controller,
        shutdown_rx.clone(),
    ));

    // Run until shutdown, or until leadership is lost.
    let mut shutdown = shutdown_rx.clone();
    let mut lost_leadership = false;
    if cli.leader_elect {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                changed = leader_rx.changed() => {
                    if changed.is_err() || !*leader_rx.borrow() {
                        error!("leadership lost; shutting down");
                        lost_leadership = true;
                        let _ = shutdown_tx.send(true);
                        break;
                    }
                }
            }
        }
    } else {
        let _ = shutdown.changed().await;
    }

    let _ = reconciler_handle.await;
    let _ = group_handle.await;
    let _ = policy_handle.await;
    let _ = metrics_server.await;
    let _ = health_server.await;

    if lost_leadership {
        anyhow::bail!("terminated after losing leadership");
    }
    info!("chonkd stopped");
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
