//! posproctord — the commander fleet monitor.
//!
//! Single binary that assembles the poller and the exposition endpoint:
//! - Target list (TOML, reloaded every cycle)
//! - Commander diagnostic client
//! - Worker pool + polling loop
//! - Metrics registry + `/metrics`
//!
//! # Usage
//!
//! ```text
//! posproctord run --config /etc/posproctor/posproctor.toml
//! posproctord check --config posproctor.toml
//! posproctord probe --config posproctor.toml --address 10.20.0.14
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use posproctor_client::{CommanderClient, DiagnosticClient};
use posproctor_core::{FileTargetSource, ProctorConfig, Target, TargetSource};
use posproctor_metrics::{AppInfo, MetricsRegistry};
use posproctor_scheduler::{Orchestrator, OrchestratorConfig, PoolConfig, WorkerPool};

#[derive(Parser)]
#[command(name = "posproctord", about = "Commander fleet diagnostics exporter", version)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll all enabled targets on an interval and serve /metrics.
    Run {
        /// Path to posproctor.toml.
        #[arg(long, short)]
        config: PathBuf,

        /// Override `exporter.listen`.
        #[arg(long)]
        listen: Option<SocketAddr>,
    },

    /// Validate configuration, credentials and the target list, then exit.
    Check {
        #[arg(long, short)]
        config: PathBuf,
    },

    /// Poll a single commander once and print the result as JSON.
    Probe {
        #[arg(long, short)]
        config: PathBuf,

        /// Target address (`host` or `host:port`).
        #[arg(long)]
        address: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run { config, listen } => run(&config, listen).await,
        Command::Check { config } => check(&config),
        Command::Probe { config, address } => probe(&config, &address).await,
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,posproctor=debug"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load_config(path: &Path) -> anyhow::Result<ProctorConfig> {
    ProctorConfig::from_file(path).with_context(|| format!("loading config {}", path.display()))
}

fn build_client(config: &ProctorConfig) -> anyhow::Result<CommanderClient> {
    let credentials = config.credentials().context("resolving commander credentials")?;
    CommanderClient::new(&config.client, credentials).context("building TLS client configuration")
}

async fn run(config_path: &Path, listen: Option<SocketAddr>) -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "posproctord starting");

    let config = load_config(config_path)?;
    let client = Arc::new(build_client(&config)?);

    let metrics = Arc::new(MetricsRegistry::new(AppInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        pool_size: config.poller.pool_size,
        per_target_timeout: config.poller.per_target_timeout,
        cycle_interval: config.poller.cycle_interval,
    }));

    // ── Poller ─────────────────────────────────────────────────

    let pool = WorkerPool::new(client, metrics.clone(), PoolConfig::from(&config.poller));
    let source = FileTargetSource::new(&config.targets_file);
    let orchestrator = Orchestrator::new(pool, source, OrchestratorConfig::from(&config.poller))
        .with_context(|| format!("loading targets from {}", config.targets_file.display()))?;

    // ── Exposition endpoint ────────────────────────────────────

    let addr = listen.unwrap_or(config.exporter.listen);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding metrics endpoint {addr}"))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(posproctor_exporter::serve(listener, metrics, shutdown_rx.clone()));
    let poller = tokio::spawn(orchestrator.run(shutdown_rx));

    shutdown_signal().await;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    poller.await.context("polling loop panicked")?;
    server.await.context("metrics server panicked")??;

    info!("posproctord stopped");
    Ok(())
}

fn check(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let credentials = config.credentials().context("resolving commander credentials")?;
    let registry = FileTargetSource::new(&config.targets_file)
        .reload()
        .with_context(|| format!("loading targets from {}", config.targets_file.display()))?;

    println!("config:      {}", config_path.display());
    println!("targets:     {} total, {} enabled", registry.total(), registry.enabled_count());
    println!("username:    {}", credentials.username);
    println!(
        "poller:      pool_size={} timeout={:?} interval={:?} budget={:?}",
        config.poller.pool_size,
        config.poller.per_target_timeout,
        config.poller.cycle_interval,
        config.poller.cycle_budget(),
    );
    println!("listen:      {}", config.exporter.listen);
    Ok(())
}

async fn probe(config_path: &Path, address: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let client = build_client(&config)?;

    // Use the configured labels when the address is a known target.
    let target = match FileTargetSource::new(&config.targets_file).reload() {
        Ok(registry) => registry.find(address).cloned(),
        Err(e) => {
            warn!(error = %e, "target list unavailable, probing with default labels");
            None
        }
    }
    .unwrap_or_else(|| Target::new(address, address, "probe"));

    let result = client.query(&target, config.poller.per_target_timeout).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if let Some(kind) = result.error_kind {
        bail!("probe of {address} failed ({kind})");
    }
    Ok(())
}

/// Resolves on SIGINT or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
