//! fleetd — the FleetGrid daemon.
//!
//! Single binary that assembles the FleetGrid control loops:
//! - Scaling engine (threshold checks, cooldown)
//! - Health checker (probes, replacement)
//! - Metrics aggregator (telemetry refresh)
//! - Instance cleanup
//!
//! # Usage
//!
//! ```text
//! fleetd run --config fleet.toml --data-dir /var/lib/fleetgrid
//! fleetd check-config --config fleet.toml
//! fleetd history --data-dir /var/lib/fleetgrid --since 24h
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use fleet_core::{FleetConfig, ResolvedConfig, parse_duration};
use fleetd::{Collaborators, Fleet, HttpProvisioner, HttpTelemetry};
use fleetgrid_health::HttpProber;
use fleetgrid_state::{EventRecorder, EventStore, epoch_millis};

#[derive(Parser)]
#[command(name = "fleetd", about = "FleetGrid daemon", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control loops until Ctrl-C.
    Run {
        /// Path to fleet.toml. Built-in defaults are used when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Data directory for the scaling event log.
        #[arg(long, default_value = "/var/lib/fleetgrid")]
        data_dir: PathBuf,
    },
    /// Validate a config file and print the resolved settings.
    CheckConfig {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Print recorded scaling events, newest first.
    History {
        #[arg(long, default_value = "/var/lib/fleetgrid")]
        data_dir: PathBuf,

        /// How far back to look (e.g. "30m", "24h").
        #[arg(long, default_value = "24h")]
        since: String,

        /// Print one JSON object per line.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,fleetd=debug,fleetgrid=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run { config, data_dir } => run(config.as_deref(), data_dir).await,
        Command::CheckConfig { config } => check_config(&config),
        Command::History {
            data_dir,
            since,
            json,
        } => history(&data_dir, &since, json),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ResolvedConfig> {
    let file = match path {
        Some(p) => FleetConfig::from_file(p).with_context(|| format!("reading {}", p.display()))?,
        None => FleetConfig::default(),
    };
    Ok(file.validate()?)
}

async fn run(config_path: Option<&Path>, data_dir: PathBuf) -> anyhow::Result<()> {
    info!("FleetGrid daemon starting");

    let config = load_config(config_path)?;
    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("events.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let events = EventStore::open(&db_path)?;
    info!(path = ?db_path, "event store opened");

    let fleet = Fleet::assemble(
        &config,
        Collaborators {
            provisioner: Arc::new(HttpProvisioner::new(config.provisioner.clone())),
            telemetry: Arc::new(HttpTelemetry::new(config.telemetry_path.clone())),
            prober: Arc::new(HttpProber::new(config.health_path.clone())),
            events: Arc::new(events),
        },
    );
    info!(
        provisioner = %config.provisioner,
        algorithm = %config.load_balancer.algorithm,
        min = config.scaling.min_instances,
        max = config.scaling.max_instances,
        "fleet assembled"
    );

    fleet.bootstrap().await;

    // ── Start background tasks ─────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = fleet.spawn(shutdown_rx);

    tokio::signal::ctrl_c()
        .await
        .context("failed to install CTRL+C handler")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    fleet.join(handles).await;

    let status = fleet.status();
    info!(
        running = status.running_instances,
        healthy = status.healthy_instances,
        "FleetGrid daemon stopped"
    );
    Ok(())
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = load_config(Some(path))?;
    println!("{} is valid", path.display());
    println!("{config:#?}");
    Ok(())
}

fn history(data_dir: &Path, since: &str, json: bool) -> anyhow::Result<()> {
    let window = parse_duration(since)
        .with_context(|| format!("invalid duration for --since: {since:?}"))?;
    let store = EventStore::open(&data_dir.join("events.redb"))?;
    let recorder = EventRecorder::new(Arc::new(store));

    let end = epoch_millis();
    let start = end.saturating_sub(window.as_millis() as u64);
    let events = recorder.history(start, end)?;

    for event in &events {
        if json {
            println!("{}", serde_json::to_string(event)?);
        } else {
            println!(
                "{}  {:<10} {:>3} -> {:<3} {:>6}ms  {}{}",
                event.timestamp,
                event.kind,
                event.instances_before,
                event.instances_after,
                event.duration_ms,
                event.reason,
                event
                    .failure
                    .as_deref()
                    .map(|f| format!(" [failed: {f}]"))
                    .unwrap_or_default(),
            );
        }
    }
    if !json {
        println!("{} event(s)", events.len());
    }
    Ok(())
}
