//! Election scheduler daemon (rw-sched) - Main entry point
//!
//! Keeps one election on air and one waiting for every configured station
//! until interrupted.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rw_common::config::{resolve_database_path, TomlConfig};
use rw_common::db::{init_database, register_station};
use rw_common::events::EventBus;
use rw_sched::Director;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_TICK_SECS: u64 = 10;
const DEFAULT_EVENT_CAPACITY: usize = 1000;

/// Command-line arguments for rw-sched
#[derive(Parser, Debug)]
#[command(name = "rw-sched")]
#[command(about = "Election scheduler for Rainwave stations")]
#[command(version)]
struct Args {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, env = "RW_CONFIG")]
    config: Option<PathBuf>,

    /// Database file (overrides RW_DATABASE and the config file)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Station to schedule; repeat for several
    #[arg(short, long = "station")]
    stations: Vec<i64>,

    /// Seconds between scheduler ticks
    #[arg(short, long)]
    tick_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rw_sched=info,rw_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = TomlConfig::load_or_default(args.config.as_deref());

    let stations = if args.stations.is_empty() {
        config.stations.clone()
    } else {
        args.stations.clone()
    };
    if stations.is_empty() {
        bail!("No stations configured; pass --station or set `stations` in config.toml");
    }

    let tick = Duration::from_secs(
        args.tick_secs
            .or(config.tick_secs)
            .unwrap_or(DEFAULT_TICK_SECS)
            .max(1),
    );

    let db_path = resolve_database_path(args.database.as_deref(), "RW_DATABASE", &config);
    info!("Database: {}", db_path.display());

    let db = init_database(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    for &station_id in &stations {
        register_station(&db, station_id, &format!("Station {}", station_id))
            .await
            .with_context(|| format!("Failed to register station {}", station_id))?;
    }

    let events = EventBus::new(config.event_capacity.unwrap_or(DEFAULT_EVENT_CAPACITY));
    info!("Event channel capacity: {}", events.capacity());
    let director = Director::new(db.clone(), events, &stations);

    info!("Starting rw-sched for stations {:?}", stations);
    director.run(tick, shutdown_signal()).await;

    db.close().await;
    info!("Scheduler shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
