//! Parking facility manager
//!
//! Runs the control engine: entrance, exit and level controllers, boom gates,
//! billing workers, fire monitors and the evacuation coordinator, all on
//! native threads. The async runtime only drives the periodic metrics/status
//! report and waits for Ctrl+C.
//!
//! Module structure:
//! - `domain/` - Core types (Plate, LevelId, GateState, errors, rings)
//! - `io/` - Hardware boundary, whitelist, ledger, status feed
//! - `services/` - Actors (gates, entrances, exits, levels, billing, fire, evacuation)
//! - `infra/` - Infrastructure (Config, Metrics)

use clap::Parser;
use parking_control::infra::{Config, Metrics};
use parking_control::io::{load_whitelist, StatusWriter};
use parking_control::services::Facility;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Parking facility manager
#[derive(Parser, Debug)]
#[command(name = "parking-manager", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/parking.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default: INFO, use RUST_LOG=debug for every gate transition
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("GIT_HASH"),
        profile = env!("BUILD_PROFILE"),
        "parking-manager starting"
    );

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);
    info!(
        config_file = %config.config_file(),
        level_capacity = %config.level_capacity(),
        raise_ms = %config.raise_duration().as_millis(),
        hold_ms = %config.hold_duration().as_millis(),
        lower_ms = %config.lower_duration().as_millis(),
        rate_per_ms = %config.rate_per_ms(),
        ledger_file = %config.ledger_file(),
        billing_workers = %config.billing_workers(),
        whitelist_file = %config.whitelist_file(),
        "config_loaded"
    );

    let whitelist = load_whitelist(config.whitelist_file())?;
    let metrics = Arc::new(Metrics::new());
    let facility = Facility::start(&config, &whitelist, metrics.clone())?;
    let status = StatusWriter::new(config.status_file());

    let mut interval = tokio::time::interval(Duration::from_secs(config.metrics_interval_secs().max(1)));
    // First tick completes immediately
    interval.tick().await;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                metrics.report().log();
                if let Err(e) = status.append(&facility.snapshot()) {
                    warn!(error = %e, "status_write_failed");
                }
            }
            _ = &mut ctrl_c => {
                info!("shutdown_signal_received");
                break;
            }
        }
    }

    if let Err(e) = status.append(&facility.snapshot()) {
        warn!(error = %e, "status_write_failed");
    }

    // Joining actor threads blocks
    let revenue = tokio::task::spawn_blocking(move || facility.shutdown()).await?;
    metrics.report().log();

    info!(revenue = %revenue, "parking-manager shutdown complete");
    Ok(())
}
