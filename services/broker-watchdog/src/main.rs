//! Broker watchdog CLI
//!
//! Command-line interface for the broker endpoint, order and stream watchdogs.

use std::path::PathBuf;

use broker_watchdog::{load_config, Config};
use clap::Parser;
use tracing::Level;

#[derive(Parser)]
#[command(name = "broker-watchdog")]
#[command(about = "Heartbeat watchdogs for a broker API session")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print every new log entry to stdout (overrides config file)
    #[arg(long)]
    print: bool,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: Level,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();

    tracing::debug!(
        "Parsed command line arguments: config={:?}, print={}, log_level={:?}",
        args.config,
        args.print,
        args.log_level
    );

    let mut config = if let Some(config_path) = &args.config {
        tracing::debug!("Loading configuration from {:?}", config_path);
        load_config(config_path)?
    } else {
        tracing::debug!("Using default configuration");
        Config::default()
    };

    config.resolve_secrets()?;

    if args.print {
        config.errors.print = true;
        config.orders.print = true;
        config.streams.monitor.print = true;
    }

    tracing::info!("Starting broker watchdog");
    tracing::debug!("Endpoints: {}", config.endpoints.len());

    broker_watchdog::run(config).await?;

    Ok(())
}
