//! Solarlink - Main Entry Point
//!
//! Thin CLI collaborator around the acquisition engine: loads configuration,
//! starts background polling and reports status until shutdown. The
//! `export` subcommand dumps stored history without touching the gateway.
//!
//! ```bash
//! # Start with the default configuration file
//! cargo run --bin solarlink
//!
//! # Custom configuration and log level
//! RUST_LOG=debug cargo run --bin solarlink -- --config my_config.yaml
//!
//! # Export the last week of history
//! cargo run --bin solarlink -- export --output week.csv --days 7
//! ```
//!
//! Exit codes: 0 on normal shutdown, 1 on configuration or protocol errors.

use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use dotenv::dotenv;
use tracing::{error, info};

use solarlink::{InverterDevice, Settings, SqliteStore};

#[derive(Parser)]
#[command(
    name = "solarlink",
    version = env!("CARGO_PKG_VERSION"),
    about = "Acquisition engine for cloud-gatewayed PV inverters",
    long_about = "Polls a photovoltaic inverter through an HTTP gateway tunnelling \
                  Modbus-RTU frames, retains samples in memory and SQLite, and \
                  accepts export-power write commands."
)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "config/solarlink.yaml")]
    config: String,

    /// Print a status summary every N seconds (0 disables)
    #[arg(long, default_value_t = 60)]
    status_interval: u64,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the acquisition loop (default)
    Run,
    /// Export stored history and exit
    Export {
        /// Output file path
        #[arg(short, long, default_value = "export.csv")]
        output: String,

        /// Export file format
        #[arg(long, value_enum, default_value_t = FormatArg::Csv)]
        format: FormatArg,

        /// How many days back to export
        #[arg(long, default_value_t = 7)]
        days: u32,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Csv,
    Json,
}

fn print_banner() {
    println!("╔══════════════════════════════════════╗");
    println!("║  solarlink {:<26}║", env!("CARGO_PKG_VERSION"));
    println!("║  PV inverter acquisition engine      ║");
    println!("╚══════════════════════════════════════╝");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args = Args::parse();

    let settings = Settings::load(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config))?;

    solarlink::logging::init(&settings.logging.level)
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    match args.command {
        Some(Command::Export {
            output,
            format,
            days,
        }) => export_history(&settings, &output, format, days).await,
        Some(Command::Run) | None => run_acquisition(&args, settings).await,
    }
}

async fn run_acquisition(args: &Args, settings: Settings) -> anyhow::Result<()> {
    print_banner();
    info!("Configuration loaded from {}", args.config);

    let device = InverterDevice::new(settings).await?;
    device
        .start_acquisition()
        .await
        .context("starting acquisition")?;

    if args.status_interval > 0 {
        let status_interval = Duration::from_secs(args.status_interval);
        tokio::select! {
            _ = solarlink::wait_for_shutdown() => {},
            _ = async {
                loop {
                    tokio::time::sleep(status_interval).await;
                    let status = device.system_status().await;
                    info!(
                        "Status: polls {} ok / {} failed, requests {} ok / {} failed, {} samples retained",
                        status.acquisition.successful_polls,
                        status.acquisition.failed_polls,
                        status.communication.successful_requests,
                        status.communication.failed_requests,
                        status.storage.memory.total_samples,
                    );
                }
            } => {},
        }
    } else {
        solarlink::wait_for_shutdown().await;
    }

    info!("Shutdown signal received");
    device.shutdown().await;

    let status = device.system_status().await;
    if status.acquisition.total_polls > 0 {
        info!(
            "Final statistics: {}/{} polls successful ({:.1}%)",
            status.acquisition.successful_polls,
            status.acquisition.total_polls,
            status.acquisition.success_rate() * 100.0
        );
    }

    if let Some(last_error) = status.acquisition.last_error {
        error!("Last acquisition error: {last_error}");
    }

    Ok(())
}

async fn export_history(
    settings: &Settings,
    output: &str,
    format: FormatArg,
    days: u32,
) -> anyhow::Result<()> {
    let store = SqliteStore::open(&settings.storage.database_path)
        .await
        .with_context(|| {
            format!(
                "opening durable store at {}",
                settings.storage.database_path
            )
        })?;

    let end = Utc::now();
    let start = end - chrono::Duration::days(i64::from(days));

    let exported = match format {
        FormatArg::Csv => store.export_csv(output, &[], start, end).await?,
        FormatArg::Json => store.export_json(output, &[], start, end).await?,
    };

    println!("Exported {exported} samples from the last {days} days to {output}");
    Ok(())
}
