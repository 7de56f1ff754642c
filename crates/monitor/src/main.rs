//! gc2-monitor
//!
//! Command-line host for the GC2 launch monitor driver. Connects to the
//! device, prints shot, status, connection and error events to stdout and
//! reconnects when the device comes back after being unplugged.

mod config;
mod output;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use common::setup_logging;
use config::{MonitorConfig, SessionSettings};
use device::{Gc2Driver, NotificationSink};
use output::EventPrinter;
use std::sync::Arc;
use tokio::signal;
use tokio::task;
use tokio::time::{self, MissedTickBehavior};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "gc2-monitor")]
#[command(author, version, about = "GC2 launch monitor - stream shot data from USB")]
#[command(long_about = "
Connects to a GC2 launch monitor over USB and prints every event it reports:
shots (early and final readings), device status pulses, connection changes
and errors.

EXAMPLES:
    # Stream events as JSON lines
    gc2-monitor

    # Human-readable output
    gc2-monitor --format text

    # Only print the final (spin-bearing) reading of each shot
    gc2-monitor --final-only

    # Check whether a GC2 is plugged in
    gc2-monitor --check

CONFIGURATION:
    The monitor looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/gc2-monitor/monitor.toml
    3. /etc/gc2-monitor/monitor.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Report whether a GC2 is on the bus and exit (status 1 if not)
    #[arg(long)]
    check: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Output format (json, text)
    #[arg(short, long, value_name = "FORMAT")]
    format: Option<config::OutputFormat>,

    /// Only print final shot readings
    #[arg(long)]
    final_only: bool,

    /// Exit when the session ends instead of waiting for the device
    #[arg(long)]
    no_reconnect: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = MonitorConfig::default();
        let path = MonitorConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let mut config = if let Some(ref path) = args.config {
        MonitorConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        MonitorConfig::load_or_default()
    };

    if let Some(format) = args.format {
        config.output.format = format;
    }
    if args.final_only {
        config.output.final_readings_only = true;
    }
    if args.no_reconnect {
        config.session.auto_reconnect = false;
    }

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.logging.level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("gc2-monitor v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    let printer: Arc<dyn NotificationSink> =
        Arc::new(EventPrinter::stdout(config.output.clone()));
    let driver = Gc2Driver::initialize_with(Some(printer), config.session.driver_options())
        .context("Failed to initialize GC2 driver")?;

    if args.check {
        let available = driver.is_device_available();
        println!("GC2 {}", if available { "available" } else { "not found" });
        driver.shutdown();
        std::process::exit(if available { 0 } else { 1 });
    }

    let driver = Arc::new(driver);
    let result = run(Arc::clone(&driver), &config.session).await;

    info!("Shutting down...");
    match Arc::try_unwrap(driver) {
        Ok(driver) => task::spawn_blocking(move || driver.shutdown())
            .await
            .context("Driver shutdown task failed")?,
        Err(_) => warn!("Driver still referenced at exit, relying on drop"),
    }

    result
}

/// Keep a session alive until Ctrl+C
async fn run(driver: Arc<Gc2Driver>, settings: &SessionSettings) -> Result<()> {
    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut ticker = time::interval(settings.reconnect_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut was_connected = false;
    let mut waiting_logged = false;

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result.context("Failed to listen for Ctrl+C")?;
                info!("Received Ctrl+C");
                return Ok(());
            }
            _ = ticker.tick() => {
                if driver.is_connected() {
                    continue;
                }

                if was_connected {
                    was_connected = false;
                    info!("GC2 session ended");
                    if !settings.auto_reconnect {
                        return Ok(());
                    }
                }

                let probe = Arc::clone(&driver);
                let available = task::spawn_blocking(move || probe.is_device_available())
                    .await
                    .context("Availability check failed")?;
                if !available && settings.auto_reconnect {
                    if !waiting_logged {
                        info!("Waiting for GC2 to be plugged in");
                        waiting_logged = true;
                    }
                    continue;
                }
                waiting_logged = false;

                let session = Arc::clone(&driver);
                let connected = task::spawn_blocking(move || session.connect())
                    .await
                    .context("Connect task failed")?;

                if connected {
                    was_connected = true;
                    info!(
                        "Streaming from GC2 (serial: {}, firmware: {})",
                        driver.device_serial().as_deref().unwrap_or("unknown"),
                        driver.firmware_version().as_deref().unwrap_or("unknown")
                    );
                } else if !settings.auto_reconnect {
                    return Err(anyhow!("Could not connect to GC2"));
                }
            }
        }
    }
}
