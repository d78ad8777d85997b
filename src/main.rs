//! # Wheel DAC Bridge
//!
//! Drive an RC transmitter's steering and throttle DACs from a racing wheel.
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Load and validate the configuration (first argument, default
//!      `config/default.toml`)
//!    - Set up logging (console, plus daily files when `[logging] log_dir` is set)
//!    - Open the wheel and the I2C bus
//!
//! 2. **Main Loop**
//!    - Center both DACs, then run the control loop at `update_hz`
//!    - Optionally record status snapshots as JSONL
//!
//! 3. **Graceful Shutdown**
//!    - Ctrl+C or SIGTERM stops the loop
//!    - DACs are re-centered, the wheel released and the bus closed
//!
//! ```bash
//! cargo run --release -- config/default.toml
//! ```

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use wheel_dac_bridge::bridge::Bridge;
use wheel_dac_bridge::config::{Config, LoggingConfig};
use wheel_dac_bridge::controller::wheel::WheelDevice;
use wheel_dac_bridge::output;
use wheel_dac_bridge::telemetry::logger::run_status_logger;

/// Configuration used when no path is given
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Prefix of the daily diagnostic log files
const LOG_FILE_PREFIX: &str = "wheel-dac-bridge.log";

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    let _log_guard = init_logging(&config.logging);
    for warning in config.warnings() {
        warn!("{}", warning);
    }

    info!("Wheel DAC Bridge v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from {}", config_path);

    let wheel = WheelDevice::open(&config.input).context("Failed to open racing wheel")?;
    info!("Wheel opened at: {}", wheel.device_path());

    let bus_path = config.bus_device_path();
    let dacs = output::open_linux(&bus_path, config.bus.steering_addr, config.bus.throttle_addr)
        .with_context(|| format!("Failed to open I2C bus {}", bus_path))?;

    let telemetry = config.telemetry.clone();
    let (bridge, handle) = Bridge::new(config, wheel, dacs);

    let telemetry_task = if telemetry.enabled {
        let status = handle.status.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = run_status_logger(telemetry, status).await {
                error!("Telemetry logger failed: {}", e);
            }
        }))
    } else {
        None
    };

    info!("Press Ctrl+C to exit");
    let result = bridge.run(shutdown_signal()).await;

    // The status sender is gone once the bridge returns, which ends the logger
    if let Some(task) = telemetry_task {
        if let Err(e) = task.await {
            warn!("Telemetry task ended abnormally: {}", e);
        }
    }

    let status = handle.status.borrow().clone();
    info!(
        "Shutdown complete after {} ticks ({} write failures, {} fallback writes)",
        status.tick_count, status.write_failures, status.fallback_writes
    );

    result.context("Control loop stopped with an error")
}

/// Installs the console layer and, if configured, a daily rolling file layer.
///
/// The returned guard must live until exit so buffered file output is flushed.
fn init_logging(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    let console = tracing_subscriber::fmt::layer();

    if logging.log_dir.is_empty() {
        tracing_subscriber::registry().with(filter).with(console).init();
        return None;
    }

    let appender = tracing_appender::rolling::daily(&logging.log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file = tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer);

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();
    Some(guard)
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => Some(stream),
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            None
        }
    };

    let sigterm = async {
        match terminate.as_mut() {
            Some(stream) => {
                stream.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
            info!("Received Ctrl+C, shutting down...");
        }
        _ = sigterm => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
