//! # TAMDL
//!
//! Host runtime of the TAMDL field data logger control core.
//!
//! Drives [`Tamdl`] from a tokio event loop: a one-second RTC tick, the
//! RFID reader UART and a periodic service call. Hardware lines are
//! simulated; calibration data lives in a file.

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use tamdl::config::{Config, RfidConfig};
use tamdl::control::Rail;
use tamdl::events::{EventSink, TracingSink};
use tamdl::hal::sim::{FileStorage, SimBattery, SimBoard};
use tamdl::serial::RfidSerial;
use tamdl::system::Tamdl;
use tamdl::telemetry::JsonlEventLog;

/// Configuration file used when none is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/tamdl.toml";

/// RTC tick period
const RTC_PERIOD: Duration = Duration::from_secs(1);

/// Main loop service period
const SERVICE_PERIOD: Duration = Duration::from_millis(100);

fn init_tracing(log_dir: &str) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(false);

    if log_dir.is_empty() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stdout_layer)
            .init();
        return Ok(None);
    }

    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "tamdl.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = fmt::layer().with_writer(file_writer).with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Ok(Some(guard))
}

fn event_sink(config: &Config) -> Result<Box<dyn EventSink>> {
    if config.logging.dir.is_empty() {
        return Ok(Box::new(TracingSink));
    }
    let log = JsonlEventLog::open(&config.logging)
        .with_context(|| format!("Failed to open event log in {}", config.logging.dir))?;
    Ok(Box::new((TracingSink, log)))
}

/// Forwards reader bytes to the main loop until the port closes
fn spawn_reader(rfid: &RfidConfig, tx: mpsc::UnboundedSender<u8>) {
    let Some(kind) = rfid.kind else {
        return;
    };
    if rfid.port.is_empty() {
        warn!("No RFID port configured, reader input disabled");
        return;
    }

    let path = rfid.port.clone();
    tokio::spawn(async move {
        let mut serial = match RfidSerial::open(&path, kind) {
            Ok(serial) => serial,
            Err(e) => {
                warn!("RFID reader unavailable: {}", e);
                return;
            }
        };
        match serial.run(|byte| {
            let _ = tx.send(byte);
        }).await {
            Ok(n) => info!("RFID port {} closed after {} bytes", serial.device_path(), n),
            Err(e) => warn!("RFID port {} failed: {}", serial.device_path(), e),
        }
    });
}

/// Main entry point
///
/// # Control Flow
///
/// 1. Load configuration (first argument or `config/tamdl.toml`)
/// 2. Set up console and file logging
/// 3. Build the control core on simulated hardware and apply the configuration
/// 4. Run RTC ticks, UART bytes and service calls until Ctrl+C
/// 5. Switch all outputs off and exit
///
/// # Errors
///
/// Returns error if the configuration cannot be loaded or the core cannot
/// be created
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = if Path::new(&config_path).exists() {
        Config::load(&config_path).with_context(|| format!("Failed to load {}", config_path))?
    } else {
        Config::default()
    };

    let _guard = init_tracing(&config.logging.dir)?;
    info!("TAMDL v{} starting...", env!("CARGO_PKG_VERSION"));
    if !Path::new(&config_path).exists() {
        warn!("{} not found, using defaults", config_path);
    }

    let board = SimBoard::new();
    let hw = board.hardware(
        Box::new(FileStorage::new(&config.storage.calibration_file)),
        Some(Box::new(SimBattery::default())),
    );
    let start = chrono::Local::now().naive_local();
    let mut core = Tamdl::new(hw, event_sink(&config)?, start)?;
    core.apply_config(&config);

    let (tx, mut rx) = mpsc::unbounded_channel();
    spawn_reader(&config.rfid, tx);

    let mut rtc = interval(RTC_PERIOD);
    rtc.set_missed_tick_behavior(MissedTickBehavior::Burst);
    let mut service = interval(SERVICE_PERIOD);
    service.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("Press Ctrl+C to exit");

    loop {
        tokio::select! {
            _ = rtc.tick() => core.rtc_tick(),

            _ = service.tick() => core.service(Instant::now()),

            Some(byte) = rx.recv() => core.uart_rx(byte),

            _ = &mut shutdown => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    core.shutdown();
    for rail in Rail::ALL {
        debug!("{} output at exit: {}", rail, if board.rail(rail) { "on" } else { "off" });
    }

    Ok(())
}
