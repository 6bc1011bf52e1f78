//! # Servo Rig
//!
//! Drive RC servos from a steering wheel or virtual wheel over a serial
//! microcontroller link.
//!
//! Usage: `servo-rig [config.toml]`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use servo_rig::config::{Config, LoggingConfig};
use servo_rig::console::{Command, Console};
use servo_rig::controller::aggregator::{InputAggregator, InputSource};
use servo_rig::controller::evdev_source::EvdevDiscovery;
use servo_rig::controller::virtual_wheel::VirtualController;
use servo_rig::display;
use servo_rig::mapping::MappingSet;
use servo_rig::poll::{PollLoop, PollShared};
use servo_rig::serial::{DeviceLink, LinkTimings};
use servo_rig::telemetry::TelemetryLogger;

/// Poll snapshots buffered for the console before ticks are dropped
const SNAPSHOT_CHANNEL_CAPACITY: usize = 8;

/// Number of ticks between status log messages
const STATUS_LOG_INTERVAL_TICKS: u64 = 200;

/// Main entry point for Servo Rig
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration (first argument, or built-in defaults)
///    - Set up logging with tracing subscriber
///    - Enumerate external controllers
///    - Spawn the poll loop
///
/// 2. **Main Loop**
///    - Read console commands from stdin
///    - Consume poll snapshots for telemetry and status logging
///    - Handle Ctrl+C for graceful shutdown
///
/// 3. **Graceful Shutdown**
///    - Stop the poll loop, which closes the serial link
///    - Log total tick count
///
/// # Errors
///
/// Returns error if the configuration cannot be loaded or the telemetry
/// directory cannot be created.
#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config(std::env::args().nth(1))?;
    let _log_guard = init_logging(&config.logging);

    info!("Servo Rig v{} starting...", env!("CARGO_PKG_VERSION"));

    let virtual_controller =
        VirtualController::with_models(config.wheel.to_model(), config.throttle.to_model());
    let mut aggregator = InputAggregator::new(virtual_controller, Box::new(EvdevDiscovery::default()));
    aggregator.refresh();

    let aggregator = Arc::new(Mutex::new(aggregator));
    let link = Arc::new(tokio::sync::Mutex::new(DeviceLink::with_serial(LinkTimings::from(
        &config.serial,
    ))));
    let (mappings_tx, mappings_rx) = watch::channel(Arc::new(MappingSet::new()));
    let (selected_tx, selected_rx) = watch::channel(InputSource::Virtual);
    let running = Arc::new(AtomicBool::new(true));

    let mut telemetry = if config.telemetry.enabled {
        Some(TelemetryLogger::from_config(&config.telemetry).context("Failed to start telemetry")?)
    } else {
        None
    };

    let (snapshot_tx, mut snapshot_rx) = mpsc::channel(SNAPSHOT_CHANNEL_CAPACITY);
    let poll_loop = PollLoop::new(
        Duration::from_millis(config.poll.interval_ms),
        PollShared {
            aggregator: Arc::clone(&aggregator),
            link: Arc::clone(&link),
            mappings: mappings_rx,
            selected: selected_rx,
            running: Arc::clone(&running),
        },
        snapshot_tx,
    );
    let poll_handle = tokio::spawn(poll_loop.run());

    let console = Console::new(
        aggregator,
        link,
        mappings_tx,
        selected_tx,
        config.serial.port.clone(),
        config.serial.baud_rate,
    );

    println!("Type 'help' for commands, 'quit' to exit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match line.parse::<Command>() {
                            Ok(Command::Quit) => break,
                            Ok(command) => match console.execute(command).await {
                                Ok(output) => output.iter().for_each(|l| println!("{}", l)),
                                Err(e) => println!("Error: {}", e),
                            },
                            Err(e) => println!("Error: {}", e),
                        }
                    }
                    Ok(None) => {
                        debug!("stdin closed");
                        break;
                    }
                    Err(e) => {
                        error!("Failed to read stdin: {}", e);
                        break;
                    }
                }
            }

            Some(snapshot) = snapshot_rx.recv() => {
                if let Some(logger) = telemetry.as_mut() {
                    if let Err(e) = logger.log_snapshot(&snapshot, Instant::now()) {
                        warn!("Telemetry disabled after write failure: {}", e);
                        telemetry = None;
                    }
                }
                if snapshot.tick % STATUS_LOG_INTERVAL_TICKS == 0 {
                    debug!("{}", display::status_line(&snapshot.link));
                }
            }

            // Handle Ctrl+C for graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    running.store(false, Ordering::SeqCst);
    match poll_handle.await {
        Ok(ticks) => info!("Total poll ticks: {}", ticks),
        Err(e) => error!("Poll loop ended abnormally: {}", e),
    }

    Ok(())
}

/// Loads the configuration file at `path`, or the defaults when no path is
/// given.
fn load_config(path: Option<String>) -> Result<Config> {
    match path {
        Some(path) => {
            Config::load(&path).with_context(|| format!("Failed to load configuration from {}", path))
        }
        None => Ok(Config::default()),
    }
}

/// Console logging, plus a daily rolling file when `file_dir` is set.
///
/// The returned guard flushes the file writer when dropped.
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    let console_layer = fmt::layer();

    match &config.file_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "servo-rig.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(console_layer)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(console_layer)
                .init();
            None
        }
    }
}
