//! # DDL Ground
//!
//! Operator console for the ground station.
//!
//! Reads operator commands from stdin, prints received lines and status
//! events, and logs every flight to CSV plus a raw archive.
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Load `config/ground.toml` (defaults if absent)
//!    - Set up logging to stderr and a daily `ground.log`
//!    - Build the pipeline and register console subscribers
//!    - Optionally connect or start dummy mode from the command line
//!
//! 2. **Main Loop**
//!    - Parse each stdin line as an operator command
//!    - Handle Ctrl+C for graceful shutdown
//!
//! 3. **Graceful Shutdown**
//!    - Stop the ingestion task and playback
//!    - Flush and close both logs
//!
//! # Examples
//!
//! ```bash
//! cargo run --release -- --port /dev/ttyUSB0 --baud 115200
//! cargo run --release -- --dummy
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use ddl_ground::config::Config;
use ddl_ground::dispatch::{ChannelSubscriber, Dispatcher, Event};
use ddl_ground::link::ConnectionController;
use ddl_ground::pipeline::Pipeline;
use ddl_ground::serial::TokioSerialOpener;
use ddl_ground::telemetry::{Field, TelemetryRecord};
use ddl_ground::uplink::operator::{self, OperatorCommand};

/// Default configuration file location
const DEFAULT_CONFIG_PATH: &str = "config/ground.toml";

/// Seconds between flight summaries from the display task
const SUMMARY_INTERVAL_SECS: u64 = 10;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "ddl-ground", version, about = "Ground-station telemetry console")]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Connect to this serial port at startup
    #[arg(short, long)]
    port: Option<String>,

    /// Baud label from the configuration (defaults to `bauds_default`)
    #[arg(short, long)]
    baud: Option<String>,

    /// Start in dummy mode instead of connecting
    #[arg(long, conflicts_with = "port")]
    dummy: bool,

    /// List serial ports and exit
    #[arg(long)]
    list_ports: bool,
}

fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        Config::load(path).with_context(|| format!("Failed to load {}", path.display()))
    } else {
        Ok(Config::default())
    }
}

/// Stderr plus a daily-rolling `ground.log` in the logs folder
fn init_logging(config: &Config) -> tracing_appender::non_blocking::WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(&config.application.logs_folder, "ground.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    guard
}

/// Terminal echo: every line, status change and sent command
fn register_console(dispatcher: &Dispatcher) {
    dispatcher.subscribe_fn("console", |event: &Event| {
        match event {
            Event::Raw(line) => println!("{}", line),
            Event::Sent(command) => println!("[SENT]: {}", command),
            Event::Status(message) => println!("[STATUS]: {}", message),
            Event::Unplugged => println!("[CONNECTION]: UNPLUGGED"),
            Event::Relinked => println!("[CONNECTION]: RELINKED"),
            Event::Telemetry(_) => {}
        }
        Ok(())
    });
}

/// Per-record label line: counters and command echo
fn register_labels(dispatcher: &Dispatcher, pipeline: Arc<Pipeline>) {
    dispatcher.subscribe_fn("labels", move |event: &Event| {
        if let Event::Telemetry(record) = event {
            let stats = pipeline.stats();
            println!(
                "[PACKET {}] [RECEIVED: {}] [LOST: {}] [STATE: {}] [CMD ECHO: {}]",
                record.packet_count_raw(),
                stats.received,
                stats.lost,
                record.state(),
                record.cmd_echo()
            );
        }
        Ok(())
    });
}

/// Display task fed over a bounded queue
async fn run_display(mut events: mpsc::Receiver<Event>) {
    let mut latest: Option<Arc<TelemetryRecord>> = None;
    let mut max_altitude = f64::MIN;
    let mut ticker = tokio::time::interval(Duration::from_secs(SUMMARY_INTERVAL_SECS));
    ticker.tick().await;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(Event::Telemetry(record)) => {
                    max_altitude = max_altitude.max(record.number(Field::Altitude));
                    latest = Some(record);
                }
                Some(_) => {}
                None => return,
            },
            _ = ticker.tick() => {
                if let Some(record) = latest.as_ref() {
                    println!(
                        "[FLIGHT] alt {:.1} m (max {:.1}) | temp {:.1} C | {:.5}, {:.5} | sats {}",
                        record.number(Field::Altitude),
                        max_altitude,
                        record.number(Field::Temperature),
                        record.number(Field::GpsLatitude),
                        record.number(Field::GpsLongitude),
                        record.gps_sats()
                    );
                }
            }
        }
    }
}

fn open_folder(path: &Path) -> std::io::Result<()> {
    let opener = if cfg!(target_os = "windows") {
        "explorer"
    } else if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    };
    std::process::Command::new(opener).arg(path).spawn().map(|_| ())
}

async fn connect(controller: &ConnectionController, port: Option<String>, baud: Option<String>) {
    let config = controller.config();
    let port = port.unwrap_or_else(|| config.connection.port.clone());
    let rate = match baud {
        None => config.default_baud(),
        Some(label) => match config.baud_for(&label) {
            Some(rate) => rate,
            None => {
                let labels: Vec<&str> = config.connection.bauds.keys().map(String::as_str).collect();
                println!("(!) Unknown baud '{}'; configured: {}", label, labels.join(", "));
                return;
            }
        },
    };
    if let Err(e) = controller.connect(&port, rate).await {
        println!("(!) {}", e);
    }
}

/// Run one operator command; returns the text to print, if any
async fn handle(controller: &ConnectionController, config_path: &Path, command: OperatorCommand) -> Option<String> {
    let config = controller.config();
    let outcome: ddl_ground::error::Result<()> = match command {
        OperatorCommand::Help => {
            return Some(operator::help_lines(&config.application.command_prefix).join("\n"));
        }
        OperatorCommand::Status => return Some(controller.status().to_string()),
        OperatorCommand::Ports => {
            let ports = controller.available_ports();
            return Some(if ports.is_empty() {
                "No serial ports found".to_string()
            } else {
                ports.join("\n")
            });
        }
        OperatorCommand::OpenArchiveFolder => {
            let folder = PathBuf::from(&config.application.logs_folder);
            return open_folder(&folder)
                .err()
                .map(|e| format!("(!) Cannot open {}: {}", folder.display(), e));
        }
        OperatorCommand::Reload => match load_config(config_path) {
            Ok(fresh) => controller.reload(Arc::new(fresh)).await,
            Err(e) => return Some(format!("(!) {:#}", e)),
        },
        OperatorCommand::Connect { port, baud } => {
            connect(controller, port, baud).await;
            Ok(())
        }
        OperatorCommand::Disconnect => controller.disconnect().await,
        OperatorCommand::Clear => controller.clear_runtime(),
        OperatorCommand::DummyOn => controller.enable_dummy().await,
        OperatorCommand::DummyOff => controller.disable_dummy().await,
        OperatorCommand::DummyTime(secs) => match Duration::try_from_secs_f64(secs) {
            Ok(period) => controller.set_dummy_interval(period).await,
            Err(e) => return Some(format!("(!) Invalid interval {}: {}", secs, e)),
        },
        OperatorCommand::Record(enabled) => controller.set_recording(enabled),
        OperatorCommand::SimPlay => controller.sim_play().await.map(|_| ()),
        OperatorCommand::SimStop => {
            controller.sim_stop().await;
            Ok(())
        }
        OperatorCommand::Uplink(intent) => controller.send(&intent).await.map(|_| ()),
        OperatorCommand::Raw(text) => controller.send_raw(&text).await.map(|_| ()),
    };
    outcome.err().map(|e| format!("(!) {}", e))
}

/// Main entry point for the ground station console
///
/// # Errors
///
/// Returns error if:
/// - The configuration file exists but is invalid
/// - The logs folder cannot be created
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Arc::new(load_config(&cli.config)?);
    let _log_guard = init_logging(&config);

    info!("DDL Ground v{} starting...", env!("CARGO_PKG_VERSION"));

    if cli.list_ports {
        for port in ddl_ground::serial::available_ports() {
            println!("{}", port);
        }
        return Ok(());
    }

    let dispatcher = Arc::new(Dispatcher::new());
    let pipeline = Arc::new(Pipeline::new(&config, Arc::clone(&dispatcher)).context("Startup failed")?);

    register_console(&dispatcher);
    register_labels(&dispatcher, Arc::clone(&pipeline));
    let (display, display_rx) = ChannelSubscriber::new("display", config.dispatch.channel_capacity);
    dispatcher.subscribe(Arc::new(display));
    let display_task = tokio::spawn(run_display(display_rx));

    let controller = ConnectionController::new(Arc::clone(&config), Arc::new(TokioSerialOpener), pipeline);

    if cli.dummy {
        if let Err(e) = controller.enable_dummy().await {
            warn!("Dummy mode not started: {}", e);
        }
    } else if cli.port.is_some() {
        connect(&controller, cli.port.clone(), cli.baud.clone()).await;
    }

    let prefix = config.application.command_prefix.clone();
    println!("Type {}help for commands, Ctrl+C to exit", prefix);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("stdin closed: {}", e);
                        break;
                    }
                };
                let prefix = controller.config().application.command_prefix.clone();
                match operator::parse(&line, &prefix) {
                    None => {}
                    Some(Err(usage)) => println!("{}", usage),
                    Some(Ok(command)) => {
                        if let Some(output) = handle(&controller, &cli.config, command).await {
                            println!("{}", output);
                        }
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    controller.shutdown().await;
    let stats = controller.stats();
    info!("Session totals: received {}, lost {}", stats.received, stats.lost);

    display_task.abort();
    Ok(())
}
