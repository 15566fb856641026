//! CLI for the wattlog power telemetry log.
//!
//! Provides commands for inspecting and appending to a log file, and for
//! running the full sampling pipeline against a simulated sensor.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use prost::Message;
use prost::bytes::Bytes;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::EnvFilter;

use wattlog::config::DEFAULT_MAX_LOG_SIZE;
use wattlog::proto::status_message::Payload;
use wattlog::telemetry::sample_loop;
use wattlog::{
    BroadcastSink, Clock, DiskFs, Filesystem, LogConfig, LogRecord, LogStore, PowerReading,
    Publisher, Sensor, SystemClock, Telemetry, TelemetryConfig, proto,
};

/// wattlog — Power monitor telemetry log CLI.
#[derive(Parser)]
#[command(name = "wattlog", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Display log size, capacity, and a summary of the stored readings.
    Info {
        /// Path to the log file.
        log_path: PathBuf,

        /// Capacity ceiling in bytes.
        #[arg(long, default_value_t = DEFAULT_MAX_LOG_SIZE)]
        max_size: u64,
    },

    /// Print the newest records.
    Tail {
        /// Path to the log file.
        log_path: PathBuf,

        /// Number of records to print.
        #[arg(short = 'n', long, default_value = "10")]
        count: usize,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },

    /// Append one reading, rotating the log if it is full.
    Append {
        /// Path to the log file.
        log_path: PathBuf,

        /// Bus voltage in volts.
        voltage: f32,

        /// Load current in amperes.
        current: f32,

        /// Power in watts (defaults to voltage × current).
        #[arg(long)]
        power: Option<f32>,

        /// Timestamp in Unix seconds (defaults to now).
        #[arg(long)]
        timestamp: Option<u32>,

        /// Capacity ceiling in bytes.
        #[arg(long, default_value_t = DEFAULT_MAX_LOG_SIZE)]
        max_size: u64,
    },

    /// Sample a simulated sensor, logging and streaming every reading.
    Run {
        /// Path to the log file (overrides the config file).
        log_path: Option<PathBuf>,

        /// JSON configuration file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Number of ticks to run (runs forever if omitted).
        #[arg(long)]
        ticks: Option<u64>,

        /// Sampling interval in milliseconds (overrides the config file).
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Capacity ceiling in bytes (overrides the config file).
        #[arg(long)]
        max_size: Option<u64>,
    },
}

/// Output format for records.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// The log's own CSV format.
    Csv,
    /// JSON array of objects.
    Json,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Info { log_path, max_size } => cmd_info(&log_path, max_size),
        Commands::Tail {
            log_path,
            count,
            format,
        } => cmd_tail(&log_path, count, &format),
        Commands::Append {
            log_path,
            voltage,
            current,
            power,
            timestamp,
            max_size,
        } => cmd_append(log_path, voltage, current, power, timestamp, max_size),
        Commands::Run {
            log_path,
            config,
            ticks,
            interval_ms,
            max_size,
        } => cmd_run(log_path, config.as_deref(), ticks, interval_ms, max_size),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Opens an existing log without creating it.
fn open_existing(log_path: &Path, max_size: u64) -> Result<LogStore, Box<dyn std::error::Error>> {
    if !log_path.is_file() {
        return Err(format!("No log found at '{}'", log_path.display()).into());
    }
    let config = LogConfig::new(log_path).with_max_size(max_size);
    Ok(LogStore::new(config, DiskFs)?)
}

/// Implements `wattlog info <log_path>`.
#[allow(clippy::cast_precision_loss)] // Percentages are display-only
fn cmd_info(log_path: &Path, max_size: u64) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_existing(log_path, max_size)?;
    let summary = store.summary()?;

    println!("Log: {}", log_path.display());
    println!();
    println!(
        "  Size:     {} of {} ({:.1}%)",
        format_bytes(summary.size),
        format_bytes(summary.capacity),
        summary.size as f64 / summary.capacity as f64 * 100.0
    );
    println!("  Records:  {}", summary.records);

    if let (Some(first), Some(last)) = (summary.first_timestamp, summary.last_timestamp) {
        println!("  Span:     {first} .. {last} ({})", format_span(last.saturating_sub(first)));
    }
    if let (Some(min), Some(max), Some(mean)) =
        (summary.min_power, summary.max_power, summary.mean_power)
    {
        println!("  Power:    min={min:.3} W, max={max:.3} W, mean={mean:.3} W");
    }

    Ok(())
}

/// Implements `wattlog tail <log_path>`.
fn cmd_tail(
    log_path: &Path,
    count: usize,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_existing(log_path, DEFAULT_MAX_LOG_SIZE)?;

    match format {
        OutputFormat::Csv => print!("{}", tail_csv(&store, count)?),
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&store.tail(count)?)?);
        }
    }

    Ok(())
}

/// Renders the last `count` rows under the header the file carries.
fn tail_csv<F: Filesystem>(
    store: &LogStore<F>,
    count: usize,
) -> Result<String, Box<dyn std::error::Error>> {
    let mut out = store.header()?;
    for record in store.tail(count)? {
        out.push_str(record.format_line()?.as_str());
    }
    Ok(out)
}

/// Implements `wattlog append <log_path> <voltage> <current>`.
fn cmd_append(
    log_path: PathBuf,
    voltage: f32,
    current: f32,
    power: Option<f32>,
    timestamp: Option<u32>,
    max_size: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let timestamp = match timestamp {
        Some(ts) => ts,
        None => u32::try_from(SystemClock::new().wall_ms() / 1000)?,
    };
    let record = LogRecord::new(timestamp, voltage, current, power.unwrap_or(voltage * current));

    let config = LogConfig::new(log_path).with_max_size(max_size);
    let mut store = LogStore::open_disk(config)?;
    let outcome = store.append(&record)?;

    print!("{}", record.format_line()?.as_str());
    if outcome.rotated() {
        println!("Log rotated, now {}", format_bytes(outcome.size()));
    }

    Ok(())
}

/// Implements `wattlog run`.
fn cmd_run(
    log_path: Option<PathBuf>,
    config_path: Option<&Path>,
    ticks: Option<u64>,
    interval_ms: Option<u64>,
    max_size: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match config_path {
        Some(path) => TelemetryConfig::load(path)?,
        None => TelemetryConfig::default(),
    };
    if let Some(path) = log_path {
        config.log.path = path;
    }
    if let Some(max_size) = max_size {
        config.log.max_size = max_size;
    }
    if let Some(interval_ms) = interval_ms {
        config.sample_interval_ms = interval_ms;
    }
    config.validate()?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let sink = BroadcastSink::default();
        let printer = tokio::spawn(print_messages(sink.subscribe()));

        let publisher = Publisher::new(sink);
        let mut telemetry = Telemetry::start(config.log.clone(), DiskFs, publisher);
        let mut sensor = SimulatedSensor::default();

        sample_loop(&mut telemetry, &mut sensor, config.sample_interval(), ticks).await;

        // Dropping the last sender closes the channel and ends the printer.
        drop(telemetry);
        printer.await
    })?;

    Ok(())
}

/// Prints every message a subscriber receives until the channel closes.
async fn print_messages(mut rx: broadcast::Receiver<Bytes>) {
    loop {
        match rx.recv().await {
            Ok(bytes) => {
                let len = bytes.len();
                match proto::StatusMessage::decode(bytes) {
                    Ok(message) => println!("[{len:3} B] {}", describe(&message)),
                    Err(e) => tracing::warn!(error = %e, "undecodable message"),
                }
            }
            Err(RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "subscriber lagged, messages skipped");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Renders a decoded message on one line.
fn describe(message: &proto::StatusMessage) -> String {
    match &message.payload {
        Some(Payload::SensorData(s)) => format!(
            "sensor   t={} V={:.3} I={:.3} P={:.3}",
            s.timestamp_ms, s.voltage, s.current, s.power
        ),
        Some(Payload::EventData(e)) => format!(
            "event    {} t={} up={}ms {}",
            e.level().as_str_name(),
            e.timestamp_ms,
            e.uptime_ms,
            e.message.as_deref().unwrap_or("-")
        ),
        Some(Payload::StorageStatus(s)) => format!(
            "storage  used={} capacity={} evicted={}",
            s.used_bytes, s.capacity_bytes, s.evicted_bytes
        ),
        None => "empty message".to_string(),
    }
}

/// Deterministic stand-in for the power sensor: a 5 V rail with a slowly
/// oscillating load.
#[derive(Default)]
struct SimulatedSensor {
    phase: f32,
}

impl Sensor for SimulatedSensor {
    fn read(&mut self) -> Option<PowerReading> {
        self.phase += 0.1;
        let voltage = 5.0 + 0.05 * self.phase.sin();
        let current = 0.4 + 0.25 * (self.phase / 3.0).sin();
        Some(PowerReading {
            voltage,
            current,
            power: voltage * current,
        })
    }
}

/// Formats seconds as a human-readable span.
fn format_span(secs: u32) -> String {
    if secs >= 86400 {
        format!("{}d {}h", secs / 86400, secs % 86400 / 3600)
    } else if secs >= 3600 {
        format!("{}h {}m", secs / 3600, secs % 3600 / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}

/// Formats a byte count as a human-readable string.
#[allow(clippy::cast_precision_loss)] // Byte counts are display-only
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1} MiB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KiB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}
