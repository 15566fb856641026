//! # wattlog
//!
//! Telemetry pipeline for a power monitor.
//!
//! wattlog samples voltage, current and power, keeps a size-bounded CSV log
//! of the readings on a small filesystem, and streams every reading (plus
//! device events and storage status) as compact protobuf messages to
//! connected subscribers.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - Bounded storage: the log never grows past its configured size; the
//!   oldest rows are evicted in place when it fills up
//! - Constant memory: rotation streams the file block by block, and every
//!   line and message is built in a fixed stack buffer
//! - Header preserved: line 1 of the log survives every rotation
//! - Independent paths: persistence and live delivery fail separately
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wattlog::{LogConfig, LogRecord, LogStore};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = LogConfig::new("./datalog.csv").with_max_size(64 * 1024);
//! let mut store = LogStore::open_disk(config)?;
//!
//! let outcome = store.append(&LogRecord::new(1_700_000_000, 5.07, 0.412, 2.089))?;
//! if outcome.rotated() {
//!     println!("oldest rows evicted, log is {} bytes", outcome.size());
//! }
//!
//! for record in store.tail(10)? {
//!     println!("{} {:.3} W", record.timestamp, record.power);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`LogStore`] — Bounded CSV log with in-place rotation
//! - [`StatusMessage`] — Wire message enum with an allocation-free encoder
//! - [`Publisher`] — Encodes messages and hands them to a [`DeliverySink`]
//! - [`Telemetry`] — Runs sampling ticks across the store and publisher
//!
//! ## Modules
//!
//! - [`store`] — Log initialization, append, rotation, read-back
//! - [`record`] — CSV row type and bounded line formatting
//! - [`fs`] — Filesystem abstraction with disk and in-memory backends
//! - [`message`] — Status message codec
//! - [`proto`] — Owned prost types for decoding
//! - [`push`] — Publisher and delivery sinks
//! - [`clock`] — Wall-clock and uptime sources
//! - [`telemetry`] — Per-tick orchestration and the sampling loop
//! - [`config`] — Configuration and capacity presets
//! - [`error`] — Error types

pub mod clock;
pub mod config;
pub mod error;
pub mod fs;
pub mod message;
pub mod proto;
pub mod push;
pub mod record;
pub mod store;
pub mod telemetry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{LogConfig, TelemetryConfig};
pub use error::{ConfigError, EncodeError, LogError, RecordError, Result, WattlogError};
pub use fs::{DiskFs, Filesystem, MemFs};
pub use message::{EncodeBuffer, EventLevel, StatusMessage};
pub use push::{BroadcastSink, DeliverySink, NullSink, Publisher};
pub use record::LogRecord;
pub use store::{AppendOutcome, InitOutcome, LogStore, LogSummary};
pub use telemetry::{PowerReading, Sensor, SensorSnapshot, Telemetry, TickReport};
