//! Per-tick orchestration of persistence and live delivery.
//!
//! Every sampling tick does two independent things with the same snapshot:
//!
//! 1. append a [`LogRecord`] to the [`LogStore`]
//! 2. push a `SensorData` message through the [`Publisher`]
//!
//! Neither depends on the other. A failed append still pushes, a failed push
//! still appends, and a store that never initialized leaves the device
//! streaming live data without persistence.

use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::LogConfig;
use crate::fs::{DiskFs, Filesystem};
use crate::message::{EventLevel, SensorData, StatusMessage, StorageStatus};
use crate::push::{BroadcastSink, DeliverySink, Publisher, event_message};
use crate::record::LogRecord;
use crate::store::{AppendOutcome, LogStore};

/// Shortest period [`sample_loop`] will tick at.
pub const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(1);

/// One electrical reading, without a timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerReading {
    /// Bus voltage in volts.
    pub voltage: f32,
    /// Load current in amperes.
    pub current: f32,
    /// Power in watts.
    pub power: f32,
}

/// Source of power readings.
pub trait Sensor {
    /// Takes one reading, or `None` if the sensor did not respond.
    fn read(&mut self) -> Option<PowerReading>;
}

/// A timestamped reading, as consumed by [`Telemetry::tick`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSnapshot {
    /// Sample time in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Bus voltage in volts.
    pub voltage: f32,
    /// Load current in amperes.
    pub current: f32,
    /// Power in watts.
    pub power: f32,
}

impl SensorSnapshot {
    /// Stamps a reading with `timestamp_ms`.
    pub fn new(timestamp_ms: u64, reading: PowerReading) -> Self {
        Self {
            timestamp_ms,
            voltage: reading.voltage,
            current: reading.current,
            power: reading.power,
        }
    }

    /// Returns the log row for this snapshot, with the timestamp in seconds.
    ///
    /// Times past 2106 saturate at `u32::MAX`.
    pub fn to_record(&self) -> LogRecord {
        let seconds = u32::try_from(self.timestamp_ms / 1000).unwrap_or(u32::MAX);
        LogRecord::new(seconds, self.voltage, self.current, self.power)
    }

    /// Returns the live message for this snapshot.
    pub fn to_message(&self) -> StatusMessage<'static> {
        StatusMessage::SensorData(SensorData {
            timestamp_ms: self.timestamp_ms,
            voltage: self.voltage,
            current: self.current,
            power: self.power,
        })
    }
}

/// What happened to the log during one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStatus {
    /// Persistence is off because the store failed to initialize.
    Disabled,
    /// The record was written.
    Written(AppendOutcome),
    /// The append failed; the error has been logged.
    Failed,
}

/// Outcome of one [`Telemetry::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Persistence result.
    pub log: LogStatus,
    /// Encoded length of the pushed `SensorData`, or `None` if it was
    /// dropped.
    pub pushed: Option<usize>,
    /// Whether a `StorageStatus` followed a rotation.
    pub storage_status_pushed: bool,
}

/// Owns the log store and publisher and runs sampling ticks.
#[derive(Debug)]
pub struct Telemetry<F: Filesystem = DiskFs, S = BroadcastSink, C = SystemClock> {
    store: Option<LogStore<F>>,
    publisher: Publisher<S, C>,
}

impl<F: Filesystem, S: DeliverySink, C: Clock> Telemetry<F, S, C> {
    /// Opens the log store and reports its occupancy.
    ///
    /// Never fails: if the store cannot be opened the error is logged, a
    /// `CRITICAL` event is pushed, and the orchestrator runs without
    /// persistence.
    pub fn start(config: LogConfig, fs: F, publisher: Publisher<S, C>) -> Self {
        let store = match LogStore::open(config, fs) {
            Ok(store) => Some(store),
            Err(e) => {
                error!(error = %e, "log store unavailable, continuing without persistence");
                let text = event_message(format_args!("log store unavailable: {e}"));
                let _ = publisher.emit_event(EventLevel::Critical, Some(&text));
                None
            }
        };

        let telemetry = Self::with_store(store, publisher);
        telemetry.report_storage(0);
        telemetry
    }

    /// Wraps an already opened store, or `None` to run without persistence.
    pub fn with_store(store: Option<LogStore<F>>, publisher: Publisher<S, C>) -> Self {
        Self { store, publisher }
    }

    /// Returns the log store, if persistence is enabled.
    pub fn store(&self) -> Option<&LogStore<F>> {
        self.store.as_ref()
    }

    /// Returns the publisher.
    pub fn publisher(&self) -> &Publisher<S, C> {
        &self.publisher
    }

    /// Returns `true` if ticks are being persisted.
    pub fn persistence_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Persists and pushes one snapshot.
    pub fn tick(&mut self, snapshot: &SensorSnapshot) -> TickReport {
        let log = match self.store.as_mut() {
            None => LogStatus::Disabled,
            Some(store) => match store.append(&snapshot.to_record()) {
                Ok(outcome) => LogStatus::Written(outcome),
                Err(e) => {
                    error!(error = %e, "failed to persist sample");
                    LogStatus::Failed
                }
            },
        };

        // Encode failures are logged by the publisher.
        let pushed = self.publisher.push(&snapshot.to_message()).ok();

        let storage_status_pushed = match log {
            LogStatus::Written(AppendOutcome::Rotated { evicted_bytes, .. }) => {
                self.report_storage(evicted_bytes)
            }
            _ => false,
        };

        debug!(?log, ?pushed, "tick complete");
        TickReport {
            log,
            pushed,
            storage_status_pushed,
        }
    }

    /// Reads `sensor`, stamps the reading with the publisher's clock and
    /// runs a tick.
    ///
    /// A sensor that does not respond produces a `WARNING` event instead of
    /// a tick, and `None` is returned.
    pub fn sample<T: Sensor + ?Sized>(&mut self, sensor: &mut T) -> Option<TickReport> {
        let Some(reading) = sensor.read() else {
            warn!("sensor read failed, skipping tick");
            let _ = self
                .publisher
                .emit_event(EventLevel::Warning, Some("sensor read failed"));
            return None;
        };

        let snapshot = SensorSnapshot::new(self.publisher.clock().wall_ms(), reading);
        Some(self.tick(&snapshot))
    }

    /// Logs the store occupancy and pushes a `StorageStatus`.
    ///
    /// Returns `true` if the message was delivered.
    fn report_storage(&self, evicted_bytes: u64) -> bool {
        let Some(store) = self.store.as_ref() else {
            return false;
        };

        let used_bytes = match store.size() {
            Ok(size) => size,
            Err(e) => {
                warn!(error = %e, "cannot stat log file");
                return false;
            }
        };

        info!(
            used = used_bytes,
            capacity = store.capacity(),
            evicted = evicted_bytes,
            "log storage"
        );

        let status = StatusMessage::StorageStatus(StorageStatus {
            used_bytes,
            capacity_bytes: store.capacity(),
            evicted_bytes,
        });
        self.publisher.push(&status).is_ok()
    }
}

/// Samples `sensor` every `interval` until `ticks` ticks have run, or
/// forever if `ticks` is `None`.
///
/// The first tick fires immediately. Ticks that fall behind are delayed
/// rather than bunched up. A zero `interval` is raised to
/// [`MIN_SAMPLE_INTERVAL`]. Returns the number of ticks that produced a
/// report.
pub async fn sample_loop<F, S, C, T>(
    telemetry: &mut Telemetry<F, S, C>,
    sensor: &mut T,
    interval: Duration,
    ticks: Option<u64>,
) -> u64
where
    F: Filesystem,
    S: DeliverySink,
    C: Clock,
    T: Sensor + ?Sized,
{
    let mut timer = time::interval(interval.max(MIN_SAMPLE_INTERVAL));
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut attempted = 0_u64;
    let mut reported = 0_u64;
    while ticks.is_none_or(|limit| attempted < limit) {
        timer.tick().await;
        attempted += 1;
        if telemetry.sample(sensor).is_some() {
            reported += 1;
        }
    }

    info!(attempted, reported, "sampling stopped");
    reported
}
