//! Integration tests for the telemetry pipeline.
//!
//! A [`Telemetry`] orchestrator writes to a temporary directory and pushes
//! through a [`BroadcastSink`]; the tests play the subscriber, decoding
//! every message with the prost types.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use prost::Message;
use prost::bytes::Bytes;
use tempfile::tempdir;
use tokio::sync::broadcast;
use wattlog::proto::status_message::Payload;
use wattlog::telemetry::{LogStatus, sample_loop};
use wattlog::{
    BroadcastSink, DiskFs, EventLevel, LogConfig, ManualClock, PowerReading, Publisher, Sensor,
    SensorSnapshot, Telemetry, proto,
};

fn drain(rx: &mut broadcast::Receiver<Bytes>) -> Vec<Payload> {
    let mut payloads = Vec::new();
    while let Ok(bytes) = rx.try_recv() {
        let message = proto::StatusMessage::decode(bytes).unwrap();
        payloads.push(message.payload.unwrap());
    }
    payloads
}

fn reading(power: f32) -> PowerReading {
    PowerReading {
        voltage: 5.0,
        current: power / 5.0,
        power,
    }
}

struct Replay(VecDeque<Option<PowerReading>>);

impl Sensor for Replay {
    fn read(&mut self) -> Option<PowerReading> {
        self.0.pop_front().flatten()
    }
}

#[test]
fn test_ticks_reach_disk_and_subscribers() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("datalog.csv");

    let sink = BroadcastSink::new(32);
    let mut rx = sink.subscribe();
    let publisher = Publisher::with_clock(sink, ManualClock::new(1_700_000_000_000));
    // Header (32 bytes) plus three 29-byte rows.
    let mut telemetry = Telemetry::start(LogConfig::new(&path).with_max_size(119), DiskFs, publisher);

    assert!(matches!(
        drain(&mut rx).as_slice(),
        [Payload::StorageStatus(proto::StorageStatus {
            used_bytes: 32,
            capacity_bytes: 119,
            evicted_bytes: 0
        })]
    ));

    for second in 0..4u64 {
        let snapshot = SensorSnapshot::new(1_700_000_000_000 + second * 1000, reading(2.5));
        let report = telemetry.tick(&snapshot);
        assert!(report.pushed.is_some());
        assert_eq!(report.storage_status_pushed, second == 3);
    }

    let payloads = drain(&mut rx);
    let sensor_stamps: Vec<u64> = payloads
        .iter()
        .filter_map(|p| match p {
            Payload::SensorData(s) => Some(s.timestamp_ms),
            _ => None,
        })
        .collect();
    assert_eq!(
        sensor_stamps,
        vec![
            1_700_000_000_000,
            1_700_000_001_000,
            1_700_000_002_000,
            1_700_000_003_000
        ]
    );
    assert_eq!(
        payloads.last(),
        Some(&Payload::StorageStatus(proto::StorageStatus {
            used_bytes: 119,
            capacity_bytes: 119,
            evicted_bytes: 29,
        }))
    );

    let on_disk: Vec<u32> = telemetry
        .store()
        .unwrap()
        .records()
        .unwrap()
        .iter()
        .map(|r| r.timestamp)
        .collect();
    assert_eq!(on_disk, vec![1_700_000_001, 1_700_000_002, 1_700_000_003]);
}

#[test]
fn test_unusable_log_path_still_streams() {
    let temp_dir = tempdir().unwrap();
    // A regular file where the parent directory should be.
    let blocker = temp_dir.path().join("littlefs");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let sink = BroadcastSink::new(8);
    let mut rx = sink.subscribe();
    let publisher = Publisher::with_clock(sink, ManualClock::new(0));
    let mut telemetry = Telemetry::start(
        LogConfig::new(blocker.join("datalog.csv")),
        DiskFs,
        publisher,
    );
    assert!(!telemetry.persistence_enabled());

    let report = telemetry.tick(&SensorSnapshot::new(1_000, reading(1.0)));
    assert_eq!(report.log, LogStatus::Disabled);

    let payloads = drain(&mut rx);
    assert_eq!(payloads.len(), 2);
    assert!(matches!(&payloads[0], Payload::EventData(e) if e.level() == EventLevel::Critical));
    assert!(matches!(&payloads[1], Payload::SensorData(s) if s.power == 1.0));
}

#[tokio::test]
async fn test_sample_loop_with_live_subscriber() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("datalog.csv");

    let sink = BroadcastSink::new(64);
    let mut rx = sink.subscribe();
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let publisher = Publisher::with_clock(sink, Arc::clone(&clock));
    let mut telemetry = Telemetry::start(LogConfig::new(&path), DiskFs, publisher);

    let subscriber = tokio::spawn(async move {
        let mut received = Vec::new();
        while let Ok(bytes) = rx.recv().await {
            received.push(proto::StatusMessage::decode(bytes).unwrap());
        }
        received
    });

    let mut sensor = Replay(VecDeque::from([
        Some(reading(1.0)),
        Some(reading(2.0)),
        None,
        Some(reading(4.0)),
    ]));
    let reported = sample_loop(&mut telemetry, &mut sensor, Duration::from_millis(1), Some(4)).await;
    assert_eq!(reported, 3);

    let records = telemetry.store().unwrap().records().unwrap();
    let powers: Vec<f32> = records.iter().map(|r| r.power).collect();
    assert_eq!(powers, vec![1.0, 2.0, 4.0]);

    // Closing the channel lets the subscriber finish.
    drop(telemetry);
    let received = subscriber.await.unwrap();

    let kinds: Vec<&str> = received
        .iter()
        .map(|m| match &m.payload {
            Some(Payload::SensorData(_)) => "sensor",
            Some(Payload::EventData(_)) => "event",
            Some(Payload::StorageStatus(_)) => "storage",
            None => "empty",
        })
        .collect();
    assert_eq!(kinds, vec!["storage", "sensor", "sensor", "event", "sensor"]);
}
