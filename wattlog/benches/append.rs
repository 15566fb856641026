//! Microbenchmarks for the append, rotation, and encode paths.
//!
//! Run with: `cargo bench -p wattlog -- append`

#![allow(missing_docs, clippy::cast_possible_truncation, clippy::cast_precision_loss)]

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use tempfile::tempdir;
use wattlog::message::{EncodeBuffer, EventData, EventLevel, SensorData, StatusMessage};
use wattlog::{LogConfig, LogRecord, LogStore};

fn record(i: u32) -> LogRecord {
    LogRecord::new(1_700_000_000 + i, 5.0, 0.4 + (i % 10) as f32 * 0.01, 2.0)
}

/// Opens a disk store and fills it until the next append rotates.
fn full_store(max_size: u64) -> (LogStore, tempfile::TempDir, u32) {
    let temp_dir = tempdir().unwrap();
    let config = LogConfig::new(temp_dir.path().join("datalog.csv")).with_max_size(max_size);
    let mut store = LogStore::open_disk(config).unwrap();

    let mut i = 0;
    while !store.append(&record(i)).unwrap().rotated() {
        i += 1;
    }

    (store, temp_dir, i)
}

fn bench_append_plain(c: &mut Criterion) {
    let temp_dir = tempdir().unwrap();
    let config = LogConfig::new(temp_dir.path().join("datalog.csv")).with_max_size(u64::MAX / 2);
    let mut store = LogStore::open_disk(config).unwrap();
    let mut i = 0u32;

    c.bench_function("append/plain", |b| {
        b.iter(|| {
            i = i.wrapping_add(1);
            store.append(black_box(&record(i))).unwrap();
        });
    });
}

fn bench_append_rotating(c: &mut Criterion) {
    let mut group = c.benchmark_group("append/rotating");

    for max_size in [4 * 1024u64, 64 * 1024, 1024 * 1024] {
        let (mut store, _dir, mut i) = full_store(max_size);

        group.bench_with_input(BenchmarkId::from_parameter(max_size), &max_size, |b, _| {
            b.iter(|| {
                i = i.wrapping_add(1);
                let outcome = store.append(black_box(&record(i))).unwrap();
                debug_assert!(outcome.rotated());
            });
        });
    }

    group.finish();
}

fn bench_format_line(c: &mut Criterion) {
    let record = record(7);
    c.bench_function("record/format_line", |b| {
        b.iter(|| black_box(&record).format_line().unwrap());
    });
}

fn bench_encode(c: &mut Criterion) {
    let sensor = StatusMessage::SensorData(SensorData {
        timestamp_ms: 1_700_000_000_000,
        voltage: 5.07,
        current: 0.412,
        power: 2.089,
    });
    let text = "x".repeat(200);
    let event = StatusMessage::EventData(EventData {
        level: EventLevel::Warning,
        timestamp_ms: 1_700_000_000_000,
        uptime_ms: 86_400_000,
        message: Some(&text),
    });
    let mut buffer = EncodeBuffer::new();

    c.bench_function("encode/sensor_data", |b| {
        b.iter(|| black_box(&sensor).encode(&mut buffer).unwrap());
    });
    c.bench_function("encode/event_200b", |b| {
        b.iter(|| black_box(&event).encode(&mut buffer).unwrap());
    });
}

criterion_group!(
    benches,
    bench_append_plain,
    bench_append_rotating,
    bench_format_line,
    bench_encode,
);
criterion_main!(benches);
