//! Integration tests for the bounded log store on the host filesystem.
//!
//! These tests drive long append sequences through rotation and check the
//! file after every step: the header survives, the size stays under the
//! ceiling, rows keep their order, and no partial row is ever left behind.

#![allow(clippy::cast_precision_loss)]

use std::fs;
use std::path::Path;

use tempfile::tempdir;
use wattlog::config::{COMPACT_MAX_LOG_SIZE, DEFAULT_HEADER};
use wattlog::{AppendOutcome, InitOutcome, LogConfig, LogRecord, LogStore};

/// Record whose line length varies with `i` (power spans 1 to 5 integer digits).
fn varied_record(i: u32) -> LogRecord {
    let power = (i * 7919 % 50_000) as f32 / 3.0;
    LogRecord::new(1_700_000_000 + i, 5.0, 0.5, power)
}

/// Reads the log and returns its header and the timestamps of every row.
fn read_log(path: &Path) -> (String, Vec<u32>) {
    let contents = fs::read_to_string(path).unwrap();
    let mut lines = contents.split_inclusive('\n');
    let header = lines.next().unwrap_or_default().to_string();

    let stamps = lines
        .map(|line| {
            assert!(line.ends_with('\n'), "partial row {line:?}");
            line.parse::<LogRecord>()
                .unwrap_or_else(|e| panic!("row {line:?} does not parse: {e}"))
                .timestamp
        })
        .collect();

    (header, stamps)
}

#[test]
fn test_invariants_hold_across_many_rotations() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("datalog.csv");
    let config = LogConfig::new(&path).with_max_size(300).with_block_size(7);
    let mut store = LogStore::open_disk(config).unwrap();

    let mut rotations = 0;
    for i in 0..500u32 {
        let outcome = store.append(&varied_record(i)).unwrap();
        if outcome.rotated() {
            rotations += 1;
        }

        let size = fs::metadata(&path).unwrap().len();
        assert_eq!(outcome.size(), size);
        assert!(size <= 300, "size {size} over capacity after append {i}");

        let (header, stamps) = read_log(&path);
        assert_eq!(header, DEFAULT_HEADER);

        // Surviving rows are a contiguous, ordered suffix ending at `i`.
        let last = *stamps.last().unwrap();
        assert_eq!(last, 1_700_000_000 + i);
        let first = stamps[0];
        let expected: Vec<u32> = (first..=last).collect();
        assert_eq!(stamps, expected);
    }

    assert!(rotations > 100, "only {rotations} rotations");
}

#[test]
fn test_initialize_twice_leaves_file_unchanged() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("datalog.csv");
    let config = LogConfig::new(&path);

    let mut store = LogStore::open_disk(config.clone()).unwrap();
    for i in 0..5 {
        store.append(&varied_record(i)).unwrap();
    }
    let before = fs::read(&path).unwrap();

    assert_eq!(
        store.initialize().unwrap(),
        InitOutcome::Existing {
            size: before.len() as u64
        }
    );
    let reopened = LogStore::open_disk(config).unwrap();
    reopened.initialize().unwrap();

    assert_eq!(fs::read(&path).unwrap(), before);
}

#[test]
fn test_initialize_creates_parent_directories() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("littlefs").join("datalog.csv");

    let store = LogStore::new(LogConfig::new(&path), wattlog::DiskFs).unwrap();
    assert_eq!(store.initialize().unwrap(), InitOutcome::Created);
    assert_eq!(fs::read_to_string(&path).unwrap(), DEFAULT_HEADER);
}

#[test]
fn test_rotation_keeps_existing_header() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("datalog.csv");

    // A file written by an older firmware with a different header.
    let mut contents = String::from("ts,v,i,p\n");
    for i in 0..3 {
        contents.push_str(varied_record(i).format_line().unwrap().as_str());
    }
    fs::write(&path, &contents).unwrap();

    let max_size = contents.len() as u64;
    let mut store = LogStore::open_disk(LogConfig::new(&path).with_max_size(max_size)).unwrap();
    let outcome = store.append(&varied_record(3)).unwrap();
    assert!(outcome.rotated());

    let (header, stamps) = read_log(&path);
    assert_eq!(header, "ts,v,i,p\n");
    assert_eq!(store.header().unwrap(), "ts,v,i,p\n");
    assert_eq!(stamps.last(), Some(&1_700_000_003));
    assert!(!stamps.contains(&1_700_000_000));
}

#[test]
fn test_oversized_line_is_stored_alone() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("datalog.csv");
    let header_len = DEFAULT_HEADER.len() as u64;
    let mut store =
        LogStore::open_disk(LogConfig::new(&path).with_max_size(header_len + 10)).unwrap();

    let line = "1700000000,5.000,0.500,2.500\n";
    let outcome = store.append_line(line.as_bytes()).unwrap();
    assert_eq!(
        outcome,
        AppendOutcome::Rotated {
            evicted_bytes: 0,
            size: header_len + line.len() as u64
        }
    );
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        format!("{DEFAULT_HEADER}{line}")
    );
}

#[test]
fn test_deleted_file_is_recreated_on_append() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("datalog.csv");
    let mut store = LogStore::open_disk(LogConfig::new(&path)).unwrap();
    store.append(&varied_record(0)).unwrap();

    fs::remove_file(&path).unwrap();
    store.append(&varied_record(1)).unwrap();

    let (header, stamps) = read_log(&path);
    assert_eq!(header, DEFAULT_HEADER);
    assert_eq!(stamps, vec![1_700_000_001]);
}

#[test]
fn test_compact_preset_read_back() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("datalog.csv");
    let config = LogConfig::new(&path).with_max_size(COMPACT_MAX_LOG_SIZE);
    let mut store = LogStore::open_disk(config).unwrap();
    assert_eq!(store.capacity(), 716_800);

    for i in 0..100 {
        store
            .append(&LogRecord::new(1_000 + i, 5.0, 0.1, f32::from(u16::try_from(i).unwrap())))
            .unwrap();
    }

    let tail = store.tail(3).unwrap();
    let stamps: Vec<u32> = tail.iter().map(|r| r.timestamp).collect();
    assert_eq!(stamps, vec![1_097, 1_098, 1_099]);

    let summary = store.summary().unwrap();
    assert_eq!(summary.records, 100);
    assert_eq!(summary.first_timestamp, Some(1_000));
    assert_eq!(summary.last_timestamp, Some(1_099));
    assert_eq!(summary.min_power, Some(0.0));
    assert_eq!(summary.max_power, Some(99.0));
    assert_eq!(summary.mean_power, Some(49.5));
    assert_eq!(summary.size, fs::metadata(&path).unwrap().len());
}
