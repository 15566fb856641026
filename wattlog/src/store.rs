//! Bounded log store for the wattlog telemetry pipeline.
//!
//! The store owns a single CSV file whose total size never exceeds a fixed
//! ceiling. Appends that fit are plain appends; an append that would cross
//! the ceiling first compacts the file in place, evicting the oldest rows
//! while keeping the header line.
//!
//! # File Layout
//!
//! ```text
//! [0..H)          Header line, e.g. "timestamp,voltage,current,power\n"
//! [H..size)       Data rows, oldest first, each terminated by '\n'
//! ```
//!
//! # Rotation
//!
//! ```text
//! before:  | header | r1 | r2 | r3 | r4 |            + new
//!                    ^---------^ excess bytes, rounded up to a row boundary
//!                              ^ keep_from
//! shift:   | header | r3 | r4 |                       (block copy, forward)
//! after:   | header | r3 | r4 | new |
//! ```
//!
//! The shift is a forward block copy from `keep_from` down to `H` with a
//! scratch block of `block_size` bytes, so memory use is independent of the
//! file size and no second copy of the file is ever written.
//!
//! Rotation is not crash-atomic. Power loss during the shift or before the
//! truncate can leave trailing rows duplicated or missing; a crash-free
//! rotation always leaves whole rows. A write that fails part way through
//! the new row is cut back to the row boundary before the error is returned.
//!
//! # Example Usage
//!
//! ```rust
//! use wattlog::config::LogConfig;
//! use wattlog::fs::MemFs;
//! use wattlog::record::LogRecord;
//! use wattlog::store::{AppendOutcome, LogStore};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = LogConfig::new("/littlefs/datalog.csv").with_max_size(4096);
//! let mut store = LogStore::open(config, MemFs::new())?;
//!
//! let outcome = store.append(&LogRecord::new(1_700_000_000, 5.02, 0.41, 2.058))?;
//! assert!(matches!(outcome, AppendOutcome::Appended { .. }));
//! assert_eq!(store.records()?.len(), 1);
//! # Ok(())
//! # }
//! ```

use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::{LogConfig, MAX_HEADER_LEN};
use crate::error::{LogError, Result};
use crate::fs::{DiskFs, Filesystem, LogFile};
use crate::record::LogRecord;

/// Result of [`LogStore::initialize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// The file was absent (or empty) and has been created with its header.
    Created,
    /// The file already existed and was left untouched.
    Existing {
        /// Current size in bytes.
        size: u64,
    },
}

/// Result of a successful append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The line fit and was appended directly.
    Appended {
        /// File size after the append.
        size: u64,
    },
    /// The oldest rows were evicted to make room for the line.
    Rotated {
        /// Number of body bytes evicted.
        evicted_bytes: u64,
        /// File size after the append.
        size: u64,
    },
}

impl AppendOutcome {
    /// Returns the file size after the append.
    pub fn size(&self) -> u64 {
        match *self {
            Self::Appended { size } | Self::Rotated { size, .. } => size,
        }
    }

    /// Returns `true` if the append triggered a rotation.
    pub fn rotated(&self) -> bool {
        matches!(self, Self::Rotated { .. })
    }
}

/// Aggregate view of the rows currently in the log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogSummary {
    /// Number of data rows.
    pub records: usize,
    /// File size in bytes.
    pub size: u64,
    /// Capacity ceiling in bytes.
    pub capacity: u64,
    /// Timestamp of the oldest row.
    pub first_timestamp: Option<u32>,
    /// Timestamp of the newest row.
    pub last_timestamp: Option<u32>,
    /// Smallest power reading.
    pub min_power: Option<f32>,
    /// Largest power reading.
    pub max_power: Option<f32>,
    /// Mean power reading.
    pub mean_power: Option<f32>,
}

/// Size-bounded CSV log.
///
/// # Thread Safety
///
/// The store assumes a single writer. [`append`](Self::append) takes
/// `&mut self`; callers sharing a store between tasks must wrap it in a
/// mutex.
#[derive(Debug)]
pub struct LogStore<F: Filesystem = DiskFs> {
    /// Validated configuration.
    config: LogConfig,
    /// Backing filesystem.
    fs: F,
}

impl LogStore<DiskFs> {
    /// Opens a store on the host filesystem.
    ///
    /// # Errors
    ///
    /// See [`LogStore::open`].
    pub fn open_disk(config: LogConfig) -> Result<Self> {
        Self::open(config, DiskFs)
    }
}

impl<F: Filesystem> LogStore<F> {
    /// Creates a store without touching the filesystem.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`](crate::error::ConfigError) if the config is
    /// invalid.
    pub fn new(config: LogConfig, fs: F) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, fs })
    }

    /// Creates a store and initializes its file.
    ///
    /// # Errors
    ///
    /// Returns a config error or any error from [`initialize`](Self::initialize).
    pub fn open(config: LogConfig, fs: F) -> Result<Self> {
        let store = Self::new(config, fs)?;
        store.initialize()?;
        Ok(store)
    }

    /// Mounts the filesystem and makes sure the log file exists.
    ///
    /// A missing or zero-length file is created with the configured header.
    /// An existing file is never modified, so calling this repeatedly is
    /// harmless.
    ///
    /// # Errors
    ///
    /// - [`LogError::Mount`] if the filesystem is unusable
    /// - [`LogError::Stat`] if the existing file cannot be inspected
    /// - [`LogError::Create`] / [`LogError::Write`] if creating the file fails
    pub fn initialize(&self) -> Result<InitOutcome> {
        let path = self.path();
        info!(path = %path.display(), "initializing telemetry log");

        self.fs.mount(path).map_err(|e| LogError::Mount {
            path: path.to_path_buf(),
            source: e,
        })?;

        if self.fs.exists(path) {
            let size = self.stat()?;
            if size > 0 {
                info!(
                    size,
                    capacity = self.config.max_size,
                    "log file found"
                );
                return Ok(InitOutcome::Existing { size });
            }
            warn!("log file is empty, rewriting header");
        } else {
            info!("log file not found, creating new one");
        }

        self.create_with_header()?;
        Ok(InitOutcome::Created)
    }

    /// Appends one record, rotating first if the file would overflow.
    ///
    /// # Errors
    ///
    /// - [`RecordError::LineOverflow`](crate::error::RecordError::LineOverflow)
    ///   if the record does not fit the line buffer
    /// - any error from [`append_line`](Self::append_line)
    pub fn append(&mut self, record: &LogRecord) -> Result<AppendOutcome> {
        let line = record.format_line()?;
        self.append_line(line.as_bytes())
    }

    /// Appends one raw, newline-terminated line.
    ///
    /// If `size + line.len()` exceeds the capacity, the oldest rows are
    /// evicted in place until the line fits. A line that cannot fit even in
    /// an empty body evicts every row and is stored alone after the header.
    ///
    /// If the log file has disappeared or been emptied since initialization
    /// it is recreated with its header first.
    ///
    /// # Errors
    ///
    /// - [`LogError::InvalidLine`] if `line` is not a single terminated line
    /// - [`LogError::HeaderUnreadable`] if rotation cannot find the header;
    ///   the file is left untouched
    /// - [`LogError::Open`], [`LogError::Read`], [`LogError::Write`],
    ///   [`LogError::Truncate`] or [`LogError::Stat`] on I/O failure
    pub fn append_line(&mut self, line: &[u8]) -> Result<AppendOutcome> {
        validate_line(line)?;

        let path = self.path();
        if !self.fs.exists(path) {
            warn!(path = %path.display(), "log file missing, recreating");
            self.create_with_header()?;
        } else if self.stat()? == 0 {
            warn!(path = %path.display(), "log file is empty, rewriting header");
            self.create_with_header()?;
        }

        let size = self.stat()?;
        let line_len = line.len() as u64;

        if size + line_len <= self.config.max_size {
            let mut file = self.fs.open_append(path).map_err(|e| self.open_error(e))?;
            self.write_line_or_rollback(&mut file, size, line)?;

            debug!(size = size + line_len, "appended log line");
            return Ok(AppendOutcome::Appended {
                size: size + line_len,
            });
        }

        info!(
            size,
            capacity = self.config.max_size,
            "log file is full, rotating"
        );
        self.rotate(size, line)
    }

    /// Returns the configured log path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Returns the store configuration.
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Returns the capacity ceiling in bytes.
    pub fn capacity(&self) -> u64 {
        self.config.max_size
    }

    /// Returns the current file size in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Stat`] if the file cannot be inspected.
    pub fn size(&self) -> Result<u64> {
        self.stat()
    }

    /// Reads the header line the file actually carries, newline included.
    ///
    /// This can differ from the configured header when the file was
    /// written by another configuration.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::HeaderUnreadable`] if the file is empty or its
    /// first line is unterminated or longer than `MAX_HEADER_LEN`, or an
    /// I/O error.
    pub fn header(&self) -> Result<String> {
        let file = self.fs.open_read(self.path()).map_err(|e| self.open_error(e))?;
        let mut reader = BufReader::new(file.take(MAX_HEADER_LEN as u64));

        let mut header = String::new();
        reader
            .read_line(&mut header)
            .map_err(|e| self.read_error(0, e))?;

        if header.is_empty() {
            return Err(self.header_error("file is empty".to_string()));
        }
        if !header.ends_with('\n') {
            return Err(self.header_error(format!(
                "no line terminator within the first {MAX_HEADER_LEN} bytes"
            )));
        }
        Ok(header)
    }

    /// Reads every data row back, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::CorruptLine`] for a row that does not parse, or
    /// an I/O error.
    pub fn records(&self) -> Result<Vec<LogRecord>> {
        let mut records = Vec::new();
        self.for_each_record(|record| records.push(record))?;
        Ok(records)
    }

    /// Reads the newest `count` rows, oldest first.
    ///
    /// # Errors
    ///
    /// See [`records`](Self::records).
    pub fn tail(&self, count: usize) -> Result<Vec<LogRecord>> {
        let mut records = self.records()?;
        let skip = records.len().saturating_sub(count);
        records.drain(..skip);
        Ok(records)
    }

    /// Summarizes the rows currently stored.
    ///
    /// # Errors
    ///
    /// See [`records`](Self::records).
    #[allow(clippy::cast_precision_loss)] // a mean over a few thousand rows
    pub fn summary(&self) -> Result<LogSummary> {
        let mut summary = LogSummary {
            records: 0,
            size: self.stat()?,
            capacity: self.config.max_size,
            first_timestamp: None,
            last_timestamp: None,
            min_power: None,
            max_power: None,
            mean_power: None,
        };
        let mut power_sum = 0.0f64;

        self.for_each_record(|record| {
            summary.records += 1;
            summary.first_timestamp.get_or_insert(record.timestamp);
            summary.last_timestamp = Some(record.timestamp);
            summary.min_power = Some(summary.min_power.map_or(record.power, |p| p.min(record.power)));
            summary.max_power = Some(summary.max_power.map_or(record.power, |p| p.max(record.power)));
            power_sum += f64::from(record.power);
        })?;

        if summary.records > 0 {
            #[allow(clippy::cast_possible_truncation)] // mean of f32 values fits in f32
            let mean = (power_sum / summary.records as f64) as f32;
            summary.mean_power = Some(mean);
        }

        Ok(summary)
    }

    /// Evicts the oldest rows in place and appends `line`.
    fn rotate(&mut self, size: u64, line: &[u8]) -> Result<AppendOutcome> {
        let excess = size + line.len() as u64 - self.config.max_size;
        let mut file = self.fs.open_rw(self.path()).map_err(|e| self.open_error(e))?;
        let mut block = vec![0u8; self.config.block_size];

        let header_len = self.read_header(&mut file, &mut block)?;
        let keep_from = self.find_keep_from(&mut file, header_len, excess, &mut block)?;
        let write_pos = self.shift_down(&mut file, keep_from, header_len, &mut block)?;

        file.set_len(write_pos).map_err(|e| LogError::Truncate {
            path: self.path().to_path_buf(),
            len: write_pos,
            source: e,
        })?;

        let end = file
            .seek(SeekFrom::End(0))
            .map_err(|e| self.write_error(write_pos, e))?;
        self.write_line_or_rollback(&mut file, end, line)?;

        let evicted_bytes = keep_from - header_len;
        let new_size = end + line.len() as u64;
        info!(evicted_bytes, size = new_size, "log file rotated");

        Ok(AppendOutcome::Rotated {
            evicted_bytes,
            size: new_size,
        })
    }

    /// Returns the length of the header line, including its newline.
    fn read_header(&self, file: &mut F::File, block: &mut [u8]) -> Result<u64> {
        let mut offset = 0u64;

        loop {
            let n = self.read_at(file, offset, block)?;
            if n == 0 {
                let reason = if offset == 0 {
                    "file is empty".to_string()
                } else {
                    "header line is not terminated".to_string()
                };
                return Err(self.header_error(reason));
            }

            if let Some(i) = block[..n].iter().position(|&b| b == b'\n') {
                let header_len = offset + i as u64 + 1;
                if header_len > MAX_HEADER_LEN as u64 {
                    break;
                }
                return Ok(header_len);
            }

            offset += n as u64;
            if offset >= MAX_HEADER_LEN as u64 {
                break;
            }
        }

        Err(self.header_error(format!(
            "no line terminator within the first {MAX_HEADER_LEN} bytes"
        )))
    }

    /// Scans rows after the header until at least `excess` bytes are
    /// covered and returns the offset of the first surviving row.
    ///
    /// Reaching end of file means every row is evicted.
    fn find_keep_from(
        &self,
        file: &mut F::File,
        header_len: u64,
        excess: u64,
        block: &mut [u8],
    ) -> Result<u64> {
        let mut pos = header_len;

        loop {
            let n = self.read_at(file, pos, block)?;
            if n == 0 {
                return Ok(pos);
            }

            for (i, _) in block[..n].iter().enumerate().filter(|(_, b)| **b == b'\n') {
                let line_end = pos + i as u64 + 1;
                if line_end - header_len >= excess {
                    return Ok(line_end);
                }
            }

            pos += n as u64;
        }
    }

    /// Copies `[read_pos, EOF)` down to `write_pos` one block at a time and
    /// returns the end of the shifted data.
    fn shift_down(
        &self,
        file: &mut F::File,
        mut read_pos: u64,
        mut write_pos: u64,
        block: &mut [u8],
    ) -> Result<u64> {
        debug_assert!(write_pos <= read_pos);

        if read_pos == write_pos {
            return self.stat();
        }

        loop {
            let n = self.read_at(file, read_pos, block)?;
            if n == 0 {
                return Ok(write_pos);
            }

            file.seek(SeekFrom::Start(write_pos))
                .and_then(|_| file.write_all(&block[..n]))
                .map_err(|e| self.write_error(write_pos, e))?;

            read_pos += n as u64;
            write_pos += n as u64;
        }
    }

    /// Seeks to `offset` and fills as much of `buf` as one read returns.
    fn read_at(&self, file: &mut F::File, offset: u64, buf: &mut [u8]) -> Result<usize> {
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| self.read_error(offset, e))?;

        loop {
            match file.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.read_error(offset, e).into()),
            }
        }
    }

    /// Streams each data row to `visit`, skipping the header.
    fn for_each_record(&self, mut visit: impl FnMut(LogRecord)) -> Result<()> {
        let path = self.path();
        let file = self.fs.open_read(path).map_err(|e| self.open_error(e))?;
        let mut reader = BufReader::new(file);

        let mut line = String::new();
        let mut offset = 0u64;
        let mut line_no = 0usize;

        loop {
            line.clear();
            let n = reader
                .read_line(&mut line)
                .map_err(|e| self.read_error(offset, e))?;
            if n == 0 {
                return Ok(());
            }
            offset += n as u64;
            line_no += 1;

            if line_no == 1 {
                continue;
            }

            let record = line.parse::<LogRecord>().map_err(|e| LogError::CorruptLine {
                path: path.to_path_buf(),
                line: line_no,
                source: e,
            })?;
            visit(record);
        }
    }

    /// Appends `line` at `offset`, the current end of `file`.
    ///
    /// A failed write is cut back to `offset` so no partial row is left for
    /// the next append to run into.
    fn write_line_or_rollback(&self, file: &mut F::File, offset: u64, line: &[u8]) -> Result<()> {
        let Err(e) = file.write_all(line).and_then(|()| file.flush()) else {
            return Ok(());
        };

        match file.set_len(offset) {
            Ok(()) => warn!(offset, "write failed, partial line removed"),
            Err(rollback) => {
                error!(offset, error = %rollback, "write failed and partial line could not be removed");
            }
        }
        Err(self.write_error(offset, e).into())
    }

    fn create_with_header(&self) -> Result<()> {
        let path = self.path();
        let mut file = self.fs.create(path).map_err(|e| LogError::Create {
            path: path.to_path_buf(),
            source: e,
        })?;
        file.write_all(self.config.header.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|e| self.write_error(0, e))?;
        Ok(())
    }

    fn stat(&self) -> Result<u64> {
        self.fs.size(self.path()).map_err(|e| {
            LogError::Stat {
                path: self.path().to_path_buf(),
                source: e,
            }
            .into()
        })
    }

    fn open_error(&self, source: io::Error) -> LogError {
        LogError::Open {
            path: self.path().to_path_buf(),
            source,
        }
    }

    fn read_error(&self, offset: u64, source: io::Error) -> LogError {
        LogError::Read {
            path: self.path().to_path_buf(),
            offset,
            source,
        }
    }

    fn write_error(&self, offset: u64, source: io::Error) -> LogError {
        LogError::Write {
            path: self.path().to_path_buf(),
            offset,
            source,
        }
    }

    fn header_error(&self, reason: String) -> crate::error::WattlogError {
        LogError::HeaderUnreadable {
            path: self.path().to_path_buf(),
            reason,
        }
        .into()
    }
}

/// Rejects anything but one non-empty, newline-terminated line.
fn validate_line(line: &[u8]) -> Result<()> {
    let reason = match line.split_last() {
        None => "line is empty",
        Some((&last, _)) if last != b'\n' => "line must end with '\\n'",
        Some((_, body)) if body.contains(&b'\n') => "line contains an embedded newline",
        Some(_) => return Ok(()),
    };

    Err(LogError::InvalidLine {
        reason: reason.to_string(),
    }
    .into())
}
