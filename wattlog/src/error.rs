//! Error types for the wattlog telemetry pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for all wattlog operations.
///
/// Every variant is recoverable: callers log it and carry on with the next
/// sampling tick.
#[derive(Error, Debug)]
pub enum WattlogError {
    /// Error loading or validating configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Error during log store I/O (initialize, append, rotation, read-back).
    #[error("log error: {0}")]
    Log(#[from] LogError),

    /// Error formatting or parsing a log record line.
    #[error("record error: {0}")]
    Record(#[from] RecordError),

    /// Error encoding a status message.
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
}

/// Errors that can occur while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The capacity cannot hold the header plus at least one byte of data.
    #[error("max_size {max_size} must exceed the header length {header_len}")]
    CapacityTooSmall {
        /// The configured capacity in bytes.
        max_size: u64,
        /// Length of the configured header line in bytes.
        header_len: usize,
    },

    /// The header line is malformed.
    #[error("invalid header: {reason}")]
    InvalidHeader {
        /// Why the header was rejected.
        reason: String,
    },

    /// The rotation block size is zero.
    #[error("block_size must be greater than zero")]
    ZeroBlockSize,

    /// The sampling interval is zero.
    #[error("sample_interval_ms must be greater than zero")]
    ZeroSampleInterval,

    /// The configuration file could not be read.
    #[error("failed to read config '{}': {source}", path.display())]
    Load {
        /// The config file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for the expected shape.
    #[error("failed to parse config '{}': {source}", path.display())]
    Parse {
        /// The config file path.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Errors that can occur during log store operations.
#[derive(Error, Debug)]
pub enum LogError {
    /// The backing filesystem could not be mounted or prepared.
    #[error("failed to mount filesystem for '{}': {source}", path.display())]
    Mount {
        /// The log path whose filesystem failed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The log file could not be created.
    #[error("failed to create log file '{}': {source}", path.display())]
    Create {
        /// The log file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The log file could not be opened.
    #[error("failed to open log file '{}': {source}", path.display())]
    Open {
        /// The log file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The log file size could not be determined.
    #[error("failed to stat log file '{}': {source}", path.display())]
    Stat {
        /// The log file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Reading from the log file failed.
    #[error("failed to read log file '{}' at offset {offset}: {source}", path.display())]
    Read {
        /// The log file path.
        path: PathBuf,
        /// Byte offset of the failed read.
        offset: u64,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Writing to the log file failed.
    #[error("failed to write log file '{}' at offset {offset}: {source}", path.display())]
    Write {
        /// The log file path.
        path: PathBuf,
        /// Byte offset of the failed write.
        offset: u64,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Truncating the log file after compaction failed.
    #[error("failed to truncate log file '{}' to {len} bytes: {source}", path.display())]
    Truncate {
        /// The log file path.
        path: PathBuf,
        /// The requested length.
        len: u64,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The header line could not be read, so rotation was aborted.
    #[error("could not read header of '{}': {reason}", path.display())]
    HeaderUnreadable {
        /// The log file path.
        path: PathBuf,
        /// Why the header was unreadable.
        reason: String,
    },

    /// A stored line failed to parse while reading the log back.
    #[error("line {line} of '{}' is not a valid record: {source}", path.display())]
    CorruptLine {
        /// The log file path.
        path: PathBuf,
        /// One-based line number within the file.
        line: usize,
        /// The parse failure.
        #[source]
        source: RecordError,
    },

    /// A raw line passed to the store is not a single newline-terminated line.
    #[error("invalid line: {reason}")]
    InvalidLine {
        /// Why the line was rejected.
        reason: String,
    },
}

/// Errors that can occur formatting or parsing a CSV record line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// The formatted line does not fit in the bounded line buffer.
    #[error("formatted record exceeds {max_len} bytes")]
    LineOverflow {
        /// The line buffer capacity.
        max_len: usize,
    },

    /// The line does not have exactly four comma-separated fields.
    #[error("expected 4 fields, found {found}")]
    FieldCount {
        /// Number of fields found.
        found: usize,
    },

    /// A field failed to parse as a number.
    #[error("invalid {field} value '{value}'")]
    InvalidField {
        /// Column name.
        field: &'static str,
        /// The raw text.
        value: String,
    },
}

/// Errors that can occur encoding a status message.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    /// The encoded message would not fit in the encoding buffer.
    #[error("message needs {required} bytes but the buffer holds {capacity}")]
    BufferTooSmall {
        /// Bytes the encoding requires.
        required: usize,
        /// Capacity of the encoding buffer.
        capacity: usize,
    },
}

/// Type alias for `Result<T, WattlogError>`.
pub type Result<T> = std::result::Result<T, WattlogError>;
