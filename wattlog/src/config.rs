//! Configuration types for the wattlog pipeline.
//!
//! A [`LogConfig`] fixes where the telemetry log lives, how large it may
//! grow, and which header line it carries. [`TelemetryConfig`] wraps it with
//! the sampling cadence used by the orchestrator. Both are plain serde
//! structs so deployments can ship them as JSON next to the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Capacity of the log on the 1 MiB LittleFS partition layout.
pub const DEFAULT_MAX_LOG_SIZE: u64 = 1024 * 1024;

/// Capacity of the log on the smaller 700 KiB partition layout.
pub const COMPACT_MAX_LOG_SIZE: u64 = 700 * 1024;

/// Header line written at the top of every new log file.
pub const DEFAULT_HEADER: &str = "timestamp,voltage,current,power\n";

/// Default log file location on the device.
pub const DEFAULT_LOG_PATH: &str = "/littlefs/datalog.csv";

/// Default size of the block used to shift data during rotation.
pub const DEFAULT_BLOCK_SIZE: usize = 256;

/// Longest header line the store will read back during rotation.
pub const MAX_HEADER_LEN: usize = 256;

/// Default sampling period of the orchestrator.
pub const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 1000;

/// Configuration of a bounded log store.
///
/// # Example
///
/// ```rust
/// use wattlog::config::{LogConfig, COMPACT_MAX_LOG_SIZE};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = LogConfig::new("/tmp/datalog.csv")
///     .with_max_size(COMPACT_MAX_LOG_SIZE);
/// config.validate()?;
/// assert_eq!(config.max_size, 700 * 1024);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Path of the CSV log file.
    pub path: PathBuf,

    /// Hard ceiling on the file size in bytes.
    pub max_size: u64,

    /// Header line, including the trailing newline.
    ///
    /// Written only when the file is created; rotation preserves whatever
    /// header the file already carries.
    pub header: String,

    /// Size of the scratch block used while compacting.
    pub block_size: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_LOG_PATH),
            max_size: DEFAULT_MAX_LOG_SIZE,
            header: DEFAULT_HEADER.to_string(),
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl LogConfig {
    /// Creates a config for `path` with the default capacity and header.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Sets the capacity ceiling.
    #[must_use]
    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    /// Sets the header line.
    #[must_use]
    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = header.into();
        self
    }

    /// Sets the rotation block size.
    #[must_use]
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the header is not a single
    /// newline-terminated line of at most [`MAX_HEADER_LEN`] bytes, if the
    /// capacity cannot hold the header, or if the block size is zero.
    pub fn validate(&self) -> Result<()> {
        let header = self.header.as_bytes();

        if header.len() < 2 || !header.ends_with(b"\n") {
            return Err(ConfigError::InvalidHeader {
                reason: "header must be a non-empty line ending in '\\n'".to_string(),
            }
            .into());
        }

        if header[..header.len() - 1].contains(&b'\n') {
            return Err(ConfigError::InvalidHeader {
                reason: "header must not contain embedded newlines".to_string(),
            }
            .into());
        }

        if header.len() > MAX_HEADER_LEN {
            return Err(ConfigError::InvalidHeader {
                reason: format!(
                    "header is {} bytes, longer than the {MAX_HEADER_LEN} byte limit",
                    header.len()
                ),
            }
            .into());
        }

        if self.max_size <= header.len() as u64 {
            return Err(ConfigError::CapacityTooSmall {
                max_size: self.max_size,
                header_len: header.len(),
            }
            .into());
        }

        if self.block_size == 0 {
            return Err(ConfigError::ZeroBlockSize.into());
        }

        Ok(())
    }
}

/// Configuration of the telemetry orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Log store settings.
    pub log: LogConfig,

    /// Sampling period in milliseconds.
    pub sample_interval_ms: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log: LogConfig::default(),
            sample_interval_ms: DEFAULT_SAMPLE_INTERVAL_MS,
        }
    }
}

impl TelemetryConfig {
    /// Loads and validates a JSON config file.
    ///
    /// Missing fields fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if the file cannot be read,
    /// [`ConfigError::Parse`] if it is not valid JSON, or any validation error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let data = std::fs::read_to_string(path).map_err(|e| ConfigError::Load {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&data).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the log config is invalid or the sampling
    /// interval is zero.
    pub fn validate(&self) -> Result<()> {
        self.log.validate()?;

        if self.sample_interval_ms == 0 {
            return Err(ConfigError::ZeroSampleInterval.into());
        }

        Ok(())
    }

    /// Returns the sampling period.
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}
