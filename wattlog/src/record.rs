//! CSV log records and the bounded line formatter.
//!
//! Every data row of the log is one [`LogRecord`] serialized as
//! `timestamp,voltage,current,power\n` with the three floats printed to
//! exactly three decimals. Formatting goes through [`LineBuf`], a
//! fixed-capacity stack buffer, so a record can never produce a line longer
//! than [`MAX_LINE_LEN`]; a record that would is rejected instead of being
//! written truncated.

use std::fmt::{self, Write as _};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RecordError;

/// Capacity of the line buffer used to format one record.
pub const MAX_LINE_LEN: usize = 100;

/// One power sample as stored in the log.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Sample time in seconds since the Unix epoch.
    pub timestamp: u32,
    /// Bus voltage in volts.
    pub voltage: f32,
    /// Load current in amperes.
    pub current: f32,
    /// Power in watts.
    pub power: f32,
}

impl LogRecord {
    /// Creates a record.
    pub fn new(timestamp: u32, voltage: f32, current: f32, power: f32) -> Self {
        Self {
            timestamp,
            voltage,
            current,
            power,
        }
    }

    /// Formats the record as a newline-terminated CSV line.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::LineOverflow`] if the line would exceed
    /// [`MAX_LINE_LEN`] bytes (only possible for huge or non-finite floats).
    pub fn format_line(&self) -> Result<LineBuf, RecordError> {
        let mut line = LineBuf::new();
        writeln!(
            line,
            "{},{:.3},{:.3},{:.3}",
            self.timestamp, self.voltage, self.current, self.power
        )
        .map_err(|_| RecordError::LineOverflow {
            max_len: MAX_LINE_LEN,
        })?;
        Ok(line)
    }
}

impl FromStr for LogRecord {
    type Err = RecordError;

    /// Parses one data row, with or without its trailing newline.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_suffix('\n').unwrap_or(s);
        let s = s.strip_suffix('\r').unwrap_or(s);

        let fields: Vec<&str> = s.split(',').collect();
        if fields.len() != 4 {
            return Err(RecordError::FieldCount {
                found: fields.len(),
            });
        }

        let timestamp = fields[0]
            .trim()
            .parse::<u32>()
            .map_err(|_| RecordError::InvalidField {
                field: "timestamp",
                value: fields[0].to_string(),
            })?;

        Ok(Self {
            timestamp,
            voltage: parse_float("voltage", fields[1])?,
            current: parse_float("current", fields[2])?,
            power: parse_float("power", fields[3])?,
        })
    }
}

fn parse_float(field: &'static str, raw: &str) -> Result<f32, RecordError> {
    raw.trim()
        .parse::<f32>()
        .map_err(|_| RecordError::InvalidField {
            field,
            value: raw.to_string(),
        })
}

/// Fixed-capacity line buffer.
///
/// Implements [`fmt::Write`]; a write that would overflow fails with
/// [`fmt::Error`] and leaves the buffer holding only what fit before it.
#[derive(Clone)]
pub struct LineBuf {
    bytes: [u8; MAX_LINE_LEN],
    len: usize,
}

impl LineBuf {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self {
            bytes: [0; MAX_LINE_LEN],
            len: 0,
        }
    }

    /// Returns the formatted bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Returns the formatted text.
    pub fn as_str(&self) -> &str {
        // Only whole `&str` fragments are ever copied in.
        std::str::from_utf8(self.as_bytes()).unwrap_or_default()
    }

    /// Returns the number of bytes written.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for LineBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Write for LineBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let end = self.len + s.len();
        if end > MAX_LINE_LEN {
            return Err(fmt::Error);
        }
        self.bytes[self.len..end].copy_from_slice(s.as_bytes());
        self.len = end;
        Ok(())
    }
}

impl fmt::Debug for LineBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LineBuf").field(&self.as_str()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_line_three_decimals() {
        let record = LogRecord::new(1_700_000_000, 5.1, 0.25, 1.275);
        let line = record.format_line().unwrap();
        assert_eq!(line.as_str(), "1700000000,5.100,0.250,1.275\n");
        assert_eq!(line.len(), 29);
    }

    #[test]
    fn test_format_line_negative_and_zero() {
        let record = LogRecord::new(0, 0.0, -0.125, -0.5);
        let line = record.format_line().unwrap();
        assert_eq!(line.as_str(), "0,0.000,-0.125,-0.500\n");
    }

    #[test]
    fn test_format_line_overflow_rejected() {
        // f32::MAX prints 39 integer digits; three of them cannot fit.
        let record = LogRecord::new(u32::MAX, f32::MAX, f32::MAX, f32::MAX);
        assert_eq!(
            record.format_line().unwrap_err(),
            RecordError::LineOverflow {
                max_len: MAX_LINE_LEN
            }
        );
    }

    #[test]
    fn test_line_buf_rejects_partial_write() {
        let mut buf = LineBuf::new();
        buf.write_str(&"x".repeat(90)).unwrap();
        assert!(buf.write_str(&"y".repeat(11)).is_err());
        assert_eq!(buf.len(), 90);
        assert!(!buf.as_str().contains('y'));
    }

    #[test]
    fn test_parse_formatted_line() {
        let record = LogRecord::new(42, 12.5, 1.0, 12.5);
        let line = record.format_line().unwrap();
        let parsed: LogRecord = line.as_str().parse().unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_parse_rejects_header() {
        let err = "timestamp,voltage,current,power\n"
            .parse::<LogRecord>()
            .unwrap_err();
        assert!(matches!(
            err,
            RecordError::InvalidField {
                field: "timestamp",
                ..
            }
        ));
    }

    #[test]
    fn test_parse_rejects_wrong_field_count() {
        assert_eq!(
            "1,2.000,3.000".parse::<LogRecord>().unwrap_err(),
            RecordError::FieldCount { found: 3 }
        );
        assert_eq!(
            "".parse::<LogRecord>().unwrap_err(),
            RecordError::FieldCount { found: 1 }
        );
    }

    #[test]
    fn test_parse_rejects_bad_float() {
        let err = "1,abc,0.000,0.000".parse::<LogRecord>().unwrap_err();
        assert_eq!(
            err,
            RecordError::InvalidField {
                field: "voltage",
                value: "abc".to_string()
            }
        );
    }
}
