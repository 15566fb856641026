//! Status message codec.
//!
//! [`StatusMessage`] is the device-side view of the `status.proto` envelope:
//! an enum with one payload per variant. It borrows its event text instead
//! of owning it, and [`StatusMessage::encode`] writes protobuf wire bytes
//! straight into a fixed [`EncodeBuffer`] without allocating.
//!
//! The output is byte-for-byte what prost produces for the owned types in
//! [`proto`](crate::proto), which subscribers use to decode.
//!
//! # Example
//!
//! ```rust
//! use prost::Message;
//! use wattlog::message::{EncodeBuffer, EventData, EventLevel, StatusMessage};
//! use wattlog::proto;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let text = String::from("output relay tripped");
//! let message = StatusMessage::EventData(EventData {
//!     level: EventLevel::Critical,
//!     timestamp_ms: 1_700_000_000_000,
//!     uptime_ms: 42_000,
//!     message: Some(&text),
//! });
//!
//! let mut buffer = EncodeBuffer::new();
//! message.encode(&mut buffer)?;
//!
//! let decoded = proto::StatusMessage::decode(buffer.as_bytes())?;
//! assert!(matches!(
//!     decoded.payload,
//!     Some(proto::status_message::Payload::EventData(ref e)) if e.message() == text
//! ));
//! # Ok(())
//! # }
//! ```

use prost::bytes::BufMut;
use prost::encoding::{WireType, encode_key, encode_varint, encoded_len_varint, key_len};

use crate::error::EncodeError;
use crate::proto;

pub use crate::proto::EventLevel;

/// Capacity of the buffer one message is encoded into.
pub const PB_BUFFER_SIZE: usize = 256;

/// Live power reading payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorData {
    /// Sample time in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Bus voltage in volts.
    pub voltage: f32,
    /// Load current in amperes.
    pub current: f32,
    /// Power in watts.
    pub power: f32,
}

/// Device event payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventData<'a> {
    /// Severity.
    pub level: EventLevel,
    /// Wall-clock time in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Milliseconds since boot.
    pub uptime_ms: u64,
    /// Event text, borrowed for the duration of the encode.
    ///
    /// `None` leaves the field out of the wire form entirely.
    pub message: Option<&'a str>,
}

/// Log store occupancy payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageStatus {
    /// Current log size in bytes.
    pub used_bytes: u64,
    /// Capacity ceiling in bytes.
    pub capacity_bytes: u64,
    /// Bytes evicted by the last rotation.
    pub evicted_bytes: u64,
}

/// A status message with exactly one payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatusMessage<'a> {
    /// Live power reading (field 1).
    SensorData(SensorData),
    /// Device event (field 2).
    EventData(EventData<'a>),
    /// Log store occupancy (field 3).
    StorageStatus(StorageStatus),
}

/// Fixed-capacity output buffer for one encoded message.
#[derive(Clone)]
pub struct EncodeBuffer {
    bytes: [u8; PB_BUFFER_SIZE],
    len: usize,
}

impl EncodeBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self {
            bytes: [0; PB_BUFFER_SIZE],
            len: 0,
        }
    }

    /// Returns the encoded bytes of the last successful encode.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Returns the number of encoded bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if nothing has been encoded.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the buffer capacity.
    pub fn capacity(&self) -> usize {
        PB_BUFFER_SIZE
    }
}

impl Default for EncodeBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EncodeBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodeBuffer")
            .field("len", &self.len)
            .field("bytes", &self.as_bytes())
            .finish()
    }
}

impl StatusMessage<'_> {
    /// Encodes the message into `buffer`, replacing its contents.
    ///
    /// The size is computed before any byte is written, so a message that
    /// does not fit leaves the buffer untouched.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::BufferTooSmall`] if the encoded message would
    /// exceed [`PB_BUFFER_SIZE`].
    pub fn encode(&self, buffer: &mut EncodeBuffer) -> Result<usize, EncodeError> {
        let required = self.encoded_len();
        if required > PB_BUFFER_SIZE {
            return Err(EncodeError::BufferTooSmall {
                required,
                capacity: PB_BUFFER_SIZE,
            });
        }

        let mut out: &mut [u8] = &mut buffer.bytes[..];
        self.encode_raw(&mut out);
        buffer.len = required;
        Ok(required)
    }

    /// Encodes the message into a new vector, without a size limit.
    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_raw(&mut out);
        out
    }

    /// Returns the number of bytes [`encode`](Self::encode) would write.
    pub fn encoded_len(&self) -> usize {
        let (tag, inner) = self.payload_field();
        message_field_len(tag, inner)
    }

    /// Converts into the owned prost representation.
    pub fn to_proto(&self) -> proto::StatusMessage {
        use proto::status_message::Payload;

        let payload = match *self {
            Self::SensorData(s) => Payload::SensorData(proto::SensorData {
                timestamp_ms: s.timestamp_ms,
                voltage: s.voltage,
                current: s.current,
                power: s.power,
            }),
            Self::EventData(e) => Payload::EventData(proto::EventData {
                level: e.level.into(),
                timestamp_ms: e.timestamp_ms,
                uptime_ms: e.uptime_ms,
                message: e.message.map(str::to_owned),
            }),
            Self::StorageStatus(s) => Payload::StorageStatus(proto::StorageStatus {
                used_bytes: s.used_bytes,
                capacity_bytes: s.capacity_bytes,
                evicted_bytes: s.evicted_bytes,
            }),
        };

        proto::StatusMessage {
            payload: Some(payload),
        }
    }

    /// Returns the oneof field number and the payload's encoded length.
    fn payload_field(&self) -> (u32, usize) {
        match self {
            Self::SensorData(s) => (1, s.encoded_len()),
            Self::EventData(e) => (2, e.encoded_len()),
            Self::StorageStatus(s) => (3, s.encoded_len()),
        }
    }

    fn encode_raw<B: BufMut>(&self, buf: &mut B) {
        let (tag, inner) = self.payload_field();
        encode_key(tag, WireType::LengthDelimited, buf);
        encode_varint(inner as u64, buf);

        match self {
            Self::SensorData(s) => s.encode_raw(buf),
            Self::EventData(e) => e.encode_raw(buf),
            Self::StorageStatus(s) => s.encode_raw(buf),
        }
    }
}

impl SensorData {
    fn encoded_len(&self) -> usize {
        uint64_len(1, self.timestamp_ms)
            + float_len(2, self.voltage)
            + float_len(3, self.current)
            + float_len(4, self.power)
    }

    fn encode_raw<B: BufMut>(&self, buf: &mut B) {
        put_uint64(1, self.timestamp_ms, buf);
        put_float(2, self.voltage, buf);
        put_float(3, self.current, buf);
        put_float(4, self.power, buf);
    }
}

impl EventData<'_> {
    fn encoded_len(&self) -> usize {
        uint64_len(1, level_value(self.level))
            + uint64_len(2, self.timestamp_ms)
            + uint64_len(3, self.uptime_ms)
            + string_len(4, self.message)
    }

    fn encode_raw<B: BufMut>(&self, buf: &mut B) {
        put_uint64(1, level_value(self.level), buf);
        put_uint64(2, self.timestamp_ms, buf);
        put_uint64(3, self.uptime_ms, buf);
        encode_string(4, self.message, buf);
    }
}

impl StorageStatus {
    fn encoded_len(&self) -> usize {
        uint64_len(1, self.used_bytes)
            + uint64_len(2, self.capacity_bytes)
            + uint64_len(3, self.evicted_bytes)
    }

    fn encode_raw<B: BufMut>(&self, buf: &mut B) {
        put_uint64(1, self.used_bytes, buf);
        put_uint64(2, self.capacity_bytes, buf);
        put_uint64(3, self.evicted_bytes, buf);
    }
}

/// Writes an optional string field.
///
/// `None` writes nothing, so the decoder sees the field as absent.
/// `Some(s)` writes the key, the byte length and the raw bytes of `s`,
/// including for an empty string.
pub fn encode_string<B: BufMut>(tag: u32, value: Option<&str>, buf: &mut B) {
    if let Some(s) = value {
        encode_key(tag, WireType::LengthDelimited, buf);
        encode_varint(s.len() as u64, buf);
        buf.put_slice(s.as_bytes());
    }
}

fn string_len(tag: u32, value: Option<&str>) -> usize {
    value.map_or(0, |s| key_len(tag) + encoded_len_varint(s.len() as u64) + s.len())
}

fn message_field_len(tag: u32, inner: usize) -> usize {
    key_len(tag) + encoded_len_varint(inner as u64) + inner
}

// Scalar fields follow proto3 rules: the default value is not written.

fn uint64_len(tag: u32, value: u64) -> usize {
    if value == 0 {
        0
    } else {
        key_len(tag) + encoded_len_varint(value)
    }
}

fn put_uint64<B: BufMut>(tag: u32, value: u64, buf: &mut B) {
    if value != 0 {
        encode_key(tag, WireType::Varint, buf);
        encode_varint(value, buf);
    }
}

fn float_len(tag: u32, value: f32) -> usize {
    if value == 0.0 { 0 } else { key_len(tag) + 4 }
}

fn put_float<B: BufMut>(tag: u32, value: f32, buf: &mut B) {
    if value != 0.0 {
        encode_key(tag, WireType::ThirtyTwoBit, buf);
        buf.put_f32_le(value);
    }
}

/// Enum values are int32 varints; the levels are all non-negative.
#[allow(clippy::cast_sign_loss)]
fn level_value(level: EventLevel) -> u64 {
    i64::from(level as i32) as u64
}
