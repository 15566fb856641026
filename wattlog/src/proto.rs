//! Owned protobuf types for the status message stream.
//!
//! Hand-written prost types matching `status.proto`:
//!
//! ```text
//! message SensorData    { uint64 timestamp_ms = 1; float voltage = 2; float current = 3; float power = 4; }
//! enum    EventLevel    { INFO = 0; WARNING = 1; CRITICAL = 2; FATAL = 3; }
//! message EventData     { EventLevel level = 1; uint64 timestamp_ms = 2; uint64 uptime_ms = 3; optional string message = 4; }
//! message StorageStatus { uint64 used_bytes = 1; uint64 capacity_bytes = 2; uint64 evicted_bytes = 3; }
//! message StatusMessage { oneof payload { SensorData sensor_data = 1; EventData event_data = 2; StorageStatus storage_status = 3; } }
//! ```
//!
//! The device side encodes with the allocation-free codec in
//! [`message`](crate::message); subscribers decode into these types with
//! [`prost::Message::decode`].

/// Severity of an [`EventData`] message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum EventLevel {
    /// Informational.
    Info = 0,
    /// Something is off but the device keeps working normally.
    Warning = 1,
    /// A subsystem has stopped working.
    Critical = 2,
    /// The device cannot continue.
    Fatal = 3,
}

impl EventLevel {
    /// Returns the upper-case name used in `status.proto`.
    pub fn as_str_name(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
            Self::Fatal => "FATAL",
        }
    }
}

/// Live power reading.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SensorData {
    /// Sample time in milliseconds since the Unix epoch.
    #[prost(uint64, tag = "1")]
    pub timestamp_ms: u64,
    /// Bus voltage in volts.
    #[prost(float, tag = "2")]
    pub voltage: f32,
    /// Load current in amperes.
    #[prost(float, tag = "3")]
    pub current: f32,
    /// Power in watts.
    #[prost(float, tag = "4")]
    pub power: f32,
}

/// Device event.
#[derive(Clone, PartialEq, prost::Message)]
pub struct EventData {
    /// Severity, see [`EventLevel`].
    #[prost(enumeration = "EventLevel", tag = "1")]
    pub level: i32,
    /// Wall-clock time in milliseconds since the Unix epoch.
    #[prost(uint64, tag = "2")]
    pub timestamp_ms: u64,
    /// Milliseconds since boot.
    #[prost(uint64, tag = "3")]
    pub uptime_ms: u64,
    /// Human-readable text; absent when the event carries none.
    #[prost(string, optional, tag = "4")]
    pub message: Option<String>,
}

/// Log store occupancy, sent after a rotation.
#[derive(Clone, PartialEq, prost::Message)]
pub struct StorageStatus {
    /// Current log size in bytes.
    #[prost(uint64, tag = "1")]
    pub used_bytes: u64,
    /// Capacity ceiling in bytes.
    #[prost(uint64, tag = "2")]
    pub capacity_bytes: u64,
    /// Bytes evicted by the rotation.
    #[prost(uint64, tag = "3")]
    pub evicted_bytes: u64,
}

/// Envelope carrying exactly one payload.
#[derive(Clone, PartialEq, prost::Message)]
pub struct StatusMessage {
    /// The active payload.
    #[prost(oneof = "status_message::Payload", tags = "1, 2, 3")]
    pub payload: Option<status_message::Payload>,
}

/// Nested types for [`StatusMessage`].
pub mod status_message {
    /// Payload variants of a [`StatusMessage`](super::StatusMessage).
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Payload {
        /// Live power reading.
        #[prost(message, tag = "1")]
        SensorData(super::SensorData),
        /// Device event.
        #[prost(message, tag = "2")]
        EventData(super::EventData),
        /// Log store occupancy.
        #[prost(message, tag = "3")]
        StorageStatus(super::StorageStatus),
    }
}
