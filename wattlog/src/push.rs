//! Encode-then-deliver path for live status messages.
//!
//! A [`Publisher`] encodes each [`StatusMessage`] into a fresh stack buffer
//! and hands the bytes to a [`DeliverySink`]. Delivery is fire-and-forget:
//! the publisher never waits for a subscriber and never learns whether one
//! received the message.
//!
//! ```text
//! StatusMessage ──encode──▶ [u8; 256] ──deliver──▶ DeliverySink ──▶ subscribers
//! ```

use std::fmt::{self, Write as _};
use std::sync::{Arc, Mutex, PoisonError};

use prost::bytes::Bytes;
use tokio::sync::broadcast;
use tracing::{debug, error};

use crate::clock::{Clock, SystemClock};
use crate::error::EncodeError;
use crate::message::{EncodeBuffer, EventData, EventLevel, StatusMessage};

/// Longest event text passed to the encoder, in bytes.
pub const MAX_EVENT_MESSAGE_LEN: usize = 254;

/// Default queue depth of a [`BroadcastSink`].
pub const DEFAULT_BROADCAST_CAPACITY: usize = 64;

/// Largest queue depth a [`BroadcastSink`] will allocate.
pub const MAX_BROADCAST_CAPACITY: usize = 4096;

/// Receives encoded messages for delivery to connected subscribers.
///
/// Implementations must not block and must tolerate calls from several
/// producer tasks at once.
pub trait DeliverySink: Send + Sync {
    /// Delivers one encoded message. No status is reported back.
    fn deliver(&self, bytes: &[u8]);
}

impl<T: DeliverySink + ?Sized> DeliverySink for Arc<T> {
    fn deliver(&self, bytes: &[u8]) {
        (**self).deliver(bytes);
    }
}

/// Sink that discards every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl DeliverySink for NullSink {
    fn deliver(&self, _bytes: &[u8]) {}
}

/// Fans messages out to every subscriber of a tokio broadcast channel.
///
/// Slow subscribers lag and lose the oldest messages rather than slowing
/// the producer.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<Bytes>,
}

impl BroadcastSink {
    /// Creates a sink whose channel holds up to `capacity` undelivered
    /// messages per subscriber.
    ///
    /// `capacity` is clamped to `1..=MAX_BROADCAST_CAPACITY`.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.clamp(1, MAX_BROADCAST_CAPACITY));
        Self { tx }
    }

    /// Subscribes a new client; it sees messages delivered from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.tx.subscribe()
    }

    /// Returns the number of connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(DEFAULT_BROADCAST_CAPACITY)
    }
}

impl DeliverySink for BroadcastSink {
    fn deliver(&self, bytes: &[u8]) {
        if self.tx.send(Bytes::copy_from_slice(bytes)).is_err() {
            debug!(len = bytes.len(), "no subscribers, message dropped");
        }
    }
}

/// Sink that keeps every delivered message in memory.
#[derive(Debug, Default)]
pub struct CollectSink {
    messages: Mutex<Vec<Vec<u8>>>,
}

impl CollectSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns everything delivered so far.
    pub fn take(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.messages.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Returns the number of messages delivered and not yet taken.
    pub fn len(&self) -> usize {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if nothing is waiting to be taken.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DeliverySink for CollectSink {
    fn deliver(&self, bytes: &[u8]) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(bytes.to_vec());
    }
}

/// Encodes status messages and passes them to a sink.
#[derive(Debug)]
pub struct Publisher<S, C = SystemClock> {
    sink: S,
    clock: C,
}

impl<S: DeliverySink> Publisher<S> {
    /// Creates a publisher timestamping events with the host clock.
    pub fn new(sink: S) -> Self {
        Self::with_clock(sink, SystemClock::new())
    }
}

impl<S: DeliverySink, C: Clock> Publisher<S, C> {
    /// Creates a publisher with an explicit clock.
    pub fn with_clock(sink: S, clock: C) -> Self {
        Self { sink, clock }
    }

    /// Returns the delivery sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Returns the clock used for event timestamps.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Encodes `message` and delivers it.
    ///
    /// Returns the encoded length. Nothing is delivered if encoding fails.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::BufferTooSmall`] if the message does not fit
    /// in one encode buffer. The failure is also logged.
    pub fn push(&self, message: &StatusMessage<'_>) -> Result<usize, EncodeError> {
        let mut buffer = EncodeBuffer::new();
        match message.encode(&mut buffer) {
            Ok(len) => {
                self.sink.deliver(buffer.as_bytes());
                debug!(len, "pushed status message");
                Ok(len)
            }
            Err(e) => {
                error!(error = %e, "failed to encode status message, dropping");
                Err(e)
            }
        }
    }

    /// Pushes an [`EventData`] stamped with the current wall time and
    /// uptime.
    ///
    /// Text longer than [`MAX_EVENT_MESSAGE_LEN`] bytes is cut at the last
    /// character boundary that fits. `None` sends the event without text.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::BufferTooSmall`] if the event still does not
    /// fit in one encode buffer.
    pub fn emit_event(&self, level: EventLevel, message: Option<&str>) -> Result<usize, EncodeError> {
        let event = EventData {
            level,
            timestamp_ms: self.clock.wall_ms(),
            uptime_ms: self.clock.uptime_ms(),
            message: message.map(|m| truncate_at_boundary(m, MAX_EVENT_MESSAGE_LEN)),
        };
        self.push(&StatusMessage::EventData(event))
    }
}

/// Formats event text, keeping at most [`MAX_EVENT_MESSAGE_LEN`] bytes.
///
/// ```rust
/// use wattlog::push::event_message;
///
/// let text = event_message(format_args!("log rotated, {} bytes evicted", 29));
/// assert_eq!(text, "log rotated, 29 bytes evicted");
/// ```
pub fn event_message(args: fmt::Arguments<'_>) -> String {
    let mut out = Bounded {
        text: String::new(),
        full: false,
    };
    // Bounded never reports an error; overflow just stops the output.
    let _ = out.write_fmt(args);
    out.text
}

struct Bounded {
    text: String,
    full: bool,
}

impl fmt::Write for Bounded {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.full {
            return Ok(());
        }
        let room = MAX_EVENT_MESSAGE_LEN - self.text.len();
        let fitted = truncate_at_boundary(s, room);
        self.text.push_str(fitted);
        self.full = fitted.len() < s.len();
        Ok(())
    }
}

fn truncate_at_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
