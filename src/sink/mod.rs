//! Downstream publish sinks.
//!
//! The download loop hands every decoded record to a [`Publisher`] as soon as
//! it is produced. Publishers are synchronous because decoding runs on the
//! blocking pool.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use snafu::prelude::*;
use std::io::{self, Stdout, Write};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::codec::ObjectRecord;
use crate::error::{ClosedSnafu, PublishError, SerializeSnafu, WriteSnafu};

/// One timestamped record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    #[serde(rename = "@timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Event {
    /// Stamp a record with the current time.
    pub fn from_record(record: ObjectRecord) -> Self {
        Self {
            timestamp: Utc::now(),
            fields: record.into_fields(),
        }
    }
}

/// Accepts events one at a time.
pub trait Publisher: Send + Sync {
    fn publish(&self, event: Event) -> Result<(), PublishError>;
}

pub type PublisherRef = Arc<dyn Publisher>;

/// Writes each event as one JSON line.
#[derive(Debug)]
pub struct JsonLinesPublisher<W: Write + Send> {
    writer: Mutex<W>,
}

/// JSON lines on standard output.
pub type StdoutPublisher = JsonLinesPublisher<Stdout>;

impl StdoutPublisher {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> JsonLinesPublisher<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<W: Write + Send> Publisher for JsonLinesPublisher<W> {
    fn publish(&self, event: Event) -> Result<(), PublishError> {
        let mut line = serde_json::to_vec(&event).context(SerializeSnafu)?;
        line.push(b'\n');

        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writer.write_all(&line).context(WriteSnafu)?;
        writer.flush().context(WriteSnafu)
    }
}

/// Forwards events into a bounded tokio channel.
///
/// `publish` blocks while the channel is full, so it must be called from a
/// blocking thread, never from inside an async task.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<Event>,
}

impl ChannelPublisher {
    pub fn new(tx: mpsc::Sender<Event>) -> Self {
        Self { tx }
    }

    /// Create a publisher together with the receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

impl Publisher for ChannelPublisher {
    fn publish(&self, event: Event) -> Result<(), PublishError> {
        self.tx.blocking_send(event).ok().context(ClosedSnafu)
    }
}
