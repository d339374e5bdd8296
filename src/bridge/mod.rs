//! Eventing bridge that renders deliveries and faults as JSON records.
//!
//! Each message from a `ChannelSink` becomes one JSON document on its own
//! line, stamped with the time it was rendered.

use std::{io::Write, path::PathBuf};

use {
    async_channel::Receiver,
    chrono::{SecondsFormat, Utc},
    serde::Serialize,
    serde_json::{to_string, to_string_pretty},
    tracing::{debug, warn},
};

use crate::{
    error::{Result, operational::ResultExt},
    watch::{
        events::{ChangeType, DeliveredEvent, NativeFault, RawChangeEvent},
        sink::SinkMessage,
    },
};

/// One raw event as rendered in a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeRecord {
    /// Kind of change.
    pub change_type: ChangeType,
    /// Full path of the affected entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_path: Option<PathBuf>,
    /// Base name of the affected entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Previous full path, for renames.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_full_path: Option<PathBuf>,
    /// Previous base name, for renames.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_name: Option<String>,
}

impl From<&RawChangeEvent> for ChangeRecord {
    fn from(event: &RawChangeEvent) -> Self {
        Self {
            change_type: event.change_type(),
            full_path: event.full_path().map(PathBuf::from),
            name: event.name().map(str::to_string),
            old_full_path: event.old().map(|old| old.full_path.clone()),
            old_name: event.old().map(|old| old.name.clone()),
        }
    }
}

/// Payload of an `EventRecord`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageData {
    /// The representative event.
    #[serde(flatten)]
    pub change: ChangeRecord,
    /// Every member of an aggregated delivery, in arrival order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub aggregated: Vec<ChangeRecord>,
}

/// Record written for each delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventRecord {
    /// Subscription that produced the delivery.
    pub source_identifier: String,
    /// RFC 3339 UTC timestamp.
    pub time_generated: String,
    /// What happened.
    pub message_data: MessageData,
}

impl EventRecord {
    /// Renders a delivery.
    pub fn new(source_identifier: impl Into<String>, event: &DeliveredEvent) -> Self {
        let aggregated = match event {
            DeliveredEvent::Single(_) => Vec::new(),
            DeliveredEvent::Aggregated(aggregate) => {
                aggregate.members().iter().map(ChangeRecord::from).collect()
            }
        };

        Self {
            source_identifier: source_identifier.into(),
            time_generated: now_rfc3339(),
            message_data: MessageData {
                change: ChangeRecord::from(event.representative()),
                aggregated,
            },
        }
    }
}

/// Record written for each native watcher fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FaultRecord {
    /// Subscription whose watcher failed.
    pub source_identifier: String,
    /// RFC 3339 UTC timestamp.
    pub time_generated: String,
    /// What went wrong.
    pub fault: NativeFault,
}

impl FaultRecord {
    /// Renders a fault.
    pub fn new(source_identifier: impl Into<String>, fault: NativeFault) -> Self {
        Self {
            source_identifier: source_identifier.into(),
            time_generated: now_rfc3339(),
            fault,
        }
    }
}

/// Any record the bridge writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Record {
    /// A delivery.
    Event(EventRecord),
    /// A fault.
    Fault(FaultRecord),
}

impl From<SinkMessage> for Record {
    fn from(message: SinkMessage) -> Self {
        match message {
            SinkMessage::Delivery {
                source_identifier,
                event,
            } => Self::Event(EventRecord::new(source_identifier, &event)),
            SinkMessage::Fault {
                source_identifier,
                cause,
            } => Self::Fault(FaultRecord::new(source_identifier, cause)),
        }
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Writes one JSON document per line.
pub struct JsonLineWriter<W: Write> {
    writer: W,
    pretty: bool,
}

impl<W: Write> JsonLineWriter<W> {
    /// Wraps `writer`. Pretty output spans several lines per record.
    pub fn new(writer: W, pretty: bool) -> Self {
        Self { writer, pretty }
    }

    /// Serializes and writes one record, then flushes.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be serialized or written.
    pub fn write<T: Serialize>(&mut self, record: &T) -> Result<()> {
        let line = if self.pretty {
            to_string_pretty(record)
        } else {
            to_string(record)
        }
        .add_context("Failed to serialize record")?;

        writeln!(self.writer, "{line}").add_context("Failed to write record")?;
        self.writer.flush().add_context("Failed to flush record")?;
        Ok(())
    }

    /// Unwraps the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Drains `receiver` into `writer` until the channel is closed and empty.
///
/// Faults are also logged as warnings correlated to their source identifier.
///
/// # Returns
///
/// The number of records written.
///
/// # Errors
///
/// Returns an error if a record cannot be written.
pub async fn pump<W: Write>(
    receiver: Receiver<SinkMessage>,
    writer: &mut JsonLineWriter<W>,
) -> Result<usize> {
    let mut written = 0;

    while let Ok(message) = receiver.recv().await {
        if let SinkMessage::Fault {
            source_identifier,
            cause,
        } = &message
        {
            warn!("Watcher '{}' may have lost events: {}", source_identifier, cause);
        }

        writer.write(&Record::from(message))?;
        written += 1;
    }

    debug!("Event channel closed after {} record(s)", written);
    Ok(written)
}
