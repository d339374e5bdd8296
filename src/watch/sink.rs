//! Destinations for delivered events and faults.

use {
    async_channel::{Receiver, Sender, TrySendError, bounded, unbounded},
    tracing::warn,
};

use crate::watch::events::{DeliveredEvent, NativeFault};

/// Consumer of a subscription's output.
///
/// Both methods may be called from any thread, including runtime worker
/// threads running rate limiter timers, so implementations must not block
/// for long.
pub trait EventSink: Send + Sync {
    /// Receives one delivery: a bare event or an aggregate.
    fn deliver(&self, source_identifier: &str, event: DeliveredEvent);

    /// Receives a native watcher fault. Faults bypass rate limiting.
    fn deliver_fault(&self, source_identifier: &str, cause: NativeFault);
}

/// Message carried by a `ChannelSink`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkMessage {
    /// A delivery from `source_identifier`.
    Delivery {
        /// Subscription that produced the delivery.
        source_identifier: String,
        /// Delivered event.
        event: DeliveredEvent,
    },
    /// A fault from `source_identifier`.
    Fault {
        /// Subscription whose watcher failed.
        source_identifier: String,
        /// What went wrong.
        cause: NativeFault,
    },
}

impl SinkMessage {
    /// Subscription the message came from.
    pub fn source_identifier(&self) -> &str {
        match self {
            Self::Delivery {
                source_identifier, ..
            }
            | Self::Fault {
                source_identifier, ..
            } => source_identifier,
        }
    }
}

/// Sink that forwards everything into an `async_channel`.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: Sender<SinkMessage>,
}

impl ChannelSink {
    /// Creates a sink over an unbounded channel.
    ///
    /// # Returns
    ///
    /// The sink and the receiving end of its channel.
    pub fn unbounded() -> (Self, Receiver<SinkMessage>) {
        let (sender, receiver) = unbounded();
        (Self { sender }, receiver)
    }

    /// Creates a sink over a channel holding at most `capacity` messages.
    ///
    /// Messages that do not fit are dropped with a warning; a sink never
    /// blocks the thread delivering into it.
    ///
    /// # Returns
    ///
    /// The sink and the receiving end of its channel.
    pub fn bounded(capacity: usize) -> (Self, Receiver<SinkMessage>) {
        let (sender, receiver) = bounded(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Closes the channel; receivers drain what is queued and then end.
    pub fn close(&self) -> bool {
        self.sender.close()
    }

    fn forward(&self, message: SinkMessage) {
        match self.sender.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(message)) => {
                warn!(
                    "Sink channel full, dropping message from '{}'",
                    message.source_identifier()
                );
            }
            Err(TrySendError::Closed(message)) => {
                warn!(
                    "Sink channel closed, dropping message from '{}'",
                    message.source_identifier()
                );
            }
        }
    }
}

impl EventSink for ChannelSink {
    fn deliver(&self, source_identifier: &str, event: DeliveredEvent) {
        self.forward(SinkMessage::Delivery {
            source_identifier: source_identifier.to_string(),
            event,
        });
    }

    fn deliver_fault(&self, source_identifier: &str, cause: NativeFault) {
        self.forward(SinkMessage::Fault {
            source_identifier: source_identifier.to_string(),
            cause,
        });
    }
}
