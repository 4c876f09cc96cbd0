//! Lifecycle events emitted by the sequence service
//!
//! Events report service start/stop, execution progress and state
//! checkpoints to any consumer that implements [`EventSink`].

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Trait for receiving service events
///
/// Abstracts over the transport (channel, log, test collector) so the
/// service can be embedded in different hosts.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be delivered (e.g., channel closed)
    fn send(&self, event: ServiceEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// Events emitted over the service lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServiceEvent {
    /// The service accepted `start()`
    #[serde(rename_all = "camelCase")]
    Started { restored: usize },

    /// The service finished `stop()`
    #[serde(rename_all = "camelCase")]
    Stopped { flushed: usize, aborted: usize },

    /// An execution was seeded and handed to a worker
    #[serde(rename_all = "camelCase")]
    ExecutionStarted {
        sequence_id: String,
        execution_id: String,
    },

    /// An execution produced its final context
    #[serde(rename_all = "camelCase")]
    ExecutionCompleted {
        sequence_id: String,
        execution_id: String,
    },

    /// An execution failed
    #[serde(rename_all = "camelCase")]
    ExecutionFailed {
        sequence_id: String,
        execution_id: String,
        error: String,
    },

    /// A stored execution was loaded into the active table
    #[serde(rename_all = "camelCase")]
    StateRestored { execution_id: String },

    /// An execution was written to persistence
    #[serde(rename_all = "camelCase")]
    StateSaved { execution_id: String },
}

/// A no-op event sink that discards all events
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: ServiceEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
#[derive(Default)]
pub struct VecEventSink {
    events: Mutex<Vec<ServiceEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<ServiceEvent> {
        self.events.lock().clone()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: ServiceEvent) -> Result<(), EventError> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Forwards events into a tokio channel
///
/// Lets a host consume events on its own task. Sending fails once the
/// receiver has been dropped.
#[derive(Clone)]
pub struct ChannelEventSink {
    sender: mpsc::UnboundedSender<ServiceEvent>,
}

impl ChannelEventSink {
    pub fn new(sender: mpsc::UnboundedSender<ServiceEvent>) -> Self {
        Self { sender }
    }

    /// A sink plus the receiver its events arrive on
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServiceEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }
}

impl EventSink for ChannelEventSink {
    fn send(&self, event: ServiceEvent) -> Result<(), EventError> {
        self.sender
            .send(event)
            .map_err(|_| EventError::channel_closed())
    }
}
