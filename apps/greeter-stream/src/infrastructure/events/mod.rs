//! Call Event Hub
//!
//! Fan-out of call lifecycle events to any number of subscribers using
//! a tokio broadcast channel. Sessions publish into the hub as calls
//! progress; the HTTP layer re-broadcasts to live event streams.
//!
//! Publishing never gates call progress: with no subscribers the event
//! is dropped, and a slow subscriber only lags its own receiver.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::domain::call::CallEvent;

/// Default capacity of the event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Shared event hub reference.
pub type SharedCallEventHub = Arc<CallEventHub>;

/// Broadcast hub for call lifecycle events.
///
/// # Example
///
/// ```rust
/// use greeter_stream::{CallEvent, CallEventHub, CallEventKind, CallId, StreamShape};
///
/// let hub = CallEventHub::with_defaults();
/// let _subscriber = hub.subscribe();
///
/// let event = CallEvent::now(CallId::new(), StreamShape::BidiStreaming, CallEventKind::Opened);
/// assert_eq!(hub.publish(event), Some(1));
/// ```
#[derive(Debug)]
pub struct CallEventHub {
    events_tx: broadcast::Sender<CallEvent>,
    capacity: usize,
}

impl CallEventHub {
    /// Create a hub with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            events_tx: broadcast::channel(capacity).0,
            capacity,
        }
    }

    /// Create a hub with the default capacity.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }

    /// Publish an event to all subscribers.
    ///
    /// Returns the number of receivers the event reached, or `None` if
    /// there are no active receivers.
    #[must_use]
    pub fn publish(&self, event: CallEvent) -> Option<usize> {
        self.events_tx.send(event).ok()
    }

    /// Get a new receiver for call events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.events_tx.subscribe()
    }

    /// Get the number of active receivers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.events_tx.receiver_count()
    }

    /// Get statistics about the hub.
    #[must_use]
    pub fn stats(&self) -> EventHubStats {
        EventHubStats {
            capacity: self.capacity,
            subscribers: self.subscriber_count(),
        }
    }
}

/// Statistics about the event hub.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct EventHubStats {
    /// Capacity of the event channel.
    pub capacity: usize,
    /// Number of active subscribers.
    pub subscribers: usize,
}

// =============================================================================
// Tests
// =============================================================================
