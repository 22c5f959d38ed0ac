// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
// Event Bus Implementation - Pub/Sub for Store Change Events
//
// Provides in-memory event streaming using tokio broadcast channels.
// The external transport (websocket relay, log tailer) subscribes here;
// publishers never wait on subscribers.

use crate::domain::events::{ChangeEvent, ChangeKind, PublishSink};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Event bus for publishing and subscribing to change events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<ChangeEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    /// Capacity determines how many events can be buffered before dropping old ones
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    /// Subscribe to all change events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to one kind of change only
    pub fn subscribe_kind(&self, kind: ChangeKind) -> KindEventReceiver {
        KindEventReceiver {
            receiver: self.sender.subscribe(),
            kind,
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl PublishSink for EventBus {
    fn publish(&self, event: ChangeEvent) {
        debug!(kind = ?event.kind, "Publishing change event");

        // send() only fails when nobody is listening
        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Receiver for all change events
pub struct EventReceiver {
    receiver: broadcast::Receiver<ChangeEvent>,
}

impl EventReceiver {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<ChangeEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<ChangeEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver filtered to a single [`ChangeKind`]
pub struct KindEventReceiver {
    receiver: broadcast::Receiver<ChangeEvent>,
    kind: ChangeKind,
}

impl KindEventReceiver {
    pub async fn recv(&mut self) -> Result<ChangeEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if event.kind == self.kind {
                return Ok(event);
            }
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        event_bus.publish(ChangeEvent::new(ChangeKind::CellUpdate, json!({"x": 1, "y": 1})));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.kind, ChangeKind::CellUpdate);
        assert_eq!(received.payload["x"], 1);
    }

    #[tokio::test]
    async fn test_kind_filtering() {
        let event_bus = EventBus::new(10);
        let mut agents_only = event_bus.subscribe_kind(ChangeKind::AgentUpdate);

        event_bus.publish(ChangeEvent::new(ChangeKind::CellUpdate, json!({})));
        event_bus.publish(ChangeEvent::new(ChangeKind::AgentUpdate, json!({"id": "A"})));

        let received = agents_only.recv().await.unwrap();
        assert_eq!(received.payload["id"], "A");
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let event_bus = EventBus::default();
        assert_eq!(event_bus.subscriber_count(), 0);
        event_bus.publish(ChangeEvent::new(ChangeKind::DbChange, json!({})));
    }

    #[tokio::test]
    async fn test_lagged_receiver_reports_drop() {
        let event_bus = EventBus::new(2);
        let mut receiver = event_bus.subscribe();
        for i in 0..5 {
            event_bus.publish(ChangeEvent::new(ChangeKind::DbChange, json!({ "seq": i })));
        }
        assert!(matches!(receiver.try_recv(), Err(EventBusError::Lagged(_))));
    }
}
