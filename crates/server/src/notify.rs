//! Push-notification fan-out to connected clients.
//!
//! The bus is a latency optimization layered over the pull-based
//! changes-since API, never the system of record: delivery is best-effort
//! and a missed notification is repaired by the next scheduled sync cycle.

use driftsync_core::{ClientId, ServerMessage, SyncEvent};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

/// Buffered notifications per subscriber. A subscriber that falls this far
/// behind is dropped rather than allowed to stall the publisher.
const SUBSCRIBER_BUFFER: usize = 64;

/// Fan-out bus for accepted change notifications.
#[derive(Clone)]
pub struct NotificationBus {
    subscribers: Arc<Mutex<HashMap<ClientId, mpsc::Sender<ServerMessage>>>>,
}

impl NotificationBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a client, returning the receiving end of its channel.
    ///
    /// Registering an already-connected client id replaces the previous
    /// channel; the old connection's receiver closes.
    pub async fn register(&self, client_id: ClientId) -> mpsc::Receiver<ServerMessage> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let mut subscribers = self.subscribers.lock().await;
        subscribers.insert(client_id, tx);
        debug!(client_id = %client_id, connected = subscribers.len(), "push channel registered");
        rx
    }

    /// Remove a client's channel.
    pub async fn unregister(&self, client_id: &ClientId) {
        let mut subscribers = self.subscribers.lock().await;
        if subscribers.remove(client_id).is_some() {
            debug!(client_id = %client_id, connected = subscribers.len(), "push channel unregistered");
        }
    }

    /// Send an accepted event to every connected client except the
    /// originator.
    ///
    /// `try_send` keeps a slow or stuck subscriber from blocking the
    /// publisher; a full or closed channel unregisters that subscriber.
    pub async fn publish(&self, event: &SyncEvent, exclude: &ClientId) {
        let mut subscribers = self.subscribers.lock().await;
        let mut dead = Vec::new();

        for (client_id, tx) in subscribers.iter() {
            if client_id == exclude {
                continue;
            }
            let message = ServerMessage::FileEvent {
                event: event.clone(),
            };
            if let Err(e) = tx.try_send(message) {
                debug!(client_id = %client_id, error = %e, "dropping unreachable push subscriber");
                dead.push(*client_id);
            }
        }

        for client_id in dead {
            subscribers.remove(&client_id);
        }
    }

    /// Number of connected subscribers.
    pub async fn connected(&self) -> usize {
        self.subscribers.lock().await.len()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_core::{ContentHash, EventKind, OwnerId, SyncPath};
    use time::OffsetDateTime;

    fn sample_event(client_id: ClientId) -> SyncEvent {
        SyncEvent::with_content(
            OwnerId::new(),
            client_id,
            SyncPath::parse("a.txt").unwrap(),
            EventKind::Create,
            ContentHash::compute(b"x"),
            1,
            OffsetDateTime::now_utc(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_publisher_is_excluded() {
        let bus = NotificationBus::new();
        let origin = ClientId::new();
        let other = ClientId::new();

        let mut origin_rx = bus.register(origin).await;
        let mut other_rx = bus.register(other).await;

        bus.publish(&sample_event(origin), &origin).await;

        let received = other_rx.recv().await.unwrap();
        assert!(matches!(received, ServerMessage::FileEvent { .. }));
        assert!(origin_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_subscriber_is_dropped_not_blocking() {
        let bus = NotificationBus::new();
        let origin = ClientId::new();
        let slow = ClientId::new();

        // Keep the receiver alive but never drain it.
        let _slow_rx = bus.register(slow).await;
        let event = sample_event(origin);

        for _ in 0..(SUBSCRIBER_BUFFER + 1) {
            bus.publish(&event, &origin).await;
        }

        // The overflowing publish removed the stuck subscriber.
        assert_eq!(bus.connected().await, 0);
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let bus = NotificationBus::new();
        let client = ClientId::new();
        let _rx = bus.register(client).await;

        bus.unregister(&client).await;
        bus.unregister(&client).await;
        assert_eq!(bus.connected().await, 0);
    }

    #[tokio::test]
    async fn test_closed_receiver_is_pruned_on_publish() {
        let bus = NotificationBus::new();
        let origin = ClientId::new();
        let gone = ClientId::new();

        drop(bus.register(gone).await);
        bus.publish(&sample_event(origin), &origin).await;
        assert_eq!(bus.connected().await, 0);
    }
}
