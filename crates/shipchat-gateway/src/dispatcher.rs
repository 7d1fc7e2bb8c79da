use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};

use shipchat_types::events::GatewayEvent;

/// Fans global gateway events out to every connection and tracks who is
/// connected.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for gateway events; every connection receives every event
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// Open connections per user id (a crew member may have several tabs)
    connections: RwLock<HashMap<String, usize>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to gateway events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients.
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Record a new connection. Returns how many the user now has open.
    pub async fn connect(&self, user_id: &str) -> usize {
        let mut connections = self.inner.connections.write().await;
        let count = connections.entry(user_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Record a closed connection. Returns how many the user still has open.
    pub async fn disconnect(&self, user_id: &str) -> usize {
        let mut connections = self.inner.connections.write().await;
        let Some(count) = connections.get_mut(user_id) else {
            return 0;
        };
        *count = count.saturating_sub(1);
        let left = *count;
        if left == 0 {
            connections.remove(user_id);
        }
        left
    }

    pub async fn connected_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.inner.connections.read().await.keys().cloned().collect();
        users.sort();
        users
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connection_counting() {
        let dispatcher = Dispatcher::new();
        assert_eq!(dispatcher.connect("user_a").await, 1);
        assert_eq!(dispatcher.connect("user_a").await, 2);
        assert_eq!(dispatcher.connect("user_b").await, 1);
        assert_eq!(dispatcher.connected_users().await, vec!["user_a", "user_b"]);

        assert_eq!(dispatcher.disconnect("user_a").await, 1);
        assert_eq!(dispatcher.disconnect("user_a").await, 0);
        assert_eq!(dispatcher.disconnect("user_a").await, 0);
        assert_eq!(dispatcher.connected_users().await, vec!["user_b"]);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();
        dispatcher.broadcast(GatewayEvent::CleanupNotice {
            text: "2 old messages cleared".into(),
        });
        match rx.recv().await.unwrap() {
            GatewayEvent::CleanupNotice { text } => assert_eq!(text, "2 old messages cleared"),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
