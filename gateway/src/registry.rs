//! Live connection registry.
//!
//! Holds the outbound sender of every WebSocket connection accepted by
//! this process. The fan-out bridge broadcasts through it; membership
//! reflects connections of this process only.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<u64, mpsc::UnboundedSender<String>>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection; the returned receiver carries its outbound
    /// payloads.
    pub fn register(&self) -> (u64, mpsc::UnboundedReceiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections
            .lock()
            .expect("registry lock poisoned")
            .insert(id, tx);
        (id, rx)
    }

    /// Drop a connection. Returns whether it was registered.
    pub fn remove(&self, id: u64) -> bool {
        self.connections
            .lock()
            .expect("registry lock poisoned")
            .remove(&id)
            .is_some()
    }

    /// Deliver a payload to every live connection, pruning any whose
    /// receiving task has gone away. Returns how many were reached.
    pub fn broadcast(&self, payload: &str) -> usize {
        let mut connections = self.connections.lock().expect("registry lock poisoned");
        let mut dead = Vec::new();
        let mut reached = 0;
        for (id, tx) in connections.iter() {
            if tx.send(payload.to_string()).is_ok() {
                reached += 1;
            } else {
                dead.push(*id);
            }
        }
        for id in dead {
            connections.remove(&id);
            tracing::debug!(conn_id = id, "pruned dead connection");
        }
        reached
    }

    pub fn len(&self) -> usize {
        self.connections
            .lock()
            .expect("registry lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_every_registered_connection() {
        let registry = ConnectionRegistry::new();
        let (_a, mut rx_a) = registry.register();
        let (_b, mut rx_b) = registry.register();

        assert_eq!(registry.broadcast("hello"), 2);
        assert_eq!(rx_a.recv().await.unwrap(), "hello");
        assert_eq!(rx_b.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn dead_connection_is_pruned_without_disturbing_others() {
        let registry = ConnectionRegistry::new();
        let (_a, mut rx_a) = registry.register();
        let (_b, rx_b) = registry.register();
        drop(rx_b);

        assert_eq!(registry.broadcast("hello"), 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(rx_a.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn removed_connection_no_longer_receives() {
        let registry = ConnectionRegistry::new();
        let (id, mut rx) = registry.register();
        assert!(registry.remove(id));
        assert!(!registry.remove(id));

        assert_eq!(registry.broadcast("hello"), 0);
        assert!(rx.recv().await.is_none());
    }
}
