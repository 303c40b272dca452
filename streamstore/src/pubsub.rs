//! Named channels with per-subscriber ordered delivery.
//!
//! Each subscriber gets a dedicated unbounded queue, so one slow
//! subscriber never blocks publishers or siblings, and delivery order
//! for a single subscriber matches publish order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

struct PubSubInner {
    /// channel name -> subscriber id -> sender
    channels: HashMap<String, HashMap<u64, mpsc::UnboundedSender<String>>>,
    next_id: u64,
}

pub(crate) struct PubSub {
    inner: Arc<Mutex<PubSubInner>>,
}

impl PubSub {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(PubSubInner {
                channels: HashMap::new(),
                next_id: 0,
            })),
        }
    }

    /// Deliver a payload to every current subscriber of a channel.
    /// Returns the number of subscribers reached; closed subscribers are
    /// pruned as they are found.
    pub(crate) fn publish(&self, channel: &str, payload: &str) -> usize {
        let mut inner = self.inner.lock().expect("pubsub lock poisoned");
        let Some(subscribers) = inner.channels.get_mut(channel) else {
            return 0;
        };
        let mut delivered = 0;
        subscribers.retain(|_, tx| match tx.send(payload.to_string()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => false,
        });
        if subscribers.is_empty() {
            inner.channels.remove(channel);
        }
        delivered
    }

    /// Register a new subscriber. The subscription unsubscribes on drop.
    pub(crate) fn subscribe(&self, channel: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().expect("pubsub lock poisoned");
        let id = inner.next_id;
        inner.next_id += 1;
        inner
            .channels
            .entry(channel.to_string())
            .or_default()
            .insert(id, tx);
        Subscription {
            channel: channel.to_string(),
            id,
            rx,
            registry: Arc::clone(&self.inner),
        }
    }

    /// Drop every subscriber sender so blocked `recv` calls observe end
    /// of stream. Used on store close.
    pub(crate) fn clear(&self) {
        let mut inner = self.inner.lock().expect("pubsub lock poisoned");
        inner.channels.clear();
    }
}

/// One subscriber's ordered view of a channel.
///
/// Dropping the subscription releases the underlying registration, so
/// no dangling subscriber survives its owner.
pub struct Subscription {
    channel: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<String>,
    registry: Arc<Mutex<PubSubInner>>,
}

impl Subscription {
    /// Next payload in publish order, or `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.registry.lock() {
            if let Some(subscribers) = inner.channels.get_mut(&self.channel) {
                subscribers.remove(&self.id);
                if subscribers.is_empty() {
                    inner.channels.remove(&self.channel);
                }
            }
        }
    }
}
