//! The cloneable store handle shared by every component of a process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::StoreError;
use crate::hashes::Hashes;
use crate::pubsub::{PubSub, Subscription};
use crate::stream::{EntryId, PendingInfo, StreamEntry, Streams};

struct StoreInner {
    streams: Streams,
    pubsub: PubSub,
    hashes: Hashes,
    closed: AtomicBool,
}

/// Handle to the in-process store. Clones share state; `close()` on any
/// clone fails all subsequent operations and wakes blocked readers.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                streams: Streams::new(),
                pubsub: PubSub::new(),
                hashes: Hashes::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    fn guard(&self) -> Result<(), StoreError> {
        if self.inner.closed.load(Ordering::Acquire) {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    /// Fail every subsequent operation and wake blocked readers and
    /// subscribers. Idempotent.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.streams.notify_all();
            self.inner.pubsub.clear();
            tracing::debug!("store closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // Streams
    // ------------------------------------------------------------------

    /// Create a consumer group at the start of a topic; fails with
    /// [`StoreError::GroupExists`] if it is already there.
    pub fn create_group(&self, topic: &str, group: &str) -> Result<(), StoreError> {
        self.guard()?;
        self.inner.streams.create_group(topic, group)
    }

    /// Idempotent group creation: an existing group is not an error and
    /// its cursor is left untouched.
    pub fn ensure_group(&self, topic: &str, group: &str) -> Result<(), StoreError> {
        match self.create_group(topic, group) {
            Ok(()) => {
                tracing::debug!(topic, group, "consumer group created");
                Ok(())
            }
            Err(StoreError::GroupExists { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Append a field mapping to a topic. Never blocks on consumers.
    pub fn append(
        &self,
        topic: &str,
        fields: HashMap<String, String>,
    ) -> Result<EntryId, StoreError> {
        self.guard()?;
        Ok(self.inner.streams.append(topic, fields))
    }

    /// Read up to `max_count` undelivered entries for `consumer`,
    /// blocking up to `max_wait` when none are immediately available.
    /// A timeout returns an empty batch, not an error.
    pub async fn read_batch(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        max_count: usize,
        max_wait: Duration,
    ) -> Result<Vec<StreamEntry>, StoreError> {
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            self.guard()?;

            // Register interest before checking, so an append between the
            // check and the await cannot be missed.
            let notify = self.inner.streams.notify_handle(topic);
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.inner.streams.try_read(topic, group, consumer, max_count)?;
            if !batch.is_empty() {
                return Ok(batch);
            }

            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(Vec::new()),
            }
        }
    }

    /// Remove an entry from the group's pending list. Returns whether it
    /// was pending.
    pub fn ack(&self, topic: &str, group: &str, id: EntryId) -> Result<bool, StoreError> {
        self.guard()?;
        self.inner.streams.ack(topic, group, id)
    }

    /// Reclaim an entry's storage. Returns whether it existed.
    pub fn delete(&self, topic: &str, id: EntryId) -> Result<bool, StoreError> {
        self.guard()?;
        Ok(self.inner.streams.delete(topic, id))
    }

    /// Acknowledge and delete together, so a processed entry neither
    /// lingers in the pending list nor survives as a re-deliverable
    /// phantom.
    pub fn ack_delete(&self, topic: &str, group: &str, id: EntryId) -> Result<(), StoreError> {
        self.ack(topic, group, id)?;
        self.delete(topic, id)?;
        Ok(())
    }

    /// Inspect a group's pending list.
    pub fn pending(&self, topic: &str, group: &str) -> Result<Vec<PendingInfo>, StoreError> {
        self.guard()?;
        self.inner.streams.pending(topic, group)
    }

    /// Return a (crashed) consumer's pending entries to the deliverable
    /// pool. Returns how many entries were released.
    pub fn release_consumer(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
    ) -> Result<usize, StoreError> {
        self.guard()?;
        self.inner.streams.release_consumer(topic, group, consumer)
    }

    // ------------------------------------------------------------------
    // Pub/sub
    // ------------------------------------------------------------------

    /// Publish a payload to a channel; returns the subscriber count
    /// reached.
    pub fn publish(&self, channel: &str, payload: &str) -> Result<usize, StoreError> {
        self.guard()?;
        Ok(self.inner.pubsub.publish(channel, payload))
    }

    /// Subscribe to a channel. The subscription unsubscribes on drop.
    pub fn subscribe(&self, channel: &str) -> Result<Subscription, StoreError> {
        self.guard()?;
        Ok(self.inner.pubsub.subscribe(channel))
    }

    // ------------------------------------------------------------------
    // Hashes
    // ------------------------------------------------------------------

    /// Merge fields into the mapping at `key`.
    pub fn hset(&self, key: &str, fields: HashMap<String, String>) -> Result<(), StoreError> {
        self.guard()?;
        self.inner.hashes.hset(key, fields);
        Ok(())
    }

    /// Arm a TTL on `key`. Returns false when the key is absent.
    pub fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.guard()?;
        Ok(self.inner.hashes.expire(key, ttl))
    }

    /// Read the full mapping at `key`; empty when absent or expired.
    pub fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.guard()?;
        Ok(self.inner.hashes.hgetall(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closed_store_fails_every_operation() {
        let store = Store::new();
        store.close();
        assert_eq!(store.append("t", HashMap::new()), Err(StoreError::Closed));
        assert_eq!(store.publish("c", "x"), Err(StoreError::Closed));
        assert!(matches!(store.subscribe("c"), Err(StoreError::Closed)));
        assert_eq!(store.hset("k", HashMap::new()), Err(StoreError::Closed));
        assert_eq!(
            store
                .read_batch("t", "g", "c1", 10, Duration::from_secs(5))
                .await,
            Err(StoreError::Closed)
        );
    }

    #[tokio::test]
    async fn close_wakes_a_blocked_reader() {
        let store = Store::new();
        store.ensure_group("t", "g").unwrap();

        let reader = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .read_batch("t", "g", "c1", 10, Duration::from_secs(30))
                    .await
            })
        };

        tokio::task::yield_now().await;
        store.close();
        let result = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .expect("reader should wake promptly")
            .unwrap();
        assert_eq!(result, Err(StoreError::Closed));
    }

    #[tokio::test]
    async fn blocked_reader_wakes_on_append() {
        let store = Store::new();
        store.ensure_group("t", "g").unwrap();

        let reader = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .read_batch("t", "g", "c1", 10, Duration::from_secs(30))
                    .await
            })
        };

        tokio::task::yield_now().await;
        store
            .append("t", HashMap::from([("k".into(), "v".into())]))
            .unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .expect("reader should wake promptly")
            .unwrap()
            .unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn read_timeout_returns_empty_not_error() {
        let store = Store::new();
        store.ensure_group("t", "g").unwrap();
        let batch = store
            .read_batch("t", "g", "c1", 10, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(batch.is_empty());
    }
}
