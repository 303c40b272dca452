//! Keyed field mappings with optional expiry.
//!
//! Backs the ephemeral delegation records: written just before a
//! dispatch, read back by the delegated side, and garbage-collected
//! after their TTL whether or not they were consumed.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

struct HashEntry {
    fields: HashMap<String, String>,
    expires_at: Option<Instant>,
}

impl HashEntry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

pub(crate) struct Hashes {
    inner: Mutex<HashMap<String, HashEntry>>,
}

impl Hashes {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Merge fields into the mapping at `key`, creating it if absent.
    /// Writing does not touch an existing expiry.
    pub(crate) fn hset(&self, key: &str, fields: HashMap<String, String>) {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("hashes lock poisoned");
        inner.retain(|_, entry| !entry.expired(now));
        match inner.get_mut(key) {
            Some(entry) => entry.fields.extend(fields),
            None => {
                inner.insert(
                    key.to_string(),
                    HashEntry {
                        fields,
                        expires_at: None,
                    },
                );
            }
        }
    }

    /// Arm or refresh the TTL on a key. Returns false if the key is
    /// absent or already expired.
    pub(crate) fn expire(&self, key: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("hashes lock poisoned");
        match inner.get_mut(key) {
            Some(entry) if !entry.expired(now) => {
                entry.expires_at = Some(now + ttl);
                true
            }
            _ => false,
        }
    }

    /// Full field mapping at `key`; empty if absent or expired. An
    /// expired key is purged on the way out.
    pub(crate) fn hgetall(&self, key: &str) -> HashMap<String, String> {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("hashes lock poisoned");
        match inner.get(key) {
            Some(entry) if !entry.expired(now) => entry.fields.clone(),
            Some(_) => {
                inner.remove(key);
                HashMap::new()
            }
            None => HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn hset_merges_and_hgetall_reads_back() {
        let hashes = Hashes::new();
        hashes.hset("k", fields(&[("a", "1")]));
        hashes.hset("k", fields(&[("b", "2")]));
        assert_eq!(hashes.hgetall("k"), fields(&[("a", "1"), ("b", "2")]));
    }

    #[tokio::test]
    async fn absent_key_reads_empty() {
        let hashes = Hashes::new();
        assert!(hashes.hgetall("missing").is_empty());
        assert!(!hashes.expire("missing", Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_garbage_collects_regardless_of_consumption() {
        let hashes = Hashes::new();
        hashes.hset("k", fields(&[("a", "1")]));
        assert!(hashes.expire("k", Duration::from_secs(60)));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(hashes.hgetall("k"), fields(&[("a", "1")]));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(hashes.hgetall("k").is_empty());
        // Purged entries cannot be revived by a new expire.
        assert!(!hashes.expire("k", Duration::from_secs(60)));
    }
}
