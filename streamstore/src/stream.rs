//! Append-only streams with consumer-group delivery tracking.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::Notify;

use crate::error::StoreError;

/// Queue-assigned entry identifier: milliseconds since the epoch plus a
/// per-millisecond sequence number. Monotonically increasing per topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId {
    pub ms: u64,
    pub seq: u64,
}

impl EntryId {
    pub const ZERO: EntryId = EntryId { ms: 0, seq: 0 };
}

impl Default for EntryId {
    fn default() -> Self {
        EntryId::ZERO
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for EntryId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ms, seq) = s
            .split_once('-')
            .ok_or_else(|| format!("invalid entry id '{s}'"))?;
        Ok(EntryId {
            ms: ms.parse().map_err(|_| format!("invalid entry id '{s}'"))?,
            seq: seq.parse().map_err(|_| format!("invalid entry id '{s}'"))?,
        })
    }
}

/// An entry handed to a consumer: the queue-assigned id plus the stored
/// field mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: EntryId,
    pub fields: HashMap<String, String>,
}

/// Pending-list row, exposed for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInfo {
    pub id: EntryId,
    pub consumer: String,
    pub delivery_count: u32,
}

#[derive(Debug, Clone)]
struct Pending {
    consumer: String,
    delivery_count: u32,
}

#[derive(Debug, Default)]
struct GroupState {
    /// Highest entry id delivered as new to any member.
    cursor: EntryId,
    /// Delivered but not yet acknowledged, keyed by entry id.
    pending: BTreeMap<EntryId, Pending>,
    /// Entries returned by a released consumer, redelivered before new
    /// entries. Value is the prior delivery count.
    released: BTreeMap<EntryId, u32>,
}

struct TopicState {
    entries: BTreeMap<EntryId, HashMap<String, String>>,
    last_id: EntryId,
    groups: HashMap<String, GroupState>,
    notify: Arc<Notify>,
}

impl TopicState {
    fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            last_id: EntryId::ZERO,
            groups: HashMap::new(),
            notify: Arc::new(Notify::new()),
        }
    }
}

/// All stream topics of one store.
pub(crate) struct Streams {
    topics: Mutex<HashMap<String, TopicState>>,
}

impl Streams {
    pub(crate) fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
        }
    }

    fn with_topic<T>(&self, topic: &str, f: impl FnOnce(&mut TopicState) -> T) -> T {
        let mut topics = self.topics.lock().expect("streams lock poisoned");
        let state = topics
            .entry(topic.to_string())
            .or_insert_with(TopicState::new);
        f(state)
    }

    /// Create a consumer group positioned at the start of the topic.
    pub(crate) fn create_group(&self, topic: &str, group: &str) -> Result<(), StoreError> {
        self.with_topic(topic, |state| {
            if state.groups.contains_key(group) {
                return Err(StoreError::GroupExists {
                    topic: topic.to_string(),
                    group: group.to_string(),
                });
            }
            state.groups.insert(group.to_string(), GroupState::default());
            Ok(())
        })
    }

    /// Append a field mapping, returning the assigned entry id.
    pub(crate) fn append(&self, topic: &str, fields: HashMap<String, String>) -> EntryId {
        self.with_topic(topic, |state| {
            let now_ms = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);
            let id = if now_ms > state.last_id.ms {
                EntryId { ms: now_ms, seq: 0 }
            } else {
                EntryId {
                    ms: state.last_id.ms,
                    seq: state.last_id.seq + 1,
                }
            };
            state.last_id = id;
            state.entries.insert(id, fields);
            state.notify.notify_waiters();
            id
        })
    }

    /// Non-blocking half of `read_batch`: hand up to `max_count` entries
    /// to `consumer`, released entries first, then undelivered ones.
    pub(crate) fn try_read(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        max_count: usize,
    ) -> Result<Vec<StreamEntry>, StoreError> {
        self.with_topic(topic, |state| {
            // Split borrows: collect candidate ids before touching group state.
            let group_state = state.groups.get(group).ok_or(StoreError::NoSuchGroup {
                topic: topic.to_string(),
                group: group.to_string(),
            })?;

            let mut picked: Vec<(EntryId, u32)> = Vec::new();

            for (&id, &prior_count) in group_state.released.iter() {
                if picked.len() >= max_count {
                    break;
                }
                picked.push((id, prior_count));
            }

            let mut cursor = group_state.cursor;
            for (&id, _) in state
                .entries
                .range((std::ops::Bound::Excluded(cursor), std::ops::Bound::Unbounded))
            {
                if picked.len() >= max_count {
                    break;
                }
                picked.push((id, 0));
                cursor = id;
            }

            let mut batch = Vec::with_capacity(picked.len());
            let group_state = state
                .groups
                .get_mut(group)
                .expect("group checked above");
            group_state.cursor = cursor.max(group_state.cursor);

            for (id, prior_count) in picked {
                group_state.released.remove(&id);
                // A released entry may have been deleted in the meantime.
                let Some(fields) = state.entries.get(&id) else {
                    continue;
                };
                group_state.pending.insert(
                    id,
                    Pending {
                        consumer: consumer.to_string(),
                        delivery_count: prior_count + 1,
                    },
                );
                batch.push(StreamEntry {
                    id,
                    fields: fields.clone(),
                });
            }

            Ok(batch)
        })
    }

    /// Notify handle for blocking reads on a topic.
    pub(crate) fn notify_handle(&self, topic: &str) -> Arc<Notify> {
        self.with_topic(topic, |state| state.notify.clone())
    }

    /// Wake every blocked reader, used on store close.
    pub(crate) fn notify_all(&self) {
        let topics = self.topics.lock().expect("streams lock poisoned");
        for state in topics.values() {
            state.notify.notify_waiters();
        }
    }

    /// Remove an entry from a group's pending list. Returns whether the
    /// entry was pending.
    pub(crate) fn ack(&self, topic: &str, group: &str, id: EntryId) -> Result<bool, StoreError> {
        self.with_topic(topic, |state| {
            let group_state = state.groups.get_mut(group).ok_or(StoreError::NoSuchGroup {
                topic: topic.to_string(),
                group: group.to_string(),
            })?;
            let was_pending =
                group_state.pending.remove(&id).is_some() | group_state.released.remove(&id).is_some();
            Ok(was_pending)
        })
    }

    /// Reclaim an entry's storage. Returns whether the entry existed.
    pub(crate) fn delete(&self, topic: &str, id: EntryId) -> bool {
        self.with_topic(topic, |state| state.entries.remove(&id).is_some())
    }

    /// Pending list of a group, in entry order.
    pub(crate) fn pending(&self, topic: &str, group: &str) -> Result<Vec<PendingInfo>, StoreError> {
        self.with_topic(topic, |state| {
            let group_state = state.groups.get(group).ok_or(StoreError::NoSuchGroup {
                topic: topic.to_string(),
                group: group.to_string(),
            })?;
            Ok(group_state
                .pending
                .iter()
                .map(|(&id, p)| PendingInfo {
                    id,
                    consumer: p.consumer.clone(),
                    delivery_count: p.delivery_count,
                })
                .collect())
        })
    }

    /// Return a consumer's pending entries to the deliverable pool so a
    /// surviving member picks them up on its next read.
    pub(crate) fn release_consumer(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
    ) -> Result<usize, StoreError> {
        self.with_topic(topic, |state| {
            let group_state = state.groups.get_mut(group).ok_or(StoreError::NoSuchGroup {
                topic: topic.to_string(),
                group: group.to_string(),
            })?;
            let reclaimed: Vec<EntryId> = group_state
                .pending
                .iter()
                .filter(|(_, p)| p.consumer == consumer)
                .map(|(&id, _)| id)
                .collect();
            for id in &reclaimed {
                if let Some(p) = group_state.pending.remove(id) {
                    group_state.released.insert(*id, p.delivery_count);
                }
            }
            if !reclaimed.is_empty() {
                state.notify.notify_waiters();
            }
            Ok(reclaimed.len())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_id_display_round_trips() {
        let id = EntryId { ms: 1700000000123, seq: 4 };
        let parsed: EntryId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn entry_id_rejects_garbage() {
        assert!("".parse::<EntryId>().is_err());
        assert!("12".parse::<EntryId>().is_err());
        assert!("a-b".parse::<EntryId>().is_err());
    }

    #[test]
    fn entry_ids_order_by_ms_then_seq() {
        let a = EntryId { ms: 1, seq: 9 };
        let b = EntryId { ms: 2, seq: 0 };
        let c = EntryId { ms: 2, seq: 1 };
        assert!(a < b && b < c);
    }

    #[test]
    fn append_assigns_strictly_increasing_ids() {
        let streams = Streams::new();
        let mut last = EntryId::ZERO;
        for _ in 0..100 {
            let id = streams.append("t", HashMap::new());
            assert!(id > last);
            last = id;
        }
    }

    #[test]
    fn group_sees_entries_appended_before_creation() {
        let streams = Streams::new();
        let id = streams.append("t", HashMap::from([("k".into(), "v".into())]));
        streams.create_group("t", "g").unwrap();
        let batch = streams.try_read("t", "g", "c1", 10).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, id);
        assert_eq!(batch[0].fields.get("k").map(String::as_str), Some("v"));
    }

    #[test]
    fn read_on_unknown_group_fails() {
        let streams = Streams::new();
        streams.append("t", HashMap::new());
        assert!(matches!(
            streams.try_read("t", "missing", "c1", 10),
            Err(StoreError::NoSuchGroup { .. })
        ));
    }

    #[test]
    fn released_entries_are_redelivered_with_bumped_count() {
        let streams = Streams::new();
        streams.create_group("t", "g").unwrap();
        let id = streams.append("t", HashMap::new());

        let first = streams.try_read("t", "g", "c1", 10).unwrap();
        assert_eq!(first[0].id, id);
        assert!(streams.try_read("t", "g", "c2", 10).unwrap().is_empty());

        streams.release_consumer("t", "g", "c1").unwrap();
        let second = streams.try_read("t", "g", "c2", 10).unwrap();
        assert_eq!(second[0].id, id);

        let pending = streams.pending("t", "g").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].consumer, "c2");
        assert_eq!(pending[0].delivery_count, 2);
    }

    #[test]
    fn ack_and_delete_remove_every_trace() {
        let streams = Streams::new();
        streams.create_group("t", "g").unwrap();
        let id = streams.append("t", HashMap::new());
        streams.try_read("t", "g", "c1", 10).unwrap();

        assert!(streams.ack("t", "g", id).unwrap());
        assert!(streams.delete("t", id));

        assert!(streams.pending("t", "g").unwrap().is_empty());
        assert!(streams.try_read("t", "g", "c1", 10).unwrap().is_empty());
    }
}
