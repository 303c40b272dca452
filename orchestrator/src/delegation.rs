//! Ephemeral delegation records.
//!
//! Immediately before a dispatch, the task's field mapping is staged
//! under a well-known key with a fixed expiry. A delegation tool reads
//! it back to recover session context, substitutes the sub-query, and
//! appends the result onto the target agent's inbound topic. The expiry
//! bounds the blast radius of an abandoned delegation.

use std::time::Duration;

use shared_types::TaskRecord;
use streamstore::{EntryId, Store, StoreError};

/// Key the delegation tool reads its context from.
pub const DELEGATION_CONTEXT_KEY: &str = "queue_message_to_agent";

#[derive(Debug, thiserror::Error)]
pub enum DelegationError {
    #[error("delegation context missing or expired")]
    ContextExpired,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Stage a task's context for an imminent delegation.
pub fn stage_context(store: &Store, record: &TaskRecord, ttl: Duration) -> Result<(), StoreError> {
    store.hset(DELEGATION_CONTEXT_KEY, record.to_fields())?;
    store.expire(DELEGATION_CONTEXT_KEY, ttl)?;
    Ok(())
}

/// Recover the staged context, swap in the delegated sub-query, and
/// enqueue it on the topic named after the target agent.
pub fn delegate_to_agent(
    store: &Store,
    agent_name: &str,
    query: &str,
) -> Result<EntryId, DelegationError> {
    let mut fields = store.hgetall(DELEGATION_CONTEXT_KEY)?;
    if fields.is_empty() {
        return Err(DelegationError::ContextExpired);
    }
    fields.insert("query".to_string(), query.to_string());
    Ok(store.append(agent_name, fields)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::TaskRecord;

    #[tokio::test]
    async fn delegation_carries_session_context_with_the_new_query() {
        let store = Store::new();
        let record = TaskRecord::new("original question", "tok", "session-9");
        stage_context(&store, &record, Duration::from_secs(60)).unwrap();

        delegate_to_agent(&store, "wikipedia", "refined question").unwrap();

        store.ensure_group("wikipedia", "g").unwrap();
        let batch = store
            .read_batch("wikipedia", "g", "c1", 10, Duration::from_millis(10))
            .await
            .unwrap();
        let delegated = TaskRecord::from_fields(&batch[0].fields).unwrap();
        assert_eq!(delegated.query, "refined question");
        assert_eq!(delegated.session_id, "session-9");
        assert_eq!(delegated.task_id, record.task_id);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_context_fails_the_delegation() {
        let store = Store::new();
        let record = TaskRecord::new("q", "tok", "s");
        stage_context(&store, &record, Duration::from_secs(60)).unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;

        assert!(matches!(
            delegate_to_agent(&store, "wikipedia", "late"),
            Err(DelegationError::ContextExpired)
        ));
    }
}
