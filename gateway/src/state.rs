//! Shared state behind the WebSocket endpoint.

use std::sync::Arc;

use orchestrator::config::DELEGATION_TTL;
use orchestrator::delegation;
use shared_types::{AuthGate, TaskRecord};
use streamstore::{EntryId, Store, StoreError};

use crate::registry::ConnectionRegistry;

pub struct GatewayState {
    pub store: Store,
    pub registry: Arc<ConnectionRegistry>,
    pub gate: Arc<dyn AuthGate>,
    /// Inbound topic of the task processor
    pub task_topic: String,
    /// Channel the fan-out bridge subscribes to
    pub chat_channel: String,
}

impl GatewayState {
    /// Stage the task's delegation context, then enqueue the record on
    /// the processor's inbound topic.
    pub fn enqueue(&self, record: &TaskRecord) -> Result<EntryId, StoreError> {
        delegation::stage_context(&self.store, record, DELEGATION_TTL)?;
        self.store.append(&self.task_topic, record.to_fields())
    }
}
