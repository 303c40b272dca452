//! Bounded task processor.
//!
//! Pulls batches from the inbound topic through the consumer group,
//! authorizes each task, dispatches it downstream, and publishes chat
//! events — all under a fixed-size admission semaphore. A task leaves
//! the pending list exactly once its unit finishes, success or failure;
//! the queue never retries on its own.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use shared_types::{
    required_role, AgentMessage, AgentTaskState, AuthGate, AuthVerdict, ChatEvent, FieldError,
    TaskRecord,
};
use streamstore::{Store, StoreError, StreamEntry};

use crate::client::{self, AgentConnector, DispatchError};
use crate::config::DELEGATION_TTL;
use crate::delegation;

/// Tuning knobs for one processor instance. The topic doubles as the
/// target agent's name for role checks and event text.
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub topic: String,
    pub group: String,
    pub consumer: String,
    pub chat_channel: String,
    pub batch_size: usize,
    pub max_concurrency: usize,
    /// How long one read blocks waiting for entries
    pub read_block: Duration,
    /// Idle sleep after an empty read
    pub idle_backoff: Duration,
    /// Breather between full batches
    pub batch_pause: Duration,
    /// Retry delay after a store error in the read loop
    pub store_retry_backoff: Duration,
    /// Downstream status poll interval
    pub status_poll_interval: Duration,
    /// Expiry on staged delegation context
    pub delegation_ttl: Duration,
}

impl ProcessorSettings {
    pub fn new(topic: &str, group: &str, consumer: &str, chat_channel: &str) -> Self {
        Self {
            topic: topic.to_string(),
            group: group.to_string(),
            consumer: consumer.to_string(),
            chat_channel: chat_channel.to_string(),
            batch_size: 10,
            max_concurrency: 10,
            read_block: Duration::from_secs(5),
            idle_backoff: Duration::from_secs(1),
            batch_pause: Duration::from_millis(500),
            store_retry_backoff: Duration::from_secs(2),
            status_poll_interval: Duration::from_millis(500),
            delegation_ttl: DELEGATION_TTL,
        }
    }
}

/// Why one task's unit failed. Converted into a `failed` chat event at
/// the unit boundary; never propagated past it.
#[derive(Debug, thiserror::Error)]
enum TaskError {
    #[error("malformed task record: {0}")]
    Malformed(#[from] FieldError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

pub struct TaskProcessor {
    store: Store,
    gate: Arc<dyn AuthGate>,
    connector: Arc<dyn AgentConnector>,
    settings: ProcessorSettings,
    admission: Arc<Semaphore>,
}

impl TaskProcessor {
    pub fn new(
        store: Store,
        gate: Arc<dyn AuthGate>,
        connector: Arc<dyn AgentConnector>,
        settings: ProcessorSettings,
    ) -> Arc<Self> {
        let admission = Arc::new(Semaphore::new(settings.max_concurrency));
        Arc::new(Self {
            store,
            gate,
            connector,
            settings,
            admission,
        })
    }

    pub fn store(&self) -> Store {
        self.store.clone()
    }

    /// Consumer loop: read, fan out gated units, await the batch, repeat
    /// until cancelled. Fails startup if the group cannot be established
    /// for any reason other than already existing.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<(), StoreError> {
        self.store
            .ensure_group(&self.settings.topic, &self.settings.group)?;
        tracing::info!(
            topic = %self.settings.topic,
            group = %self.settings.group,
            consumer = %self.settings.consumer,
            "task processor started"
        );

        loop {
            let read = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                read = self.store.read_batch(
                    &self.settings.topic,
                    &self.settings.group,
                    &self.settings.consumer,
                    self.settings.batch_size,
                    self.settings.read_block,
                ) => read,
            };

            let batch = match read {
                Ok(batch) => batch,
                Err(StoreError::Closed) => return Err(StoreError::Closed),
                Err(e) => {
                    tracing::error!(error = %e, "stream read failed; backing off");
                    if Self::pause(&cancel, self.settings.store_retry_backoff).await {
                        return Ok(());
                    }
                    continue;
                }
            };

            if batch.is_empty() {
                if Self::pause(&cancel, self.settings.idle_backoff).await {
                    return Ok(());
                }
                continue;
            }

            let mut units = JoinSet::new();
            for entry in batch {
                let processor = Arc::clone(&self);
                units.spawn(processor.process_entry(entry));
            }
            // Unit failures are isolated; a panic in one never cancels
            // its siblings.
            while let Some(joined) = units.join_next().await {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "task unit aborted");
                }
            }

            if Self::pause(&cancel, self.settings.batch_pause).await {
                return Ok(());
            }
        }
    }

    /// Sleep unless cancelled first. Returns true on cancellation.
    async fn pause(cancel: &CancellationToken, wait: Duration) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(wait) => false,
        }
    }

    /// One gated unit of work. Whatever happens inside, the entry is
    /// acknowledged and deleted exactly once on the way out.
    async fn process_entry(self: Arc<Self>, entry: StreamEntry) {
        let Ok(_permit) = Arc::clone(&self.admission).acquire_owned().await else {
            // Semaphore closed only when the processor is being dropped.
            return;
        };

        let entry_id = entry.id;
        if let Err(e) = self.handle_entry(&entry).await {
            tracing::warn!(entry = %entry_id, error = %e, "task failed");
            self.emit(ChatEvent::failed(&self.settings.topic, e));
        }

        if let Err(e) = self
            .store
            .ack_delete(&self.settings.topic, &self.settings.group, entry_id)
        {
            tracing::error!(entry = %entry_id, error = %e, "acknowledgment failed");
        }
    }

    async fn handle_entry(&self, entry: &StreamEntry) -> Result<(), TaskError> {
        let record = TaskRecord::from_fields(&entry.fields)?;
        let agent = self.settings.topic.as_str();

        match self.gate.validate(&record.token).await {
            AuthVerdict::Denied { detail, status } => {
                tracing::info!(task_id = %record.task_id, status, "task rejected by auth gate");
                self.emit(ChatEvent::error(detail));
                return Ok(());
            }
            AuthVerdict::Allowed(identity) => {
                if !identity.has_role(&required_role(agent)) {
                    tracing::info!(
                        task_id = %record.task_id,
                        username = %identity.username,
                        "identity lacks required role"
                    );
                    self.emit(ChatEvent::unauthorized(&identity.username, agent));
                    return Ok(());
                }
            }
        }

        self.emit(ChatEvent::assigned(agent));
        delegation::stage_context(&self.store, &record, self.settings.delegation_ttl)?;

        let message = AgentMessage::user(
            &record.query,
            &entry.id.to_string(),
            &record.task_id,
            &record.session_id,
        );
        let agent_task_id = self.connector.submit(&message).await?;
        let snapshot = client::await_terminal(
            self.connector.as_ref(),
            &agent_task_id,
            self.settings.status_poll_interval,
        )
        .await?;

        if snapshot.state != AgentTaskState::Completed {
            return Err(DispatchError::Unsuccessful(snapshot.state).into());
        }
        let texts = snapshot.agent_texts();
        if texts.is_empty() {
            return Err(DispatchError::NoTextParts.into());
        }

        let elapsed_ms = (Utc::now() - record.timestamp).num_milliseconds().max(0);
        for text in texts {
            self.emit(ChatEvent::response(text, elapsed_ms));
        }
        tracing::info!(task_id = %record.task_id, elapsed_ms, "task completed");
        Ok(())
    }

    fn emit(&self, event: ChatEvent) {
        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "chat event serialization failed");
                return;
            }
        };
        if let Err(e) = self.store.publish(&self.settings.chat_channel, &payload) {
            tracing::warn!(error = %e, "chat event publish failed");
        }
    }
}
