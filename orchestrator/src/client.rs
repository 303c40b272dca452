//! Downstream agent endpoint client.
//!
//! The connector is a trait so the processor can be tested without a
//! live agent. The HTTP implementation posts the structured message and
//! polls the task-status endpoint at a fixed interval until a terminal
//! state is observed.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use shared_types::{AgentMessage, AgentTaskSnapshot, AgentTaskState};

/// Failures talking to or interpreting a downstream agent.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("agent request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("agent reply carried no task id")]
    MissingTaskId,

    #[error("agent task ended in state {0:?}")]
    Unsuccessful(AgentTaskState),

    #[error("agent response contained no text parts")]
    NoTextParts,
}

/// Handle-based access to one downstream agent.
#[async_trait]
pub trait AgentConnector: Send + Sync {
    /// Submit a message; returns the task id to poll.
    async fn submit(&self, message: &AgentMessage) -> Result<String, DispatchError>;

    /// Snapshot of a previously submitted task.
    async fn task_status(&self, task_id: &str) -> Result<AgentTaskSnapshot, DispatchError>;
}

#[derive(Debug, Deserialize)]
struct SubmitReply {
    task_id: Option<String>,
}

/// `reqwest`-backed connector for an agent's HTTP endpoint.
pub struct HttpAgentConnector {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAgentConnector {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { client, base_url }
    }
}

#[async_trait]
impl AgentConnector for HttpAgentConnector {
    async fn submit(&self, message: &AgentMessage) -> Result<String, DispatchError> {
        let reply: SubmitReply = self
            .client
            .post(format!("{}/messages", self.base_url))
            .json(message)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        reply.task_id.ok_or(DispatchError::MissingTaskId)
    }

    async fn task_status(&self, task_id: &str) -> Result<AgentTaskSnapshot, DispatchError> {
        Ok(self
            .client
            .get(format!("{}/tasks/{task_id}", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }
}

/// Poll the status endpoint at `interval` until a terminal state.
pub async fn await_terminal(
    connector: &dyn AgentConnector,
    task_id: &str,
    interval: Duration,
) -> Result<AgentTaskSnapshot, DispatchError> {
    loop {
        let snapshot = connector.task_status(task_id).await?;
        if snapshot.state.is_terminal() {
            return Ok(snapshot);
        }
        tracing::debug!(task_id, state = ?snapshot.state, "agent task still running");
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EventuallyDone {
        polls: AtomicUsize,
    }

    #[async_trait]
    impl AgentConnector for EventuallyDone {
        async fn submit(&self, _message: &AgentMessage) -> Result<String, DispatchError> {
            Ok("task-1".to_string())
        }

        async fn task_status(&self, _task_id: &str) -> Result<AgentTaskSnapshot, DispatchError> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst);
            let state = if n < 3 {
                AgentTaskState::Working
            } else {
                AgentTaskState::Completed
            };
            Ok(AgentTaskSnapshot {
                state,
                history: vec![],
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn await_terminal_polls_until_a_terminal_state() {
        let connector = EventuallyDone {
            polls: AtomicUsize::new(0),
        };
        let snapshot = await_terminal(&connector, "task-1", Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(snapshot.state, AgentTaskState::Completed);
        assert_eq!(connector.polls.load(Ordering::SeqCst), 4);
    }
}
