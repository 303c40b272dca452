//! Shared types between the gateway and the agent services
//!
//! These types cross process boundaries:
//! - Task records stored as field mappings on the stream queue
//! - Chat events published on the fan-out channel
//! - Downstream agent wire messages
//!
//! Serializable with serde for JSON over WebSocket/HTTP.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod auth;

pub use auth::{required_role, AuthGate, AuthVerdict, TokenData};

// ============================================================================
// Task Record
// ============================================================================

/// One user-submitted query, immutable once enqueued.
///
/// The stream queue stores this as an opaque string-to-string field
/// mapping; `to_fields`/`from_fields` are the serialization contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRecord {
    /// Opaque unique identifier, generated by the enqueuing side
    pub task_id: String,

    /// UTF-8 text payload
    pub query: String,

    /// Bearer credential, opaque to the queue
    pub token: String,

    /// Correlates a task to a logical conversation
    pub session_id: String,

    /// Creation instant, used to compute round-trip latency
    pub timestamp: DateTime<Utc>,
}

/// A required field was missing or unreadable in a stored mapping.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum FieldError {
    #[error("missing field '{0}'")]
    Missing(&'static str),

    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),
}

impl TaskRecord {
    /// Build a fresh record for a query received on a live connection.
    pub fn new(query: impl Into<String>, token: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            query: query.into(),
            token: token.into(),
            session_id: session_id.into(),
            timestamp: Utc::now(),
        }
    }

    /// Convert to the field mapping stored on the stream.
    pub fn to_fields(&self) -> HashMap<String, String> {
        HashMap::from([
            ("task_id".to_string(), self.task_id.clone()),
            ("query".to_string(), self.query.clone()),
            ("token".to_string(), self.token.clone()),
            ("session_id".to_string(), self.session_id.clone()),
            ("timestamp".to_string(), self.timestamp.to_rfc3339()),
        ])
    }

    /// Rebuild a record from a stored field mapping.
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, FieldError> {
        fn take<'a>(
            fields: &'a HashMap<String, String>,
            key: &'static str,
        ) -> Result<&'a String, FieldError> {
            fields.get(key).ok_or(FieldError::Missing(key))
        }

        let raw_ts = take(fields, "timestamp")?;
        let timestamp = DateTime::parse_from_rfc3339(raw_ts)
            .map_err(|_| FieldError::InvalidTimestamp(raw_ts.clone()))?
            .with_timezone(&Utc);

        Ok(Self {
            task_id: take(fields, "task_id")?.clone(),
            query: take(fields, "query")?.clone(),
            token: take(fields, "token")?.clone(),
            session_id: take(fields, "session_id")?.clone(),
            timestamp,
        })
    }
}

// ============================================================================
// Chat Events (fan-out channel payload)
// ============================================================================

/// Processing status carried on the chat channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatStatus {
    Assigned,
    Unauthorized,
    Error,
    Failed,
    Completed,
}

/// Event published on the chat channel and fanned out to every live
/// connection of the originating gateway process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatEvent {
    pub status: ChatStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Set to "response" on completed agent replies
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_response: Option<String>,

    /// Wall-clock milliseconds between enqueue and completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_taken: Option<i64>,
}

impl ChatEvent {
    pub fn assigned(agent_name: &str) -> Self {
        Self::status_message(
            ChatStatus::Assigned,
            format!("Task assigned to {agent_name} agent"),
        )
    }

    pub fn unauthorized(username: &str, agent_name: &str) -> Self {
        Self::status_message(
            ChatStatus::Unauthorized,
            format!("{username} is not authorized to access {agent_name}"),
        )
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self::status_message(ChatStatus::Error, detail)
    }

    pub fn failed(agent_name: &str, detail: impl std::fmt::Display) -> Self {
        Self::status_message(
            ChatStatus::Failed,
            format!("Task failed for {agent_name}: {detail}"),
        )
    }

    pub fn response(text: impl Into<String>, time_taken_ms: i64) -> Self {
        Self {
            status: ChatStatus::Completed,
            message: None,
            kind: Some("response".to_string()),
            agent_response: Some(text.into()),
            time_taken: Some(time_taken_ms),
        }
    }

    fn status_message(status: ChatStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Some(message.into()),
            kind: None,
            agent_response: None,
            time_taken: None,
        }
    }
}

// ============================================================================
// Downstream Agent Wire Types
// ============================================================================

/// One part of a downstream agent message. Only text parts are understood.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessagePart {
    pub kind: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl MessagePart {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: Some(text.into()),
        }
    }
}

/// Structured message accepted by a downstream agent endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentMessage {
    pub role: String,
    pub parts: Vec<MessagePart>,
    pub kind: String,
    pub message_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
}

impl AgentMessage {
    /// Build the user message dispatched for a task record.
    pub fn user(query: &str, message_id: &str, task_id: &str, context_id: &str) -> Self {
        Self {
            role: "user".to_string(),
            parts: vec![MessagePart::text(query)],
            kind: "message".to_string(),
            message_id: message_id.to_string(),
            task_id: Some(task_id.to_string()),
            context_id: Some(context_id.to_string()),
        }
    }
}

/// Downstream task state as reported by the agent's status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentTaskState {
    Submitted,
    Working,
    InputRequired,
    Completed,
    Failed,
    Canceled,
    Rejected,
}

impl AgentTaskState {
    /// Whether polling should stop at this state.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Submitted | Self::Working)
    }
}

/// Snapshot returned by the agent's task-status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentTaskSnapshot {
    pub state: AgentTaskState,

    /// Role-tagged message history, populated on completion
    #[serde(default)]
    pub history: Vec<AgentMessage>,
}

impl AgentTaskSnapshot {
    /// Text parts of agent-role history messages, in publish order.
    pub fn agent_texts(&self) -> Vec<String> {
        self.history
            .iter()
            .filter(|m| m.role == "agent")
            .flat_map(|m| m.parts.iter())
            .filter_map(|p| p.text.clone())
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_record_field_mapping_round_trips() {
        let record = TaskRecord::new("what is the capital of france", "tok", "session-1");
        let fields = record.to_fields();
        let restored = TaskRecord::from_fields(&fields).unwrap();
        assert_eq!(restored, record);
    }

    #[test]
    fn task_record_missing_field_is_an_error() {
        let record = TaskRecord::new("q", "tok", "s");
        let mut fields = record.to_fields();
        fields.remove("token");
        assert_eq!(
            TaskRecord::from_fields(&fields),
            Err(FieldError::Missing("token"))
        );
    }

    #[test]
    fn task_record_bad_timestamp_is_an_error() {
        let record = TaskRecord::new("q", "tok", "s");
        let mut fields = record.to_fields();
        fields.insert("timestamp".to_string(), "yesterday".to_string());
        assert!(matches!(
            TaskRecord::from_fields(&fields),
            Err(FieldError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn chat_event_response_wire_shape() {
        let event = ChatEvent::response("Paris", 42);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "status": "completed",
                "type": "response",
                "agent_response": "Paris",
                "time_taken": 42,
            })
        );
    }

    #[test]
    fn chat_event_status_only_omits_optional_fields() {
        let event = ChatEvent::assigned("wikipedia");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "status": "assigned",
                "message": "Task assigned to wikipedia agent",
            })
        );
    }

    #[test]
    fn agent_task_state_terminality() {
        assert!(!AgentTaskState::Submitted.is_terminal());
        assert!(!AgentTaskState::Working.is_terminal());
        assert!(AgentTaskState::InputRequired.is_terminal());
        assert!(AgentTaskState::Completed.is_terminal());
        assert!(AgentTaskState::Failed.is_terminal());
        assert!(AgentTaskState::Canceled.is_terminal());
        assert!(AgentTaskState::Rejected.is_terminal());
    }

    #[test]
    fn agent_task_state_wire_names_are_kebab_case() {
        let state: AgentTaskState = serde_json::from_str("\"input-required\"").unwrap();
        assert_eq!(state, AgentTaskState::InputRequired);
    }

    #[test]
    fn snapshot_extracts_only_agent_text_parts() {
        let snapshot = AgentTaskSnapshot {
            state: AgentTaskState::Completed,
            history: vec![
                AgentMessage::user("q", "m1", "t1", "c1"),
                AgentMessage {
                    role: "agent".to_string(),
                    parts: vec![
                        MessagePart::text("Paris"),
                        MessagePart {
                            kind: "data".to_string(),
                            text: None,
                        },
                    ],
                    kind: "message".to_string(),
                    message_id: "m2".to_string(),
                    task_id: None,
                    context_id: None,
                },
            ],
        };
        assert_eq!(snapshot.agent_texts(), vec!["Paris".to_string()]);
    }
}
