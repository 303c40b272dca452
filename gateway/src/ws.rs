//! WebSocket chat endpoint.
//!
//! `GET /ws/chat?token=..&session_id=..` upgrades, validates the token,
//! and then runs a two-way loop: inbound text frames become queued task
//! records, outbound payloads come from the fan-out bridge through this
//! connection's registry channel. A failed validation closes with 1008.

use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;

use shared_types::{AuthVerdict, ChatEvent, TaskRecord};

use crate::state::GatewayState;

#[derive(Debug, Deserialize)]
pub struct ChatParams {
    pub token: String,
    pub session_id: String,
}

pub async fn chat_ws(
    ws: WebSocketUpgrade,
    Query(params): Query<ChatParams>,
    State(state): State<Arc<GatewayState>>,
) -> Response {
    ws.on_upgrade(move |socket| chat_session(socket, params, state))
}

async fn chat_session(mut socket: WebSocket, params: ChatParams, state: Arc<GatewayState>) {
    let identity = match state.gate.validate(&params.token).await {
        AuthVerdict::Allowed(identity) => identity,
        AuthVerdict::Denied { status, detail } => {
            tracing::info!(status, detail = %detail, "chat connection rejected");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: detail.into(),
                })))
                .await;
            return;
        }
    };

    let (conn_id, mut outbound) = state.registry.register();
    tracing::info!(
        conn_id,
        username = %identity.username,
        session_id = %params.session_id,
        "chat connection opened"
    );

    if let Err(e) = state.store.publish(
        &state.chat_channel,
        &format!("Welcome to the chat {}", identity.username),
    ) {
        tracing::warn!(error = %e, "welcome publish failed");
    }

    loop {
        tokio::select! {
            outgoing = outbound.recv() => {
                match outgoing {
                    Some(payload) => {
                        if socket.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    // Pruned by the bridge or the process is shutting down.
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let record =
                            TaskRecord::new(text.as_str(), &params.token, &params.session_id);
                        tracing::debug!(conn_id, task_id = %record.task_id, "task enqueued");
                        if let Err(e) = state.enqueue(&record) {
                            tracing::error!(conn_id, error = %e, "task enqueue failed");
                            send_error(&mut socket, "Failed to queue task").await;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(conn_id, error = %e, "websocket receive error");
                        break;
                    }
                }
            }
        }
    }

    state.registry.remove(conn_id);
    if let Err(e) = state.store.publish(
        &state.chat_channel,
        &format!("{} left the chat.", identity.username),
    ) {
        tracing::debug!(error = %e, "leave publish failed");
    }
    tracing::info!(conn_id, username = %identity.username, "chat connection closed");
}

async fn send_error(socket: &mut WebSocket, detail: &str) {
    if let Ok(payload) = serde_json::to_string(&ChatEvent::error(detail)) {
        let _ = socket.send(Message::Text(payload.into())).await;
    }
}
