//! Fan-out bridge.
//!
//! One subscription per process: every payload published on the chat
//! channel is pushed to every live connection in the registry. Payload
//! bytes are forwarded untouched, in publish order.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use streamstore::{Store, StoreError};

use crate::registry::ConnectionRegistry;

/// Forward chat-channel payloads to registered connections until
/// cancelled or the channel is torn down.
pub async fn run(
    store: Store,
    channel: String,
    registry: Arc<ConnectionRegistry>,
    cancel: CancellationToken,
) -> Result<(), StoreError> {
    let mut subscription = store.subscribe(&channel)?;
    tracing::info!(channel = %channel, "fan-out bridge started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            payload = subscription.recv() => {
                match payload {
                    Some(payload) => {
                        let reached = registry.broadcast(&payload);
                        tracing::debug!(reached, "chat payload fanned out");
                    }
                    // Publisher side torn down, the store is closing.
                    None => return Ok(()),
                }
            }
        }
    }
}
