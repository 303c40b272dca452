//! Start/stop lifecycle for the fan-out bridge.
//!
//! Same teardown order as the task processor: cancel the loop, await
//! its cooperative exit, then close the store.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use streamstore::{Store, StoreError};

use crate::bridge;
use crate::registry::ConnectionRegistry;

/// Handle to a running fan-out bridge.
pub struct BridgeHandle {
    cancel: CancellationToken,
    join: JoinHandle<Result<(), StoreError>>,
    store: Store,
}

/// Launch the bridge on the current runtime.
pub fn start(store: Store, channel: &str, registry: Arc<ConnectionRegistry>) -> BridgeHandle {
    let cancel = CancellationToken::new();
    let join = tokio::spawn(bridge::run(
        store.clone(),
        channel.to_string(),
        registry,
        cancel.clone(),
    ));
    BridgeHandle {
        cancel,
        join,
        store,
    }
}

impl BridgeHandle {
    /// Cancel the loop, await its exit, then close the store.
    pub async fn stop(self) {
        self.cancel.cancel();
        match self.join.await {
            Ok(Ok(())) => tracing::info!("fan-out bridge stopped"),
            Ok(Err(e)) => tracing::error!(error = %e, "fan-out bridge exited with error"),
            Err(e) => tracing::error!(error = %e, "fan-out bridge task aborted"),
        }
        self.store.close();
    }

    /// Whether the loop has already exited on its own.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}
