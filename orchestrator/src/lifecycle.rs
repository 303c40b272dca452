//! Start/stop lifecycle for the consumer loop.
//!
//! The hosting process calls `start` around its own serve loop and
//! `stop` on shutdown. Teardown order is fixed: cancel the loop, await
//! its cooperative exit, then close the store.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use streamstore::{Store, StoreError};

use crate::processor::TaskProcessor;

/// Handle to a running processor loop.
pub struct ProcessorHandle {
    cancel: CancellationToken,
    join: JoinHandle<Result<(), StoreError>>,
    store: Store,
}

/// Launch the consumer loop on the current runtime.
pub fn start(processor: Arc<TaskProcessor>) -> ProcessorHandle {
    let cancel = CancellationToken::new();
    let store = processor.store();
    let join = tokio::spawn({
        let cancel = cancel.clone();
        async move { processor.run(cancel).await }
    });
    ProcessorHandle {
        cancel,
        join,
        store,
    }
}

impl ProcessorHandle {
    /// Cancel the loop, await its exit, then close the store.
    pub async fn stop(self) {
        self.cancel.cancel();
        match self.join.await {
            Ok(Ok(())) => tracing::info!("task processor stopped"),
            Ok(Err(e)) => tracing::error!(error = %e, "task processor exited with error"),
            Err(e) => tracing::error!(error = %e, "task processor task aborted"),
        }
        self.store.close();
    }

    /// Whether the loop has already exited on its own.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}
