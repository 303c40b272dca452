/// Errors surfaced by the store.
///
/// `GroupExists` is the expected outcome of re-creating a consumer group
/// and is swallowed by `ensure_group`; everything else propagates to the
/// caller.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store handle has been closed; the owning process is shutting down.
    #[error("store is closed")]
    Closed,

    /// Consumer group already exists on this topic.
    #[error("consumer group '{group}' already exists on topic '{topic}'")]
    GroupExists { topic: String, group: String },

    /// Operation referenced a consumer group that was never created.
    #[error("no consumer group '{group}' on topic '{topic}'")]
    NoSuchGroup { topic: String, group: String },
}
