//! In-process coordination store
//!
//! The single source of shared mutable state between the gateway and the
//! agent services. Three facilities behind one cloneable handle:
//!
//! - **Streams**: append-only per-topic logs with consumer-group cursor
//!   tracking. Each entry is delivered to exactly one group member per
//!   delivery attempt and stays on the group's pending list until it is
//!   acknowledged, so a crashed consumer's work is redeliverable.
//! - **Pub/sub**: named channels with per-subscriber ordered delivery.
//! - **Hashes**: keyed field mappings with optional expiry, used for
//!   short-lived delegation context.
//!
//! `Store::close()` makes every subsequent operation fail with
//! [`StoreError::Closed`] and wakes blocked readers, which is what lets
//! hosting processes tear down in a fixed order (cancel loops, await
//! them, then close the store).

mod error;
mod hashes;
mod pubsub;
mod store;
mod stream;

pub use error::StoreError;
pub use pubsub::Subscription;
pub use store::Store;
pub use stream::{EntryId, PendingInfo, StreamEntry};
