//! Chat gateway library
//!
//! Accepts WebSocket chat connections, enqueues each text frame as a
//! task record on the processor's inbound topic, and fans chat-channel
//! payloads back out to every live connection of this process.

pub mod bridge;
pub mod config;
pub mod lifecycle;
pub mod registry;
pub mod state;
pub mod ws;

pub use config::Config;
pub use lifecycle::BridgeHandle;
pub use registry::ConnectionRegistry;
pub use state::GatewayState;
