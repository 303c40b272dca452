//! Orchestrator service library
//!
//! Consumes task records from the inbound stream topic via a consumer
//! group, authorizes each task, dispatches it to the downstream agent,
//! and publishes status/result events on the chat channel. Hosted by a
//! process that calls `lifecycle::start` around its own serve loop.

pub mod client;
pub mod config;
pub mod delegation;
pub mod lifecycle;
pub mod processor;

pub use client::{AgentConnector, DispatchError, HttpAgentConnector};
pub use config::Config;
pub use lifecycle::ProcessorHandle;
pub use processor::{ProcessorSettings, TaskProcessor};
