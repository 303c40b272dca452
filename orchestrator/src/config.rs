use std::time::Duration;

use crate::processor::ProcessorSettings;

/// Orchestrator process configuration, environment-driven.
#[derive(Debug, Clone)]
pub struct Config {
    /// Inbound topic; also names the target agent for role checks
    pub topic: String,
    /// Consumer group shared by orchestrator replicas
    pub group: String,
    /// This replica's consumer name within the group
    pub consumer: String,
    /// Channel where status/result events are published
    pub chat_channel: String,
    /// Base URL of the downstream agent endpoint
    pub agent_base_url: String,
    /// JWKS document used to verify bearer tokens
    pub jwks_url: String,
    /// Entries pulled per read
    pub batch_size: usize,
    /// Admission semaphore capacity
    pub max_concurrency: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            topic: env_str("TOPIC_NAME", "orchestrator"),
            group: env_str("GROUP_NAME", "orchestrator-group"),
            consumer: env_str("CONSUMER_NAME", "orchestrator-1"),
            chat_channel: env_str("CHAT_CHANNEL_NAME", "chat"),
            agent_base_url: env_str("AGENT_SERVER_URL", "http://localhost:8002"),
            jwks_url: env_str(
                "JWKS_URL",
                "http://localhost:8080/realms/agents/protocol/openid-connect/certs",
            ),
            batch_size: env_parse("TASK_BATCH_SIZE", 10)?,
            max_concurrency: env_parse("TASK_MAX_CONCURRENCY", 10)?,
        })
    }

    pub fn processor_settings(&self) -> ProcessorSettings {
        ProcessorSettings {
            batch_size: self.batch_size,
            max_concurrency: self.max_concurrency,
            ..ProcessorSettings::new(&self.topic, &self.group, &self.consumer, &self.chat_channel)
        }
    }
}

pub(crate) fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

pub(crate) fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}

/// Fixed expiry on delegation context records.
pub const DELEGATION_TTL: Duration = Duration::from_secs(60);
