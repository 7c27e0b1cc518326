//! Redis Streams provider configuration

use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the Redis Streams provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RedisConfig {
    /// Redis server URL
    pub url: String,

    /// Prefix for every stream and hash key
    pub key_prefix: String,

    /// Prefix for consumer group names
    pub group_prefix: String,

    /// Maximum entries returned by one consumer-group read
    pub read_count: usize,

    /// How long a consumer-group read blocks waiting for entries (0 = don't block)
    pub block_ms: usize,

    /// Retry policy for writes
    pub retry: RetryConfig,

    /// Upper bound for establishing the initial connection
    pub connect_timeout_ms: u64,

    /// Reconnect attempts made by the connection manager
    pub connect_retries: usize,

    /// Threads kept in the local fallback cache
    pub cache_max_threads: usize,

    /// Messages kept per cached thread
    pub cache_max_messages: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "dialogue".to_string(),
            group_prefix: "cg".to_string(),
            read_count: 100,
            block_ms: 0,
            retry: RetryConfig::default(),
            connect_timeout_ms: 5_000,
            connect_retries: 3,
            cache_max_threads: 1_000,
            cache_max_messages: 200,
        }
    }
}

impl RedisConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Stream carrying everything sent to or from a tenant
    ///
    /// Format: `{key_prefix}:{tenant_id}`
    pub fn tenant_stream(&self, tenant_id: &str) -> String {
        format!("{}:{}", self.key_prefix, tenant_id)
    }

    /// Stream carrying one thread
    ///
    /// Format: `{key_prefix}:thread:{thread_id}`
    pub fn thread_stream(&self, thread_id: &str) -> String {
        format!("{}:thread:{}", self.key_prefix, thread_id)
    }

    /// Consumer group for a tenant's stream
    ///
    /// Format: `{group_prefix}:{tenant_id}`
    pub fn group_name(&self, tenant_id: &str) -> String {
        format!("{}:{}", self.group_prefix, tenant_id)
    }

    /// Hash of message id → serialized message
    pub fn messages_key(&self) -> String {
        format!("{}:messages", self.key_prefix)
    }

    /// Hash of message id → serialized approval
    pub fn approvals_key(&self) -> String {
        format!("{}:approvals", self.key_prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RedisConfig::default();
        assert_eq!(config.url, "redis://127.0.0.1:6379");
        assert_eq!(config.read_count, 100);
        assert_eq!(config.block_ms, 0);
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.cache_max_threads, 1_000);
    }

    #[test]
    fn test_key_layout() {
        let config = RedisConfig::default();
        assert_eq!(config.tenant_stream("acme"), "dialogue:acme");
        assert_eq!(config.thread_stream("msg-1"), "dialogue:thread:msg-1");
        assert_eq!(config.group_name("acme"), "cg:acme");
        assert_eq!(config.approvals_key(), "dialogue:approvals");
    }

    #[test]
    fn test_config_serialization() {
        let config = RedisConfig {
            key_prefix: "test".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("keyPrefix"));

        let parsed: RedisConfig = serde_json::from_str(r#"{"keyPrefix":"x"}"#).unwrap();
        assert_eq!(parsed.key_prefix, "x");
        assert_eq!(parsed.group_prefix, "cg");
    }
}
