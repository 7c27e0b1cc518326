//! NATS JetStream configuration

use serde::{Deserialize, Serialize};

/// JetStream storage backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    File,
    Memory,
}

/// Configuration for the NATS broker provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,

    /// JetStream stream name
    pub stream_name: String,

    /// Subject prefix; messages publish to `{subject_prefix}.{to_tenant}`
    pub subject_prefix: String,

    pub storage: StorageType,

    /// Maximum messages retained by the stream (0 = unlimited)
    pub max_messages: i64,

    /// Maximum message age in seconds (0 = unlimited)
    pub max_age_secs: u64,

    pub connect_timeout_secs: u64,

    pub request_timeout_secs: u64,

    /// Optional auth token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_string(),
            stream_name: "A3S_DIALOGUE".to_string(),
            subject_prefix: "dialogue".to_string(),
            storage: StorageType::File,
            max_messages: 1_000_000,
            max_age_secs: 0,
            connect_timeout_secs: 5,
            request_timeout_secs: 10,
            token: None,
        }
    }
}

impl NatsConfig {
    /// Subject a tenant's messages are published to
    ///
    /// Subject tokens cannot contain `.`, `*`, `>` or whitespace. Those bytes
    /// and `%` itself are percent-encoded, so distinct tenant ids always map
    /// to distinct subjects.
    pub fn tenant_subject(&self, tenant_id: &str) -> String {
        let mut token = String::with_capacity(tenant_id.len());
        for c in tenant_id.chars() {
            if matches!(c, '.' | '*' | '>' | '%') || c.is_whitespace() {
                let mut buf = [0u8; 4];
                for byte in c.encode_utf8(&mut buf).bytes() {
                    token.push_str(&format!("%{:02X}", byte));
                }
            } else {
                token.push(c);
            }
        }
        format!("{}.{}", self.subject_prefix, token)
    }

    /// Subjects captured by the stream
    pub fn stream_subjects(&self) -> Vec<String> {
        vec![format!("{}.>", self.subject_prefix)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NatsConfig::default();
        assert_eq!(config.url, "nats://127.0.0.1:4222");
        assert_eq!(config.stream_name, "A3S_DIALOGUE");
        assert_eq!(config.storage, StorageType::File);
        assert!(config.token.is_none());
    }

    #[test]
    fn test_tenant_subject() {
        let config = NatsConfig::default();
        assert_eq!(config.tenant_subject("acme"), "dialogue.acme");
        assert_eq!(config.tenant_subject("acme.eu west"), "dialogue.acme%2Eeu%20west");
        assert_eq!(config.stream_subjects(), vec!["dialogue.>".to_string()]);
    }

    #[test]
    fn test_tenant_subjects_do_not_collide() {
        let config = NatsConfig::default();
        let ids = ["acme.eu", "acme_eu", "acme%2Eeu", "acme eu", "acme*eu", "acme>eu"];
        let subjects: std::collections::HashSet<_> =
            ids.iter().map(|id| config.tenant_subject(id)).collect();
        assert_eq!(subjects.len(), ids.len());
        assert_eq!(config.tenant_subject("acme_eu"), "dialogue.acme_eu");
        assert_eq!(config.tenant_subject("acme%2Eeu"), "dialogue.acme%252Eeu");
    }

    #[test]
    fn test_storage_serialization() {
        let json = serde_json::to_string(&StorageType::Memory).unwrap();
        assert_eq!(json, "\"memory\"");
        let config: NatsConfig = serde_json::from_str(r#"{"storage":"memory"}"#).unwrap();
        assert_eq!(config.storage, StorageType::Memory);
        assert_eq!(config.subject_prefix, "dialogue");
    }
}
