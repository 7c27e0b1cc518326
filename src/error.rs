//! Error types for a3s-dialogue

use thiserror::Error;

/// Errors that can occur in the dialogue system
#[derive(Debug, Error)]
pub enum DialogueError {
    /// Message rejected by validation (same tenant, empty content)
    ///
    /// Never retried automatically; the caller must fix the input.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Backend delivery failed after all retries were exhausted
    #[error("Failed to deliver message to '{target}': {reason}")]
    Delivery {
        target: String,
        reason: String,
    },

    /// Configuration rejected at configuration time
    #[error("Configuration error: {0}")]
    Config(String),

    /// Backend connection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Stream creation or management error
    #[error("Stream error: {0}")]
    Stream(String),

    /// Consumer group creation or read error
    #[error("Consumer error: {0}")]
    Consumer(String),

    /// Acknowledgement failure
    #[error("Failed to acknowledge message: {0}")]
    Ack(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Message, log entry or consumer not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Provider-specific failure
    #[error("Provider error: {0}")]
    Provider(String),
}

impl DialogueError {
    /// Whether a failed backend call may succeed on retry
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DialogueError::Connection(_)
                | DialogueError::Stream(_)
                | DialogueError::Timeout(_)
                | DialogueError::Provider(_)
        )
    }
}

/// Result type alias for dialogue operations
pub type Result<T> = std::result::Result<T, DialogueError>;
