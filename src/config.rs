//! Bus configuration
//!
//! Constructed by the caller (or deserialized with serde); every field has a
//! default so partial JSON documents are accepted.

use crate::error::{DialogueError, Result};
use crate::escalation::DEFAULT_CONFIDENCE_THRESHOLD;
use crate::quality::QualityWeights;
use crate::types::NOTIFICATION_EXCERPT_CHARS;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Seven days, the default human-approval wait
pub const DEFAULT_APPROVAL_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

/// Configuration for a `DialogueBus`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DialogueConfig {
    /// Confidence below which a message is escalated
    pub escalation_threshold: f64,

    /// Quality sub-score weights
    pub quality_weights: QualityWeights,

    /// Per-callback timeout for subscriber fan-out
    pub subscriber_timeout_ms: u64,

    /// Default timeout for `wait_for_approval`
    pub approval_timeout_secs: u64,

    /// Characters of the original content quoted in escalation messages
    pub excerpt_chars: usize,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            escalation_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            quality_weights: QualityWeights::default(),
            subscriber_timeout_ms: 5_000,
            approval_timeout_secs: DEFAULT_APPROVAL_TIMEOUT_SECS,
            excerpt_chars: NOTIFICATION_EXCERPT_CHARS,
        }
    }
}

impl DialogueConfig {
    /// Reject out-of-range values
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.escalation_threshold) {
            return Err(DialogueError::Config(format!(
                "escalationThreshold {} outside [0, 1]",
                self.escalation_threshold
            )));
        }
        self.quality_weights.validate()?;
        if self.subscriber_timeout_ms == 0 {
            return Err(DialogueError::Config(
                "subscriberTimeoutMs must be positive".to_string(),
            ));
        }
        if self.approval_timeout_secs == 0 {
            return Err(DialogueError::Config(
                "approvalTimeoutSecs must be positive".to_string(),
            ));
        }
        if self.excerpt_chars == 0 {
            return Err(DialogueError::Config(
                "excerptChars must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn subscriber_timeout(&self) -> Duration {
        Duration::from_millis(self.subscriber_timeout_ms)
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout_secs)
    }
}
