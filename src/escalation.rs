//! Escalation engine: decides when a message needs human review
//!
//! Every decision is a pure function of message state. First match wins:
//!
//! 1. already escalated → never re-escalate
//! 2. confidence below threshold → `low_confidence`
//! 3. caller-set escalation reason → that reason
//! 4. otherwise → no escalation

use crate::error::{DialogueError, Result};
use crate::types::{EscalationReason, Message};
use serde::{Deserialize, Serialize};

/// Default confidence below which a message escalates
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.75;

/// Confidence below which an escalation is classified critical
const CRITICAL_CONFIDENCE: f64 = 0.5;

/// Escalation severity reported to the audit/metrics layer
///
/// Derived from confidence alone, whatever reason triggered the escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Medium,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Medium => "medium",
        }
    }
}

/// Deterministic escalation policy
#[derive(Debug, Clone, Copy)]
pub struct EscalationEngine {
    confidence_threshold: f64,
}

impl Default for EscalationEngine {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

impl EscalationEngine {
    /// Create an engine with a custom threshold in [0, 1]
    pub fn new(confidence_threshold: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&confidence_threshold) {
            return Err(DialogueError::Config(format!(
                "Escalation threshold {} outside [0, 1]",
                confidence_threshold
            )));
        }
        Ok(Self {
            confidence_threshold,
        })
    }

    pub fn threshold(&self) -> f64 {
        self.confidence_threshold
    }

    /// Whether the message must be escalated
    pub fn should_escalate(&self, message: &Message) -> bool {
        self.decide(message).is_some()
    }

    /// Reason the message escalates
    ///
    /// Messages that do not qualify report `human_review_required`.
    pub fn reason(&self, message: &Message) -> EscalationReason {
        self.decide(message)
            .unwrap_or(EscalationReason::HumanReviewRequired)
    }

    /// Severity for metrics and audit annotation
    pub fn severity(&self, message: &Message) -> Severity {
        match message.confidence {
            Some(c) if c < CRITICAL_CONFIDENCE => Severity::Critical,
            _ => Severity::Medium,
        }
    }

    /// Combined decision; `None` means no escalation
    pub fn decide(&self, message: &Message) -> Option<EscalationReason> {
        if message.is_escalated {
            return None;
        }
        if let Some(confidence) = message.confidence {
            if confidence < self.confidence_threshold {
                return Some(EscalationReason::LowConfidence);
            }
        }
        message.escalation_reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageType;

    fn answer() -> Message {
        Message::new("auditee", "auditor", "auditee_response", MessageType::Answer, "ok")
    }

    #[test]
    fn test_low_confidence_escalates() {
        let engine = EscalationEngine::default();
        let msg = answer().with_confidence(0.5);
        assert!(engine.should_escalate(&msg));
        assert_eq!(engine.reason(&msg), EscalationReason::LowConfidence);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let engine = EscalationEngine::default();
        let msg = answer().with_confidence(0.75);
        assert!(!engine.should_escalate(&msg));
    }

    #[test]
    fn test_never_re_escalates() {
        let engine = EscalationEngine::default();
        let mut msg = answer()
            .with_confidence(0.1)
            .with_escalation_reason(EscalationReason::PolicyViolation);
        msg.is_escalated = true;
        assert!(!engine.should_escalate(&msg));
        assert_eq!(engine.decide(&msg), None);
    }

    #[test]
    fn test_explicit_reason() {
        let engine = EscalationEngine::default();
        let msg = answer()
            .with_confidence(0.9)
            .with_escalation_reason(EscalationReason::HighRiskDetected);
        assert!(engine.should_escalate(&msg));
        assert_eq!(engine.reason(&msg), EscalationReason::HighRiskDetected);
    }

    #[test]
    fn test_low_confidence_wins_over_explicit_reason() {
        let engine = EscalationEngine::default();
        let msg = answer()
            .with_confidence(0.2)
            .with_escalation_reason(EscalationReason::DeadlineExceeded);
        assert_eq!(engine.reason(&msg), EscalationReason::LowConfidence);
    }

    #[test]
    fn test_no_escalation_without_signal() {
        let engine = EscalationEngine::default();
        let msg = answer();
        assert!(!engine.should_escalate(&msg));
        assert_eq!(engine.reason(&msg), EscalationReason::HumanReviewRequired);
    }

    #[test]
    fn test_decision_is_deterministic() {
        let engine = EscalationEngine::default();
        let msg = answer().with_confidence(0.6);
        let first = engine.should_escalate(&msg);
        for _ in 0..100 {
            assert_eq!(engine.should_escalate(&msg), first);
        }
    }

    #[test]
    fn test_severity_depends_only_on_confidence() {
        let engine = EscalationEngine::default();
        assert_eq!(engine.severity(&answer().with_confidence(0.4)), Severity::Critical);
        assert_eq!(engine.severity(&answer().with_confidence(0.6)), Severity::Medium);
        let policy = answer().with_escalation_reason(EscalationReason::PolicyViolation);
        assert_eq!(engine.severity(&policy), Severity::Medium);
    }

    #[test]
    fn test_custom_threshold_validation() {
        assert!(EscalationEngine::new(0.9).is_ok());
        assert!(EscalationEngine::new(1.5).is_err());
        assert!(EscalationEngine::new(-0.1).is_err());

        let strict = EscalationEngine::new(0.9).unwrap();
        assert!(strict.should_escalate(&answer().with_confidence(0.85)));
    }
}
