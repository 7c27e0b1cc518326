//! Core message types for the a3s-dialogue system
//!
//! All structs use camelCase JSON serialization for wire compatibility;
//! enumerations serialize as snake_case strings.

use crate::error::{DialogueError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque key/value map carried by messages (`structured_content`, `metadata`)
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Kind of a dialogue message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Question,
    Answer,
    Clarification,
    EvidenceRequest,
    EvidenceSubmit,
    Escalation,
    FollowUp,
    Acknowledgment,
}

impl MessageType {
    /// Wire name of the message type
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Question => "question",
            MessageType::Answer => "answer",
            MessageType::Clarification => "clarification",
            MessageType::EvidenceRequest => "evidence_request",
            MessageType::EvidenceSubmit => "evidence_submit",
            MessageType::Escalation => "escalation",
            MessageType::FollowUp => "follow_up",
            MessageType::Acknowledgment => "acknowledgment",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a message was escalated to human review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    LowConfidence,
    DeadlineExceeded,
    HighRiskDetected,
    HumanReviewRequired,
    PolicyViolation,
}

impl EscalationReason {
    /// Wire name of the reason
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationReason::LowConfidence => "low_confidence",
            EscalationReason::DeadlineExceeded => "deadline_exceeded",
            EscalationReason::HighRiskDetected => "high_risk_detected",
            EscalationReason::HumanReviewRequired => "human_review_required",
            EscalationReason::PolicyViolation => "policy_violation",
        }
    }
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EscalationReason {
    type Err = DialogueError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "low_confidence" => Ok(EscalationReason::LowConfidence),
            "deadline_exceeded" => Ok(EscalationReason::DeadlineExceeded),
            "high_risk_detected" => Ok(EscalationReason::HighRiskDetected),
            "human_review_required" => Ok(EscalationReason::HumanReviewRequired),
            "policy_violation" => Ok(EscalationReason::PolicyViolation),
            other => Err(DialogueError::Config(format!(
                "Unknown escalation reason '{}'",
                other
            ))),
        }
    }
}

/// File attached to a message, addressed by content hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub file_name: String,
    pub file_type: String,
    /// SHA-256 of the file content, hex-encoded
    pub file_hash: String,
    #[serde(default)]
    pub file_size_bytes: u64,
}

impl Attachment {
    pub fn new(
        file_name: impl Into<String>,
        file_type: impl Into<String>,
        file_hash: impl Into<String>,
        file_size_bytes: u64,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            file_type: file_type.into(),
            file_hash: file_hash.into(),
            file_size_bytes,
        }
    }
}

/// A single dialogue message exchanged between two tenants
///
/// Immutable once sent: the bus only fills in derived fields
/// (`thread_id`, `quality_score`, escalation and approval state).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique message identifier (msg-<uuid>)
    pub id: String,

    pub timestamp: DateTime<Utc>,

    pub from_tenant: String,
    pub to_tenant: String,
    pub from_agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_agent: Option<String>,

    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub content: String,
    #[serde(default)]
    pub structured_content: JsonMap,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<String>,
    /// Thread this message belongs to; unset means "start a new thread"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    #[serde(default)]
    pub attachments: Vec<Attachment>,

    /// Sender's confidence in the content (0.0-1.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Automatic quality rating, answers only (0.0-1.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,

    /// None = not yet reviewed
    #[serde(default)]
    pub human_approved: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub is_escalated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_reason: Option<EscalationReason>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
    #[serde(default)]
    pub metadata: JsonMap,
}

impl Message {
    /// Create a new message with auto-generated id and timestamp
    pub fn new(
        from_tenant: impl Into<String>,
        to_tenant: impl Into<String>,
        from_agent: impl Into<String>,
        message_type: MessageType,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("msg-{}", uuid::Uuid::new_v4()),
            timestamp: Utc::now(),
            from_tenant: from_tenant.into(),
            to_tenant: to_tenant.into(),
            from_agent: from_agent.into(),
            to_agent: None,
            message_type,
            subject: None,
            content: content.into(),
            structured_content: JsonMap::new(),
            project_ref: None,
            parent_message_id: None,
            thread_id: None,
            attachments: Vec::new(),
            confidence: None,
            quality_score: None,
            human_approved: None,
            approved_by: None,
            approved_at: None,
            is_escalated: false,
            escalation_reason: None,
            processing_time_ms: None,
            metadata: JsonMap::new(),
        }
    }

    pub fn with_to_agent(mut self, agent: impl Into<String>) -> Self {
        self.to_agent = Some(agent.into());
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_project(mut self, project_ref: impl Into<String>) -> Self {
        self.project_ref = Some(project_ref.into());
        self
    }

    /// Reply within an existing thread
    pub fn in_reply_to(mut self, parent: &Message) -> Self {
        self.parent_message_id = Some(parent.id.clone());
        self.thread_id = Some(parent.thread_id().to_string());
        self
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn with_escalation_reason(mut self, reason: EscalationReason) -> Self {
        self.escalation_reason = Some(reason);
        self
    }

    pub fn with_structured(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.structured_content.insert(key.into(), value);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Effective thread id: the assigned thread, or the message's own id
    pub fn thread_id(&self) -> &str {
        self.thread_id.as_deref().unwrap_or(&self.id)
    }

    /// Whether this message started its thread
    pub fn is_thread_root(&self) -> bool {
        self.thread_id() == self.id
    }

    /// Whether the message still awaits a human decision
    pub fn is_pending_approval(&self) -> bool {
        self.human_approved.is_none()
    }

    /// Shape validation independent of delivery
    ///
    /// Cross-tenant rules are enforced by the bus, not here.
    pub fn validate_shape(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(DialogueError::InvalidMessage("missing id".to_string()));
        }
        if self.from_agent.is_empty() {
            return Err(DialogueError::InvalidMessage("missing from_agent".to_string()));
        }
        if let Some(c) = self.confidence {
            if !(0.0..=1.0).contains(&c) {
                return Err(DialogueError::InvalidMessage(format!(
                    "confidence {} outside [0, 1]",
                    c
                )));
            }
        }
        if let Some(q) = self.quality_score {
            if !(0.0..=1.0).contains(&q) {
                return Err(DialogueError::InvalidMessage(format!(
                    "quality score {} outside [0, 1]",
                    q
                )));
            }
        }
        Ok(())
    }
}

/// A human decision on a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Approval {
    pub approved: bool,
    pub approved_by: String,
    pub approved_at: DateTime<Utc>,
}

impl Approval {
    pub fn new(approved: bool, approved_by: impl Into<String>) -> Self {
        Self {
            approved,
            approved_by: approved_by.into(),
            approved_at: Utc::now(),
        }
    }

    /// Overlay this decision onto a message
    pub fn apply(&self, message: &mut Message) {
        message.human_approved = Some(self.approved);
        message.approved_by = Some(self.approved_by.clone());
        message.approved_at = Some(self.approved_at);
    }
}

/// Minimal real-time event handed to the notification layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogueNotification {
    pub id: String,
    pub from_agent: String,
    pub message_type: MessageType,
    /// Content truncated to [`NOTIFICATION_EXCERPT_CHARS`] characters
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Maximum content characters carried by a notification
pub const NOTIFICATION_EXCERPT_CHARS: usize = 200;

impl From<&Message> for DialogueNotification {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            from_agent: message.from_agent.clone(),
            message_type: message.message_type,
            content: truncate_chars(&message.content, NOTIFICATION_EXCERPT_CHARS).to_string(),
            timestamp: message.timestamp,
        }
    }
}

/// Truncate to at most `max` characters on a char boundary
pub(crate) fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question() -> Message {
        Message::new(
            "auditor-1",
            "auditee-1",
            "auditor_planner",
            MessageType::Question,
            "Please describe your access review process.",
        )
    }

    #[test]
    fn test_message_creation() {
        let msg = question();
        assert!(msg.id.starts_with("msg-"));
        assert_eq!(msg.from_tenant, "auditor-1");
        assert_eq!(msg.to_tenant, "auditee-1");
        assert!(msg.thread_id.is_none());
        assert_eq!(msg.thread_id(), msg.id);
        assert!(msg.is_thread_root());
        assert!(msg.is_pending_approval());
        assert!(!msg.is_escalated);
    }

    #[test]
    fn test_reply_inherits_thread() {
        let q = question().with_thread("thread-1");
        let a = Message::new(
            "auditee-1",
            "auditor-1",
            "auditee_response",
            MessageType::Answer,
            "Quarterly.",
        )
        .in_reply_to(&q);

        assert_eq!(a.thread_id.as_deref(), Some("thread-1"));
        assert_eq!(a.parent_message_id.as_deref(), Some(q.id.as_str()));
        assert!(!a.is_thread_root());
    }

    #[test]
    fn test_message_serialization_roundtrip() {
        let msg = question()
            .with_confidence(0.9)
            .with_attachment(Attachment::new("policy.pdf", "pdf", "ab12", 1024))
            .with_structured("priority", serde_json::json!("high"));

        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"fromTenant\":\"auditor-1\""));
        assert!(json.contains("\"messageType\":\"question\""));
        assert!(!json.contains("qualityScore"));

        let parsed: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, msg.id);
        assert_eq!(parsed.attachments.len(), 1);
        assert_eq!(parsed.structured_content["priority"], "high");
        assert_eq!(parsed.human_approved, None);
    }

    #[test]
    fn test_message_type_wire_names() {
        let json = serde_json::to_string(&MessageType::EvidenceRequest).unwrap();
        assert_eq!(json, "\"evidence_request\"");
        assert_eq!(MessageType::FollowUp.as_str(), "follow_up");
        let parsed: MessageType = serde_json::from_str("\"acknowledgment\"").unwrap();
        assert_eq!(parsed, MessageType::Acknowledgment);
    }

    #[test]
    fn test_escalation_reason_parse() {
        assert_eq!(
            "policy_violation".parse::<EscalationReason>().unwrap(),
            EscalationReason::PolicyViolation
        );
        assert!("bogus".parse::<EscalationReason>().is_err());
        assert_eq!(EscalationReason::LowConfidence.to_string(), "low_confidence");
    }

    #[test]
    fn test_validate_shape() {
        assert!(question().validate_shape().is_ok());
        assert!(question().with_confidence(1.2).validate_shape().is_err());

        let mut msg = question();
        msg.from_agent.clear();
        assert!(matches!(
            msg.validate_shape(),
            Err(DialogueError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_notification_truncates_content() {
        let long = "あ".repeat(300);
        let msg = Message::new("a", "b", "agent", MessageType::Answer, long);
        let note = DialogueNotification::from(&msg);
        assert_eq!(note.content.chars().count(), NOTIFICATION_EXCERPT_CHARS);
        assert_eq!(note.id, msg.id);
        assert_eq!(note.message_type, MessageType::Answer);
    }

    #[test]
    fn test_truncate_chars_short_input() {
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abcdef", 3), "abc");
    }
}
