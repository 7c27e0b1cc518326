//! Typed message specializations
//!
//! Each builder pre-sets `message_type` and carries type-specific fields
//! in `structured_content`, so every specialization travels as a plain
//! [`Message`] on the wire.

use crate::types::{EscalationReason, Message, MessageType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Question priority
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

/// Verification state of submitted evidence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    #[default]
    Pending,
    Verified,
    Rejected,
}

/// Auditor → auditee question
#[derive(Debug, Clone)]
pub struct QuestionMessage {
    pub base: Message,
    pub deadline: Option<DateTime<Utc>>,
    pub priority: Priority,
}

impl QuestionMessage {
    pub fn new(
        from_tenant: impl Into<String>,
        to_tenant: impl Into<String>,
        from_agent: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            base: Message::new(from_tenant, to_tenant, from_agent, MessageType::Question, content),
            deadline: None,
            priority: Priority::default(),
        }
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn into_message(self) -> Message {
        let mut msg = self.base;
        if let Some(deadline) = self.deadline {
            msg.structured_content
                .insert("deadline".into(), serde_json::json!(deadline.to_rfc3339()));
        }
        msg.structured_content
            .insert("priority".into(), serde_json::json!(self.priority));
        msg
    }
}

/// Auditee → auditor answer
#[derive(Debug, Clone)]
pub struct AnswerMessage {
    pub base: Message,
    pub referenced_documents: Vec<String>,
    /// Whether the answer reuses an earlier response
    pub is_reused: bool,
    pub source_response_id: Option<String>,
}

impl AnswerMessage {
    pub fn new(
        from_tenant: impl Into<String>,
        to_tenant: impl Into<String>,
        from_agent: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            base: Message::new(from_tenant, to_tenant, from_agent, MessageType::Answer, content),
            referenced_documents: Vec::new(),
            is_reused: false,
            source_response_id: None,
        }
    }

    pub fn with_referenced_document(mut self, doc: impl Into<String>) -> Self {
        self.referenced_documents.push(doc.into());
        self
    }

    pub fn reused_from(mut self, response_id: impl Into<String>) -> Self {
        self.is_reused = true;
        self.source_response_id = Some(response_id.into());
        self
    }

    pub fn into_message(self) -> Message {
        let mut msg = self.base;
        if !self.referenced_documents.is_empty() {
            msg.structured_content.insert(
                "referenced_documents".into(),
                serde_json::json!(self.referenced_documents),
            );
        }
        if self.is_reused {
            msg.structured_content
                .insert("is_reused".into(), serde_json::json!(true));
        }
        if let Some(id) = self.source_response_id {
            msg.structured_content
                .insert("source_response_id".into(), serde_json::json!(id));
        }
        msg
    }
}

/// Auditor → auditee evidence request
#[derive(Debug, Clone)]
pub struct EvidenceRequestMessage {
    pub base: Message,
    pub evidence_description: String,
    pub accepted_formats: Vec<String>,
    pub deadline: Option<DateTime<Utc>>,
}

impl EvidenceRequestMessage {
    pub fn new(
        from_tenant: impl Into<String>,
        to_tenant: impl Into<String>,
        from_agent: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            base: Message::new(
                from_tenant,
                to_tenant,
                from_agent,
                MessageType::EvidenceRequest,
                content,
            ),
            evidence_description: String::new(),
            accepted_formats: vec!["pdf".into(), "xlsx".into(), "csv".into()],
            deadline: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.evidence_description = description.into();
        self
    }

    pub fn with_formats(mut self, formats: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.accepted_formats = formats.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn into_message(self) -> Message {
        let mut msg = self.base;
        msg.structured_content.insert(
            "evidence_description".into(),
            serde_json::json!(self.evidence_description),
        );
        msg.structured_content
            .insert("accepted_formats".into(), serde_json::json!(self.accepted_formats));
        if let Some(deadline) = self.deadline {
            msg.structured_content
                .insert("deadline".into(), serde_json::json!(deadline.to_rfc3339()));
        }
        msg
    }
}

/// Auditee → auditor evidence submission
#[derive(Debug, Clone)]
pub struct EvidenceSubmitMessage {
    pub base: Message,
    pub evidence_ids: Vec<String>,
    pub verification_status: VerificationStatus,
}

impl EvidenceSubmitMessage {
    pub fn new(
        from_tenant: impl Into<String>,
        to_tenant: impl Into<String>,
        from_agent: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            base: Message::new(
                from_tenant,
                to_tenant,
                from_agent,
                MessageType::EvidenceSubmit,
                content,
            ),
            evidence_ids: Vec::new(),
            verification_status: VerificationStatus::default(),
        }
    }

    pub fn with_evidence(mut self, evidence_id: impl Into<String>) -> Self {
        self.evidence_ids.push(evidence_id.into());
        self
    }

    pub fn into_message(self) -> Message {
        let mut msg = self.base;
        msg.structured_content
            .insert("evidence_ids".into(), serde_json::json!(self.evidence_ids));
        msg.structured_content.insert(
            "verification_status".into(),
            serde_json::json!(self.verification_status),
        );
        msg
    }
}

/// Agent → human escalation
#[derive(Debug, Clone)]
pub struct EscalationMessage {
    pub base: Message,
    pub reason: EscalationReason,
    pub urgency: Priority,
}

impl EscalationMessage {
    pub fn new(
        from_tenant: impl Into<String>,
        to_tenant: impl Into<String>,
        from_agent: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            base: Message::new(from_tenant, to_tenant, from_agent, MessageType::Escalation, content),
            reason: EscalationReason::HumanReviewRequired,
            urgency: Priority::High,
        }
    }

    pub fn with_reason(mut self, reason: EscalationReason) -> Self {
        self.reason = reason;
        self
    }

    /// Escalation messages are born escalated so they never re-escalate
    pub fn into_message(self) -> Message {
        let mut msg = self.base;
        msg.is_escalated = true;
        msg.escalation_reason = Some(self.reason);
        msg.structured_content
            .insert("urgency".into(), serde_json::json!(self.urgency));
        msg
    }
}
