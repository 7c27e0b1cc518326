//! High-level dialogue bus built on pluggable providers
//!
//! `DialogueBus` validates and finalizes messages, scores answers, escalates
//! low-confidence or flagged messages to human review, appends everything to
//! the active provider and fans out to per-tenant subscribers.
//!
//! The order of a `send` is fixed: validate, assign thread, score (answers),
//! decide escalation, append the message, append the synthesized escalation,
//! record audit entries, fan out. Quality is computed before the append so the
//! stored record already carries its score.

use crate::audit::{Actor, AuditAction, AuditTrailService};
use crate::config::DialogueConfig;
use crate::error::{DialogueError, Result};
use crate::escalation::EscalationEngine;
use crate::protocol::EscalationMessage;
use crate::provider::DialogueProvider;
use crate::quality::QualityEvaluator;
use crate::subscriber::MessageSubscriber;
use crate::types::{truncate_chars, Approval, EscalationReason, JsonMap, Message, MessageType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, RwLock};

/// Agent name used for synthesized escalation messages
pub const ESCALATION_AGENT: &str = "escalation_engine";

/// Resource type used for message audit entries
const AUDIT_RESOURCE: &str = "dialogue_message";

/// Result of waiting for a human decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalOutcome {
    Approved,
    Rejected,
    /// No decision before the timeout; the message stays pending
    TimedOut,
    /// The wait was cancelled; the message stays pending
    Cancelled,
}

impl ApprovalOutcome {
    pub fn is_approved(&self) -> bool {
        matches!(self, ApprovalOutcome::Approved)
    }

    fn from_decision(message: &Message) -> Option<Self> {
        message.human_approved.map(|approved| {
            if approved {
                ApprovalOutcome::Approved
            } else {
                ApprovalOutcome::Rejected
            }
        })
    }
}

type SubscriberMap = HashMap<String, Vec<Arc<dyn MessageSubscriber>>>;
type WaiterMap = HashMap<String, Vec<oneshot::Sender<ApprovalOutcome>>>;

/// High-level dialogue bus backed by a pluggable provider
///
/// Thread-safe via internal locks; share it behind an `Arc`.
pub struct DialogueBus {
    provider: Arc<dyn DialogueProvider>,
    config: DialogueConfig,
    quality: QualityEvaluator,
    escalation: EscalationEngine,

    /// tenant id → subscribers, in registration order
    subscribers: Arc<RwLock<SubscriberMap>>,

    /// message id → outstanding approval waits
    waiters: Arc<RwLock<WaiterMap>>,

    audit: Option<Arc<AuditTrailService>>,
}

impl DialogueBus {
    /// Create a bus with the default configuration
    pub fn new(provider: impl DialogueProvider + 'static) -> Self {
        Self::from_parts(
            Arc::new(provider),
            DialogueConfig::default(),
            QualityEvaluator::default(),
            EscalationEngine::default(),
        )
    }

    /// Create a bus with a validated custom configuration
    pub fn with_config(
        provider: impl DialogueProvider + 'static,
        config: DialogueConfig,
    ) -> Result<Self> {
        Self::from_shared(Arc::new(provider), config)
    }

    /// Create a bus over a provider that is shared with other owners
    pub fn from_shared(provider: Arc<dyn DialogueProvider>, config: DialogueConfig) -> Result<Self> {
        config.validate()?;
        let quality = QualityEvaluator::new(config.quality_weights)?;
        let escalation = EscalationEngine::new(config.escalation_threshold)?;
        Ok(Self::from_parts(provider, config, quality, escalation))
    }

    fn from_parts(
        provider: Arc<dyn DialogueProvider>,
        config: DialogueConfig,
        quality: QualityEvaluator,
        escalation: EscalationEngine,
    ) -> Self {
        Self {
            provider,
            config,
            quality,
            escalation,
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            waiters: Arc::new(RwLock::new(HashMap::new())),
            audit: None,
        }
    }

    /// Record every send and approval in an audit trail
    pub fn with_audit_trail(mut self, audit: Arc<AuditTrailService>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Get the provider name
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn config(&self) -> &DialogueConfig {
        &self.config
    }

    pub fn audit_trail(&self) -> Option<&Arc<AuditTrailService>> {
        self.audit.as_ref()
    }

    /// Check whether the provider is healthy
    pub async fn health(&self) -> Result<bool> {
        self.provider.health().await
    }

    /// Validate, finalize, store and deliver a message
    ///
    /// Returns the message as stored, with `thread_id`, quality and
    /// escalation state filled in. Escalation and low quality never fail a
    /// send. A provider failure is returned after retries are exhausted;
    /// delivery is at-least-once, so callers may see duplicates on resend.
    pub async fn send(&self, mut message: Message) -> Result<Message> {
        validate_route(&message)?;
        message.validate_shape()?;

        if message.thread_id.is_none() {
            message.thread_id = Some(message.id.clone());
        }

        if message.message_type == MessageType::Answer {
            self.score(&mut message).await?;
        }

        let escalation = self.escalation.decide(&message).map(|reason| {
            message.is_escalated = true;
            message.escalation_reason = Some(reason);
            self.build_escalation(&message, reason)
        });

        self.provider.append(&message).await?;
        self.record_audit(&message, AuditAction::Create)?;

        tracing::info!(
            message_id = %message.id,
            from = %message.from_tenant,
            to = %message.to_tenant,
            message_type = %message.message_type,
            thread = %message.thread_id(),
            escalated = message.is_escalated,
            "Message sent"
        );

        if let Some(ref escalation) = escalation {
            self.provider.append(escalation).await?;
            self.record_audit(escalation, AuditAction::Create)?;

            tracing::info!(
                message_id = %message.id,
                escalation_id = %escalation.id,
                reason = ?escalation.escalation_reason,
                severity = self.escalation.severity(&message).as_str(),
                "Message escalated for human review"
            );
        }

        self.fan_out(&message).await;
        if let Some(ref escalation) = escalation {
            self.fan_out(escalation).await;
        }

        Ok(message)
    }

    /// Register a subscriber for messages addressed to a tenant
    pub async fn subscribe(&self, tenant_id: &str, subscriber: Arc<dyn MessageSubscriber>) {
        self.subscribers
            .write()
            .await
            .entry(tenant_id.to_string())
            .or_default()
            .push(subscriber);

        tracing::info!(tenant = %tenant_id, "Subscriber registered");
    }

    /// Remove every subscriber of a tenant, returning how many were removed
    pub async fn unsubscribe(&self, tenant_id: &str) -> usize {
        let removed = self
            .subscribers
            .write()
            .await
            .remove(tenant_id)
            .map(|subs| subs.len())
            .unwrap_or(0);

        tracing::info!(tenant = %tenant_id, removed, "Subscribers removed");
        removed
    }

    pub async fn subscriber_count(&self, tenant_id: &str) -> usize {
        self.subscribers
            .read()
            .await
            .get(tenant_id)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    /// All messages of a thread, in send order
    pub async fn get_thread(&self, thread_id: &str) -> Result<Vec<Message>> {
        self.provider.get_thread(thread_id).await
    }

    /// Messages sent to or from a tenant, in send order
    pub async fn get_messages_for_tenant(&self, tenant_id: &str) -> Result<Vec<Message>> {
        self.provider.get_messages_for_tenant(tenant_id).await
    }

    /// Messages sent by a tenant that still await a human decision
    pub async fn get_pending_approvals(&self, tenant_id: &str) -> Result<Vec<Message>> {
        Ok(self
            .provider
            .get_messages_for_tenant(tenant_id)
            .await?
            .into_iter()
            .filter(|m| m.from_tenant == tenant_id && m.is_pending_approval())
            .collect())
    }

    /// Approve a message; false if the id is unknown
    pub async fn approve_message(&self, message_id: &str, approver_id: &str) -> Result<bool> {
        self.decide(message_id, approver_id, true).await
    }

    /// Reject a message; false if the id is unknown
    pub async fn reject_message(&self, message_id: &str, approver_id: &str) -> Result<bool> {
        self.decide(message_id, approver_id, false).await
    }

    /// Wait until a human approves or rejects a message
    ///
    /// Resolves immediately if the message is already decided. Without an
    /// explicit timeout the configured approval timeout applies. Timing out
    /// or being cancelled leaves the message pending.
    pub async fn wait_for_approval(
        &self,
        message_id: &str,
        timeout: Option<Duration>,
    ) -> Result<ApprovalOutcome> {
        let (tx, rx) = oneshot::channel();
        self.waiters
            .write()
            .await
            .entry(message_id.to_string())
            .or_default()
            .push(tx);

        // Checked after registering so a decision in between is not lost
        let message = match self.provider.find_message(message_id).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                self.prune_waiters(message_id).await;
                return Err(DialogueError::NotFound(format!(
                    "Message not found: {}",
                    message_id
                )));
            }
            Err(e) => {
                self.prune_waiters(message_id).await;
                return Err(e);
            }
        };
        if let Some(outcome) = ApprovalOutcome::from_decision(&message) {
            drop(rx);
            self.prune_waiters(message_id).await;
            return Ok(outcome);
        }

        let timeout = timeout.unwrap_or_else(|| self.config.approval_timeout());
        let outcome = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => ApprovalOutcome::Cancelled,
            Err(_) => {
                tracing::warn!(message_id = %message_id, timeout = ?timeout, "Approval wait timed out");
                ApprovalOutcome::TimedOut
            }
        };

        self.prune_waiters(message_id).await;
        Ok(outcome)
    }

    /// Cancel every outstanding wait on a message
    ///
    /// Returns the number of waits cancelled. The message itself is untouched.
    pub async fn cancel_approval_wait(&self, message_id: &str) -> usize {
        let waiting = self.waiters.write().await.remove(message_id).unwrap_or_default();
        let cancelled = waiting
            .into_iter()
            .filter_map(|tx| tx.send(ApprovalOutcome::Cancelled).ok())
            .count();

        if cancelled > 0 {
            tracing::info!(message_id = %message_id, cancelled, "Approval waits cancelled");
        }
        cancelled
    }

    async fn decide(&self, message_id: &str, approver_id: &str, approved: bool) -> Result<bool> {
        let Some(message) = self.provider.find_message(message_id).await? else {
            tracing::debug!(message_id = %message_id, "Approval for unknown message ignored");
            return Ok(false);
        };

        let approval = Approval::new(approved, approver_id);
        if !self.provider.record_approval(message_id, &approval).await? {
            return Ok(false);
        }

        if let Some(ref audit) = self.audit {
            let mut details = JsonMap::new();
            details.insert("approved".into(), serde_json::json!(approved));
            audit.record(
                &message.from_tenant,
                Actor::User(approver_id.to_string()),
                if approved {
                    AuditAction::Approve
                } else {
                    AuditAction::Reject
                },
                AUDIT_RESOURCE,
                message_id,
                details,
                None,
            )?;
        }

        let outcome = if approved {
            ApprovalOutcome::Approved
        } else {
            ApprovalOutcome::Rejected
        };
        let waiting = self.waiters.write().await.remove(message_id).unwrap_or_default();
        for tx in waiting {
            let _ = tx.send(outcome);
        }

        tracing::info!(
            message_id = %message_id,
            approver = %approver_id,
            approved,
            "Message decision recorded"
        );

        Ok(true)
    }

    /// Score an answer against its thread and annotate the message
    async fn score(&self, message: &mut Message) -> Result<()> {
        let mut thread = self.provider.get_thread(message.thread_id()).await?;
        thread.push(message.clone());

        let result = self.quality.evaluate_detailed(message, &thread);
        message.quality_score = Some(result.score);
        message.metadata.insert(
            "quality_breakdown".into(),
            serde_json::to_value(&result.breakdown)?,
        );
        message
            .metadata
            .insert("quality_issues".into(), serde_json::json!(result.issues));

        tracing::debug!(
            message_id = %message.id,
            score = result.score,
            breakdown = ?result.breakdown,
            "Answer scored"
        );
        Ok(())
    }

    /// Synthesize the escalation that follows `original` in its thread
    fn build_escalation(&self, original: &Message, reason: EscalationReason) -> Message {
        let excerpt = truncate_chars(&original.content, self.config.excerpt_chars);
        let ellipsis = if excerpt.len() < original.content.len() {
            "..."
        } else {
            ""
        };
        let content = format!(
            "Escalation ({}): message {} from {} requires human review. Excerpt: \"{}{}\"",
            reason, original.id, original.from_agent, excerpt, ellipsis
        );

        let mut escalation = EscalationMessage::new(
            original.from_tenant.as_str(),
            original.to_tenant.as_str(),
            ESCALATION_AGENT,
            content,
        )
        .with_reason(reason)
        .into_message();

        escalation.subject = Some(format!("Escalation: {}", reason));
        escalation.parent_message_id = Some(original.id.clone());
        escalation.thread_id = Some(original.thread_id().to_string());
        escalation.project_ref = original.project_ref.clone();
        escalation.metadata.insert(
            "severity".into(),
            serde_json::json!(self.escalation.severity(original).as_str()),
        );
        escalation
    }

    fn record_audit(&self, message: &Message, action: AuditAction) -> Result<()> {
        let Some(ref audit) = self.audit else {
            return Ok(());
        };

        let mut details = JsonMap::new();
        details.insert("message_type".into(), serde_json::json!(message.message_type));
        details.insert("to_tenant".into(), serde_json::json!(message.to_tenant));
        details.insert("thread_id".into(), serde_json::json!(message.thread_id()));
        details.insert("is_escalated".into(), serde_json::json!(message.is_escalated));
        if let Some(score) = message.quality_score {
            details.insert("quality_score".into(), serde_json::json!(score));
        }

        audit.record(
            &message.from_tenant,
            Actor::Agent(message.from_agent.clone()),
            action,
            AUDIT_RESOURCE,
            &message.id,
            details,
            message.confidence,
        )?;
        Ok(())
    }

    /// Invoke the destination tenant's subscribers in registration order
    async fn fan_out(&self, message: &Message) {
        let subscribers = self
            .subscribers
            .read()
            .await
            .get(&message.to_tenant)
            .cloned()
            .unwrap_or_default();

        let timeout = self.config.subscriber_timeout();
        for subscriber in subscribers {
            match tokio::time::timeout(timeout, subscriber.on_message(message)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(
                        message_id = %message.id,
                        tenant = %message.to_tenant,
                        error = %e,
                        "Subscriber failed"
                    );
                }
                Err(_) => {
                    tracing::error!(
                        message_id = %message.id,
                        tenant = %message.to_tenant,
                        timeout = ?timeout,
                        "Subscriber timed out"
                    );
                }
            }
        }
    }

    /// Drop senders whose receiver is gone
    async fn prune_waiters(&self, message_id: &str) {
        let mut waiters = self.waiters.write().await;
        if let Some(list) = waiters.get_mut(message_id) {
            list.retain(|tx| !tx.is_closed());
            if list.is_empty() {
                waiters.remove(message_id);
            }
        }
    }
}

/// Cross-tenant routing rules
fn validate_route(message: &Message) -> Result<()> {
    if message.from_tenant == message.to_tenant {
        return Err(DialogueError::InvalidMessage(format!(
            "same tenant: cannot send from '{}' to itself",
            message.from_tenant
        )));
    }
    if message.content.trim().is_empty() {
        return Err(DialogueError::InvalidMessage("empty content".to_string()));
    }
    Ok(())
}
