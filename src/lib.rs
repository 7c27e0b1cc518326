//! # a3s-dialogue
//!
//! Cross-tenant dialogue bus with a trust layer for the A3S ecosystem.
//!
//! ## Overview
//!
//! `a3s-dialogue` carries typed messages between agents of different
//! tenants (auditor ↔ auditee), scores answers, escalates low-confidence
//! messages to human review, and records every step in a tamper-evident
//! hash-chained audit trail. Swap backends (in-memory, Redis Streams,
//! NATS JetStream) without changing application code.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_dialogue::{DialogueBus, Message, MessageType};
//! use a3s_dialogue::provider::memory::MemoryProvider;
//!
//! # async fn example() -> a3s_dialogue::Result<()> {
//! let bus = DialogueBus::new(MemoryProvider::new());
//!
//! let question = bus
//!     .send(Message::new(
//!         "auditor-1",
//!         "auditee-1",
//!         "auditor_planner",
//!         MessageType::Question,
//!         "Please provide the Q3 bank reconciliation.",
//!     ))
//!     .await?;
//!
//! let thread = bus.get_thread(question.thread_id()).await?;
//! assert_eq!(thread.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Providers
//!
//! - **memory**: In-memory log for testing and single-process use
//! - **redis**: Redis Streams with consumer groups and pending-entry tracking
//! - **nats**: NATS JetStream fan-out over a durable inner provider
//!
//! ## Architecture
//!
//! - **DialogueProvider** trait: core abstraction all backends implement
//! - **DialogueBus**: send pipeline, subscriptions and human approvals
//! - **QualityEvaluator** / **EscalationEngine**: answer scoring and review routing
//! - **AuditTrailService**: SHA-256 hash chain over every recorded action
//! - **ExecutionPolicyGate** / **Governance**: per-tenant auto-execution policy and oversight

pub mod audit;
pub mod bus;
pub mod config;
pub mod error;
pub mod escalation;
pub mod governance;
pub mod policy;
pub mod protocol;
pub mod provider;
pub mod quality;
pub mod retry;
pub mod subscriber;
pub mod types;

// Re-export core types
pub use audit::{
    Actor, AgentDecisionRecord, AuditAction, AuditEntry, AuditTrailService, HashChain,
    GENESIS_HASH,
};
pub use bus::{ApprovalOutcome, DialogueBus, ESCALATION_AGENT};
pub use config::DialogueConfig;
pub use error::{DialogueError, Result};
pub use escalation::{EscalationEngine, Severity};
pub use governance::{
    Anomaly, Governance, GovernanceConfig, GovernanceLogEntry, GovernanceStats, ReviewStatus,
};
pub use policy::{
    agent_risk_tier, ExecutionDecision, ExecutionMode, ExecutionPolicyGate, GateCheck,
    PolicyConfig, RiskTier,
};
pub use protocol::{
    AnswerMessage, EscalationMessage, EvidenceRequestMessage, EvidenceSubmitMessage, Priority,
    QuestionMessage, VerificationStatus,
};
pub use provider::{DialogueProvider, MessageDeduplicator};
pub use quality::{QualityBreakdown, QualityEvaluator, QualityResult, QualityWeights};
pub use retry::RetryConfig;
pub use subscriber::{notification_fn, subscriber_fn, MessageSubscriber};
pub use types::{
    Approval, Attachment, DialogueNotification, EscalationReason, JsonMap, Message, MessageType,
};

// Re-export providers for convenience
pub use provider::memory::MemoryProvider;
pub use provider::nats::{NatsClient, NatsConfig, NatsProvider, StorageType};
pub use provider::redis::{RedisConfig, RedisStreamClient, RedisStreamProvider};
