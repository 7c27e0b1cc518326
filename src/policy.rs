//! Execution policy gate
//!
//! Decides per tenant whether an agent action may run without a human
//! approval. The decision itself is a pure function of the tenant's
//! `PolicyConfig` and the request:
//!
//! - `audit` → never auto-execute
//! - `autonomous` → always auto-execute
//! - `assist` → auto-execute only if the agent is allowed, the confidence
//!   meets the threshold (inclusive) and the amount is within the limit,
//!   checked in that order
//!
//! A request whose confidence lies outside [0, 1] or whose amount is negative
//! or not finite is denied in every mode.

use crate::error::{DialogueError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;

/// How much autonomy a tenant grants its agents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Every action needs a human approval
    #[default]
    Audit,
    /// High-confidence actions run automatically
    Assist,
    /// Everything runs automatically under governance
    Autonomous,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Audit => "audit",
            ExecutionMode::Assist => "assist",
            ExecutionMode::Autonomous => "autonomous",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = DialogueError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "audit" => Ok(ExecutionMode::Audit),
            "assist" => Ok(ExecutionMode::Assist),
            "autonomous" => Ok(ExecutionMode::Autonomous),
            other => Err(DialogueError::Config(format!(
                "Unknown execution mode '{}'",
                other
            ))),
        }
    }
}

/// Impact class of an agent's actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    /// Lookup and search only
    Low,
    /// Analysis and drafting
    Medium,
    /// Judgements, reports, external notifications
    High,
    /// Escalations and final sign-off
    Critical,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Low => "low",
            RiskTier::Medium => "medium",
            RiskTier::High => "high",
            RiskTier::Critical => "critical",
        }
    }

    /// Default auto-approve threshold when tiered thresholds are enabled
    ///
    /// Critical sits above 1.0 so it can never be met.
    pub fn default_threshold(&self) -> f64 {
        match self {
            RiskTier::Low => 0.70,
            RiskTier::Medium => 0.85,
            RiskTier::High => 0.92,
            RiskTier::Critical => 1.01,
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskTier {
    type Err = DialogueError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "low" => Ok(RiskTier::Low),
            "medium" => Ok(RiskTier::Medium),
            "high" => Ok(RiskTier::High),
            "critical" => Ok(RiskTier::Critical),
            other => Err(DialogueError::Config(format!("Unknown risk tier '{}'", other))),
        }
    }
}

/// Known agents and their risk tiers
pub const AGENT_RISK_TIERS: &[(&str, RiskTier)] = &[
    // auditor side
    ("auditor_orchestrator", RiskTier::High),
    ("auditor_planner", RiskTier::High),
    ("auditor_data_collector", RiskTier::Low),
    ("auditor_controls_tester", RiskTier::Medium),
    ("auditor_anomaly_detective", RiskTier::Medium),
    ("auditor_report_writer", RiskTier::High),
    ("auditor_follow_up", RiskTier::Medium),
    ("auditor_knowledge", RiskTier::Low),
    // auditee side
    ("auditee_orchestrator", RiskTier::Medium),
    ("auditee_response", RiskTier::Medium),
    ("auditee_evidence_search", RiskTier::Low),
    ("auditee_prep", RiskTier::Low),
    ("auditee_risk_alert", RiskTier::High),
    ("auditee_controls_monitor", RiskTier::Low),
];

/// Risk tier of an agent; unknown agents are treated as high risk
pub fn agent_risk_tier(agent_name: &str) -> RiskTier {
    AGENT_RISK_TIERS
        .iter()
        .find(|(name, _)| *name == agent_name)
        .map(|(_, tier)| *tier)
        .unwrap_or(RiskTier::High)
}

/// Per-tenant gate configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicyConfig {
    pub mode: ExecutionMode,

    /// Minimum confidence for auto-execution in assist mode (inclusive)
    pub auto_approve_threshold: f64,

    /// Largest amount that may be auto-approved
    pub max_auto_approve_amount: f64,

    /// Agents eligible for auto-execution in assist mode
    pub allowed_auto_agents: Vec<String>,

    /// Whether governance should mirror decisions into the audit trail
    pub require_audit_trail: bool,

    /// Use per-tier thresholds instead of `auto_approve_threshold`
    pub use_tiered_thresholds: bool,

    /// Per-agent threshold overrides, only consulted with tiered thresholds
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub custom_agent_thresholds: HashMap<String, f64>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Audit,
            auto_approve_threshold: 0.85,
            max_auto_approve_amount: 10_000_000.0,
            allowed_auto_agents: AGENT_RISK_TIERS
                .iter()
                .map(|(name, _)| name.to_string())
                .collect(),
            require_audit_trail: true,
            use_tiered_thresholds: false,
            custom_agent_thresholds: HashMap::new(),
        }
    }
}

impl PolicyConfig {
    pub fn validate(&self) -> Result<()> {
        validate_threshold(self.auto_approve_threshold)?;
        if self.max_auto_approve_amount.is_nan() || self.max_auto_approve_amount < 0.0 {
            return Err(DialogueError::Config(format!(
                "maxAutoApproveAmount {} must be non-negative",
                self.max_auto_approve_amount
            )));
        }
        for threshold in self.custom_agent_thresholds.values() {
            validate_threshold(*threshold)?;
        }
        Ok(())
    }

    /// Threshold that applies to an agent under this configuration
    pub fn effective_threshold(&self, agent_name: &str) -> f64 {
        if !self.use_tiered_thresholds {
            return self.auto_approve_threshold;
        }
        if let Some(custom) = self.custom_agent_thresholds.get(agent_name) {
            return *custom;
        }
        agent_risk_tier(agent_name).default_threshold()
    }

    /// The gate decision for one request
    pub fn decide(&self, agent_name: &str, confidence: f64, amount: Option<f64>) -> ExecutionDecision {
        let risk_tier = agent_risk_tier(agent_name);
        let decision = |approved, reason: String, denied_by| ExecutionDecision {
            approved,
            reason,
            mode: self.mode,
            risk_tier,
            confidence,
            denied_by,
        };

        if !(0.0..=1.0).contains(&confidence) {
            return decision(
                false,
                format!("invalid confidence {}", confidence),
                Some(GateCheck::InvalidRequest),
            );
        }
        if let Some(amount) = amount {
            if !amount.is_finite() || amount < 0.0 {
                return decision(
                    false,
                    format!("invalid amount {}", amount),
                    Some(GateCheck::InvalidRequest),
                );
            }
        }

        match self.mode {
            ExecutionMode::Audit => decision(
                false,
                "human approval required".to_string(),
                Some(GateCheck::AuditMode),
            ),
            ExecutionMode::Autonomous => decision(
                true,
                "autonomous mode: auto-execute".to_string(),
                None,
            ),
            ExecutionMode::Assist => {
                if !self.allowed_auto_agents.iter().any(|a| a == agent_name) {
                    return decision(
                        false,
                        format!("agent '{}' not allowed to auto-execute", agent_name),
                        Some(GateCheck::AgentNotAllowed),
                    );
                }

                let threshold = self.effective_threshold(agent_name);
                if confidence < threshold {
                    return decision(
                        false,
                        format!(
                            "confidence {:.2} below threshold {:.2} (tier: {})",
                            confidence, threshold, risk_tier
                        ),
                        Some(GateCheck::ConfidenceTooLow),
                    );
                }

                if let Some(amount) = amount {
                    if amount > self.max_auto_approve_amount {
                        return decision(
                            false,
                            format!(
                                "amount {:.0} exceeds limit {:.0}",
                                amount, self.max_auto_approve_amount
                            ),
                            Some(GateCheck::AmountTooHigh),
                        );
                    }
                }

                decision(
                    true,
                    "assist mode: all conditions met".to_string(),
                    None,
                )
            }
        }
    }
}

fn validate_threshold(threshold: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(DialogueError::Config(format!(
            "Threshold {} outside [0, 1]",
            threshold
        )));
    }
    Ok(())
}

/// The check that denied an auto-execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateCheck {
    /// Confidence or amount is not a usable number
    InvalidRequest,
    AuditMode,
    AgentNotAllowed,
    ConfidenceTooLow,
    AmountTooHigh,
}

/// Outcome of `can_auto_execute`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionDecision {
    pub approved: bool,
    pub reason: String,
    pub mode: ExecutionMode,
    pub risk_tier: RiskTier,
    /// Confidence the request carried
    pub confidence: f64,
    /// Set when `approved` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denied_by: Option<GateCheck>,
}

/// Per-tenant execution policy gate
///
/// Tenants without a stored configuration get `PolicyConfig::default()`.
/// Configurations live in memory; callers that need them across restarts
/// take a snapshot with `export` and hand it back to `import`.
pub struct ExecutionPolicyGate {
    configs: RwLock<HashMap<String, PolicyConfig>>,
}

impl Default for ExecutionPolicyGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionPolicyGate {
    pub fn new() -> Self {
        Self {
            configs: RwLock::new(HashMap::new()),
        }
    }

    /// Snapshot of every explicitly configured tenant
    pub fn export(&self) -> HashMap<String, PolicyConfig> {
        self.configs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replace all configurations with a snapshot
    ///
    /// Nothing is applied unless every configuration validates.
    pub fn import(&self, configs: HashMap<String, PolicyConfig>) -> Result<()> {
        for (tenant_id, config) in &configs {
            config.validate().map_err(|e| {
                DialogueError::Config(format!("tenant '{}': {}", tenant_id, e))
            })?;
        }

        tracing::info!(tenants = configs.len(), "Policy configurations imported");
        *self.configs.write().unwrap_or_else(|e| e.into_inner()) = configs;
        Ok(())
    }

    /// Current configuration of a tenant
    pub fn get_config(&self, tenant_id: &str) -> PolicyConfig {
        self.configs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(tenant_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Replace a tenant's configuration
    pub fn set_config(&self, tenant_id: &str, config: PolicyConfig) -> Result<()> {
        config.validate()?;
        self.update(tenant_id, |c| *c = config)
    }

    pub fn set_mode(&self, tenant_id: &str, mode: ExecutionMode) -> Result<()> {
        self.update(tenant_id, |c| c.mode = mode)?;
        tracing::info!(tenant = %tenant_id, mode = %mode, "Execution mode changed");
        Ok(())
    }

    /// Set the assist-mode threshold; must lie in [0, 1]
    pub fn set_threshold(&self, tenant_id: &str, threshold: f64) -> Result<()> {
        validate_threshold(threshold)?;
        self.update(tenant_id, |c| c.auto_approve_threshold = threshold)?;
        tracing::info!(tenant = %tenant_id, threshold, "Auto-approve threshold changed");
        Ok(())
    }

    /// Threshold that applies to an agent of a tenant
    pub fn effective_threshold(&self, tenant_id: &str, agent_name: &str) -> f64 {
        self.get_config(tenant_id).effective_threshold(agent_name)
    }

    /// Whether an agent action may run without human approval
    pub fn can_auto_execute(
        &self,
        tenant_id: &str,
        agent_name: &str,
        confidence: f64,
        amount: Option<f64>,
    ) -> ExecutionDecision {
        let decision = self
            .get_config(tenant_id)
            .decide(agent_name, confidence, amount);

        tracing::debug!(
            tenant = %tenant_id,
            agent = %agent_name,
            confidence,
            approved = decision.approved,
            reason = %decision.reason,
            "Execution gate decision"
        );

        decision
    }

    fn update(&self, tenant_id: &str, apply: impl FnOnce(&mut PolicyConfig)) -> Result<()> {
        let mut configs = self.configs.write().unwrap_or_else(|e| e.into_inner());
        apply(configs.entry(tenant_id.to_string()).or_default());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn assist_gate(threshold: f64) -> ExecutionPolicyGate {
        let gate = ExecutionPolicyGate::new();
        gate.set_config(
            "t1",
            PolicyConfig {
                mode: ExecutionMode::Assist,
                auto_approve_threshold: threshold,
                allowed_auto_agents: vec!["auditee_response".to_string()],
                ..Default::default()
            },
        )
        .unwrap();
        gate
    }

    #[test]
    fn test_default_is_audit_mode() {
        let gate = ExecutionPolicyGate::new();
        let decision = gate.can_auto_execute("t1", "auditee_response", 1.0, None);
        assert!(!decision.approved);
        assert_eq!(decision.reason, "human approval required");
        assert_eq!(decision.denied_by, Some(GateCheck::AuditMode));
    }

    #[test]
    fn test_autonomous_always_approves() {
        let gate = ExecutionPolicyGate::new();
        gate.set_mode("t1", ExecutionMode::Autonomous).unwrap();
        for confidence in [0.0, 0.5, 1.0] {
            let decision = gate.can_auto_execute("t1", "unknown_agent", confidence, Some(1e12));
            assert!(decision.approved);
            assert_eq!(decision.mode, ExecutionMode::Autonomous);
        }
    }

    #[test]
    fn test_assist_threshold_is_inclusive() {
        let gate = assist_gate(0.85);
        assert!(!gate.can_auto_execute("t1", "auditee_response", 0.84, None).approved);
        assert!(gate.can_auto_execute("t1", "auditee_response", 0.85, None).approved);
    }

    #[test]
    fn test_assist_checks_in_order() {
        let gate = assist_gate(0.85);

        let d = gate.can_auto_execute("t1", "other_agent", 0.1, Some(1e12));
        assert_eq!(d.denied_by, Some(GateCheck::AgentNotAllowed));
        assert!(d.reason.contains("other_agent"));

        let d = gate.can_auto_execute("t1", "auditee_response", 0.1, Some(1e12));
        assert_eq!(d.denied_by, Some(GateCheck::ConfidenceTooLow));

        let d = gate.can_auto_execute("t1", "auditee_response", 0.9, Some(1e12));
        assert_eq!(d.denied_by, Some(GateCheck::AmountTooHigh));

        let d = gate.can_auto_execute("t1", "auditee_response", 0.9, Some(10_000_000.0));
        assert!(d.approved);
        assert_eq!(d.denied_by, None);
        assert_eq!(d.risk_tier, RiskTier::Medium);
    }

    #[test]
    fn test_set_threshold_validates() {
        let gate = ExecutionPolicyGate::new();
        assert!(matches!(
            gate.set_threshold("t1", 1.5),
            Err(DialogueError::Config(_))
        ));
        assert!(gate.set_threshold("t1", -0.01).is_err());
        assert!(gate.set_threshold("t1", 0.0).is_ok());
        assert!(gate.set_threshold("t1", 1.0).is_ok());
        assert_eq!(gate.get_config("t1").auto_approve_threshold, 1.0);
    }

    #[test]
    fn test_tenants_are_isolated() {
        let gate = ExecutionPolicyGate::new();
        gate.set_mode("t1", ExecutionMode::Autonomous).unwrap();
        assert_eq!(gate.get_config("t1").mode, ExecutionMode::Autonomous);
        assert_eq!(gate.get_config("t2").mode, ExecutionMode::Audit);
    }

    #[test]
    fn test_agent_risk_tiers() {
        assert_eq!(AGENT_RISK_TIERS.len(), 14);
        assert_eq!(agent_risk_tier("auditor_planner"), RiskTier::High);
        assert_eq!(agent_risk_tier("auditee_prep"), RiskTier::Low);
        assert_eq!(agent_risk_tier("someone_new"), RiskTier::High);
    }

    #[test]
    fn test_tiered_thresholds() {
        let mut config = PolicyConfig {
            use_tiered_thresholds: true,
            ..Default::default()
        };
        assert_eq!(config.effective_threshold("auditee_prep"), 0.70);
        assert_eq!(config.effective_threshold("auditee_response"), 0.85);
        assert_eq!(config.effective_threshold("unknown"), 0.92);

        config
            .custom_agent_thresholds
            .insert("auditee_prep".to_string(), 0.5);
        assert_eq!(config.effective_threshold("auditee_prep"), 0.5);

        config.use_tiered_thresholds = false;
        assert_eq!(config.effective_threshold("auditee_prep"), 0.85);
    }

    #[test]
    fn test_critical_tier_never_meets_threshold() {
        assert!(RiskTier::Critical.default_threshold() > 1.0);
    }

    #[test]
    fn test_parse_mode_and_tier() {
        assert_eq!("assist".parse::<ExecutionMode>().unwrap(), ExecutionMode::Assist);
        assert!("yolo".parse::<ExecutionMode>().is_err());
        assert_eq!("critical".parse::<RiskTier>().unwrap(), RiskTier::Critical);
        assert!(matches!("extreme".parse::<RiskTier>(), Err(DialogueError::Config(_))));
    }

    #[test]
    fn test_export_import_snapshot() {
        let gate = ExecutionPolicyGate::new();
        assert_ok!(gate.set_mode("t1", ExecutionMode::Assist));
        assert_ok!(gate.set_threshold("t1", 0.6));

        let snapshot = gate.export();
        assert_eq!(snapshot.len(), 1);

        let restored = ExecutionPolicyGate::new();
        assert_ok!(restored.import(snapshot));
        let config = restored.get_config("t1");
        assert_eq!(config.mode, ExecutionMode::Assist);
        assert_eq!(config.auto_approve_threshold, 0.6);
    }

    #[test]
    fn test_import_rejects_invalid_snapshot() {
        let gate = ExecutionPolicyGate::new();
        assert_ok!(gate.set_mode("t1", ExecutionMode::Autonomous));

        let mut snapshot = HashMap::new();
        snapshot.insert(
            "t2".to_string(),
            PolicyConfig {
                auto_approve_threshold: 1.5,
                ..Default::default()
            },
        );
        let err = assert_err!(gate.import(snapshot));
        assert!(err.to_string().contains("t2"));
        // Existing configurations are untouched
        assert_eq!(gate.get_config("t1").mode, ExecutionMode::Autonomous);
    }

    #[test]
    fn test_non_numeric_confidence_is_denied() {
        let gate = assist_gate(0.85);
        for confidence in [f64::NAN, f64::INFINITY, -0.1, 1.01] {
            let d = gate.can_auto_execute("t1", "auditee_response", confidence, None);
            assert!(!d.approved, "confidence {} approved", confidence);
            assert_eq!(d.denied_by, Some(GateCheck::InvalidRequest));
        }

        gate.set_mode("t1", ExecutionMode::Autonomous).unwrap();
        let d = gate.can_auto_execute("t1", "auditee_response", f64::NAN, None);
        assert!(!d.approved);
        assert_eq!(d.denied_by, Some(GateCheck::InvalidRequest));
    }

    #[test]
    fn test_non_numeric_amount_is_denied() {
        let gate = assist_gate(0.85);
        for amount in [f64::NAN, f64::INFINITY, -1.0] {
            let d = gate.can_auto_execute("t1", "auditee_response", 0.9, Some(amount));
            assert!(!d.approved, "amount {} approved", amount);
            assert_eq!(d.denied_by, Some(GateCheck::InvalidRequest));
        }
        assert!(gate.can_auto_execute("t1", "auditee_response", 0.9, Some(0.0)).approved);
    }

    #[test]
    fn test_config_serialization() {
        let json = serde_json::to_string(&PolicyConfig::default()).unwrap();
        assert!(json.contains("\"mode\":\"audit\""));
        assert!(json.contains("allowedAutoAgents"));

        let parsed: PolicyConfig = serde_json::from_str(r#"{"mode":"assist"}"#).unwrap();
        assert_eq!(parsed.mode, ExecutionMode::Assist);
        assert_eq!(parsed.allowed_auto_agents.len(), 14);
    }
}
