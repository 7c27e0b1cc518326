//! Governance over execution gate decisions
//!
//! Every gate decision is logged with its context, per-tenant statistics are
//! kept incrementally, consecutive agent errors are counted toward a circuit
//! breaker recommendation and the decision mix is checked for anomalies.
//!
//! State lives in process memory behind a mutex. Instances in different
//! processes do not share statistics or error counters.

use crate::audit::{AgentDecisionRecord, AuditTrailService};
use crate::error::Result;
use crate::policy::{ExecutionDecision, ExecutionMode, RiskTier, AGENT_RISK_TIERS};
use crate::types::JsonMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Post-hoc review state of a logged decision
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    #[default]
    Pending,
    Reviewed,
    Flagged,
}

/// One logged gate decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceLogEntry {
    pub decision_id: String,
    pub tenant_id: String,
    pub agent_name: String,
    pub execution_mode: ExecutionMode,
    pub risk_tier: RiskTier,
    pub confidence: f64,
    pub approved: bool,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub input_summary: JsonMap,
    #[serde(default)]
    pub output_summary: JsonMap,
    pub review_status: ReviewStatus,
    #[serde(default)]
    pub reviewer_notes: String,
}

/// Running statistics for one tenant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceStats {
    pub total_decisions: u64,
    pub auto_approved: u64,
    pub human_approved: u64,
    pub auto_rejected: u64,
    pub flagged_for_review: u64,
    /// Mean over decisions that carried a finite confidence
    pub average_confidence: f64,
    #[serde(default)]
    pub confidence_samples: u64,
    pub decisions_by_tier: HashMap<RiskTier, u64>,
    pub decisions_by_agent: HashMap<String, u64>,
}

impl GovernanceStats {
    /// Share of decisions that were approved automatically
    pub fn auto_approval_rate(&self) -> f64 {
        if self.total_decisions == 0 {
            return 0.0;
        }
        self.auto_approved as f64 / self.total_decisions as f64
    }

    fn apply(&mut self, entry: &GovernanceLogEntry) {
        self.total_decisions += 1;

        match (entry.approved, entry.execution_mode) {
            (true, ExecutionMode::Assist | ExecutionMode::Autonomous) => self.auto_approved += 1,
            (true, ExecutionMode::Audit) => self.human_approved += 1,
            (false, _) => self.auto_rejected += 1,
        }

        if entry.confidence.is_finite() {
            self.confidence_samples += 1;
            let n = self.confidence_samples as f64;
            self.average_confidence =
                (self.average_confidence * (n - 1.0) + entry.confidence) / n;
        }

        *self.decisions_by_tier.entry(entry.risk_tier).or_insert(0) += 1;
        *self
            .decisions_by_agent
            .entry(entry.agent_name.clone())
            .or_insert(0) += 1;
    }
}

/// Thresholds for the circuit breaker and anomaly checks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GovernanceConfig {
    /// Consecutive errors after which suspension is recommended
    pub max_consecutive_errors: u32,
    /// Decisions needed before anomaly checks apply
    pub min_decisions_for_anomaly: u64,
    pub max_auto_approval_rate: f64,
    pub min_average_confidence: f64,
    pub max_high_tier_ratio: f64,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            max_consecutive_errors: 5,
            min_decisions_for_anomaly: 10,
            max_auto_approval_rate: 0.95,
            min_average_confidence: 0.70,
            max_high_tier_ratio: 0.5,
        }
    }
}

/// A suspicious pattern in a tenant's decisions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Anomaly {
    HighAutoApprovalRate { rate: f64 },
    LowAverageConfidence { average: f64 },
    HighTierConcentration { high: u64, total: u64 },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::HighAutoApprovalRate { rate } => {
                write!(f, "auto-approval rate unusually high: {:.1}%", rate * 100.0)
            }
            Anomaly::LowAverageConfidence { average } => {
                write!(f, "average confidence low: {:.2}", average)
            }
            Anomaly::HighTierConcentration { high, total } => {
                write!(f, "high-tier decision share elevated: {}/{}", high, total)
            }
        }
    }
}

#[derive(Default)]
struct GovernanceState {
    logs: Vec<GovernanceLogEntry>,
    stats: HashMap<String, GovernanceStats>,
    /// (tenant, agent) → consecutive errors
    errors: HashMap<(String, String), u32>,
}

/// Governance bookkeeping for gate decisions
#[derive(Default)]
pub struct Governance {
    config: GovernanceConfig,
    state: Mutex<GovernanceState>,
    audit: Option<Arc<AuditTrailService>>,
}

impl Governance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: GovernanceConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Mirror every recorded decision into an audit trail
    pub fn with_audit_trail(mut self, audit: Arc<AuditTrailService>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, GovernanceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Log a gate decision and update the tenant's statistics
    pub fn record_decision(
        &self,
        decision_id: &str,
        tenant_id: &str,
        agent_name: &str,
        decision: &ExecutionDecision,
        input_summary: Option<JsonMap>,
        output_summary: Option<JsonMap>,
    ) -> Result<GovernanceLogEntry> {
        let entry = GovernanceLogEntry {
            decision_id: decision_id.to_string(),
            tenant_id: tenant_id.to_string(),
            agent_name: agent_name.to_string(),
            execution_mode: decision.mode,
            risk_tier: decision.risk_tier,
            confidence: decision.confidence,
            approved: decision.approved,
            reason: decision.reason.clone(),
            timestamp: Utc::now(),
            input_summary: input_summary.unwrap_or_default(),
            output_summary: output_summary.unwrap_or_default(),
            review_status: ReviewStatus::Pending,
            reviewer_notes: String::new(),
        };

        // Mirrored first so a failed audit write leaves nothing counted
        if let Some(ref audit) = self.audit {
            audit.record_agent_decision(AgentDecisionRecord {
                tenant_id: tenant_id.to_string(),
                agent_name: agent_name.to_string(),
                decision: if entry.approved { "auto_execute" } else { "require_approval" }
                    .to_string(),
                reasoning: entry.reason.clone(),
                confidence: entry.confidence,
                resource_type: "execution_decision".to_string(),
                resource_id: decision_id.to_string(),
                input_summary: entry.input_summary.clone(),
            })?;
        }

        {
            let mut state = self.lock();
            state
                .stats
                .entry(tenant_id.to_string())
                .or_default()
                .apply(&entry);
            state.logs.push(entry.clone());
        }

        tracing::debug!(
            decision_id = %decision_id,
            tenant = %tenant_id,
            agent = %agent_name,
            approved = entry.approved,
            "Governance decision recorded"
        );

        Ok(entry)
    }

    /// Count a consecutive error; true once suspension is recommended
    pub fn record_error(&self, tenant_id: &str, agent_name: &str, error: &str) -> bool {
        let count = {
            let mut state = self.lock();
            let count = state
                .errors
                .entry((tenant_id.to_string(), agent_name.to_string()))
                .or_insert(0);
            *count += 1;
            *count
        };

        if count >= self.config.max_consecutive_errors {
            tracing::warn!(
                tenant = %tenant_id,
                agent = %agent_name,
                count,
                error = %error,
                "Consecutive error ceiling reached, suspension recommended"
            );
            return true;
        }

        tracing::debug!(tenant = %tenant_id, agent = %agent_name, count, error = %error, "Agent error recorded");
        false
    }

    /// Reset the consecutive error counter after a success
    pub fn clear_error_count(&self, tenant_id: &str, agent_name: &str) {
        self.lock()
            .errors
            .remove(&(tenant_id.to_string(), agent_name.to_string()));
    }

    pub fn error_count(&self, tenant_id: &str, agent_name: &str) -> u32 {
        self.lock()
            .errors
            .get(&(tenant_id.to_string(), agent_name.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn get_stats(&self, tenant_id: &str) -> GovernanceStats {
        self.lock().stats.get(tenant_id).cloned().unwrap_or_default()
    }

    pub fn auto_approval_rate(&self, tenant_id: &str) -> f64 {
        self.get_stats(tenant_id).auto_approval_rate()
    }

    /// The most recent `limit` entries of a tenant, oldest first
    pub fn get_logs(
        &self,
        tenant_id: &str,
        agent_name: Option<&str>,
        limit: usize,
    ) -> Vec<GovernanceLogEntry> {
        let state = self.lock();
        let filtered: Vec<&GovernanceLogEntry> = state
            .logs
            .iter()
            .filter(|e| e.tenant_id == tenant_id)
            .filter(|e| agent_name.map_or(true, |a| e.agent_name == a))
            .collect();

        let skip = filtered.len().saturating_sub(limit);
        filtered.into_iter().skip(skip).cloned().collect()
    }

    pub fn get_pending_reviews(&self, tenant_id: &str) -> Vec<GovernanceLogEntry> {
        self.lock()
            .logs
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.review_status == ReviewStatus::Pending)
            .cloned()
            .collect()
    }

    /// Mark a decision reviewed; false if unknown
    pub fn mark_reviewed(&self, decision_id: &str, reviewer_notes: &str) -> bool {
        let mut state = self.lock();
        match state.logs.iter_mut().find(|e| e.decision_id == decision_id) {
            Some(entry) => {
                entry.review_status = ReviewStatus::Reviewed;
                entry.reviewer_notes = reviewer_notes.to_string();
                true
            }
            None => false,
        }
    }

    /// Flag a decision for attention; false if unknown
    pub fn flag_for_review(&self, decision_id: &str, reason: &str) -> bool {
        let mut state = self.lock();
        let Some(entry) = state.logs.iter_mut().find(|e| e.decision_id == decision_id) else {
            return false;
        };
        entry.review_status = ReviewStatus::Flagged;
        entry.reviewer_notes = reason.to_string();
        let tenant_id = entry.tenant_id.clone();

        state.stats.entry(tenant_id.clone()).or_default().flagged_for_review += 1;
        tracing::info!(decision_id = %decision_id, tenant = %tenant_id, "Decision flagged for review");
        true
    }

    /// Suspicious patterns in a tenant's decisions
    ///
    /// Empty until the tenant has enough decisions.
    pub fn check_anomalous_pattern(&self, tenant_id: &str) -> Vec<Anomaly> {
        let stats = self.get_stats(tenant_id);
        let mut anomalies = Vec::new();

        if stats.total_decisions < self.config.min_decisions_for_anomaly
            || stats.total_decisions == 0
        {
            return anomalies;
        }

        let rate = stats.auto_approval_rate();
        if rate > self.config.max_auto_approval_rate {
            anomalies.push(Anomaly::HighAutoApprovalRate { rate });
        }

        if stats.confidence_samples > 0
            && stats.average_confidence < self.config.min_average_confidence
        {
            anomalies.push(Anomaly::LowAverageConfidence {
                average: stats.average_confidence,
            });
        }

        let high = stats
            .decisions_by_tier
            .get(&RiskTier::High)
            .copied()
            .unwrap_or(0);
        if high as f64 / stats.total_decisions as f64 > self.config.max_high_tier_ratio {
            anomalies.push(Anomaly::HighTierConcentration {
                high,
                total: stats.total_decisions,
            });
        }

        for anomaly in &anomalies {
            tracing::warn!(tenant = %tenant_id, anomaly = %anomaly, "Anomalous decision pattern");
        }

        anomalies
    }

    /// Known agents with their risk tiers, sorted by name
    pub fn agent_summary(&self) -> Vec<(&'static str, RiskTier)> {
        let mut summary = AGENT_RISK_TIERS.to_vec();
        summary.sort_by_key(|(name, _)| *name);
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyConfig;

    fn decision(mode: ExecutionMode, agent: &str, confidence: f64) -> ExecutionDecision {
        PolicyConfig {
            mode,
            ..Default::default()
        }
        .decide(agent, confidence, None)
    }

    #[test]
    fn test_record_decision_updates_stats() {
        let gov = Governance::new();
        gov.record_decision("d1", "t1", "auditee_response", &decision(ExecutionMode::Assist, "auditee_response", 0.9), None, None)
            .unwrap();
        gov.record_decision("d2", "t1", "auditee_response", &decision(ExecutionMode::Assist, "auditee_response", 0.5), None, None)
            .unwrap();
        gov.record_decision("d3", "t1", "auditor_planner", &decision(ExecutionMode::Autonomous, "auditor_planner", 0.7), None, None)
            .unwrap();

        let stats = gov.get_stats("t1");
        assert_eq!(stats.total_decisions, 3);
        assert_eq!(stats.auto_approved, 2);
        assert_eq!(stats.auto_rejected, 1);
        assert!((stats.average_confidence - 0.7).abs() < 1e-9);
        assert_eq!(stats.decisions_by_tier[&RiskTier::Medium], 2);
        assert_eq!(stats.decisions_by_tier[&RiskTier::High], 1);
        assert_eq!(stats.decisions_by_agent["auditee_response"], 2);
        assert_eq!(gov.get_stats("t2").total_decisions, 0);
    }

    #[test]
    fn test_record_error_ceiling() {
        let gov = Governance::new();
        let results: Vec<bool> = (0..5).map(|_| gov.record_error("t1", "a1", "boom")).collect();
        assert_eq!(results, vec![false, false, false, false, true]);
        assert_eq!(gov.error_count("t1", "a1"), 5);

        gov.clear_error_count("t1", "a1");
        assert_eq!(gov.error_count("t1", "a1"), 0);
        assert!(!gov.record_error("t1", "a1", "boom"));
    }

    #[test]
    fn test_error_counters_are_per_agent() {
        let gov = Governance::new();
        for _ in 0..4 {
            gov.record_error("t1", "a1", "x");
        }
        assert!(!gov.record_error("t1", "a2", "x"));
        assert!(!gov.record_error("t2", "a1", "x"));
        assert!(gov.record_error("t1", "a1", "x"));
    }

    #[test]
    fn test_custom_error_ceiling() {
        let gov = Governance::with_config(GovernanceConfig {
            max_consecutive_errors: 2,
            ..Default::default()
        });
        assert!(!gov.record_error("t1", "a1", "x"));
        assert!(gov.record_error("t1", "a1", "x"));
    }

    #[test]
    fn test_anomalies_need_enough_decisions() {
        let gov = Governance::new();
        for i in 0..9 {
            let d = decision(ExecutionMode::Autonomous, "auditor_planner", 0.1);
            gov.record_decision(&format!("d{}", i), "t1", "auditor_planner", &d, None, None)
                .unwrap();
        }
        assert!(gov.check_anomalous_pattern("t1").is_empty());

        let d = decision(ExecutionMode::Autonomous, "auditor_planner", 0.1);
        gov.record_decision("d9", "t1", "auditor_planner", &d, None, None)
            .unwrap();
        let anomalies = gov.check_anomalous_pattern("t1");
        assert_eq!(anomalies.len(), 3);
        assert!(matches!(anomalies[0], Anomaly::HighAutoApprovalRate { .. }));
        assert!(matches!(anomalies[1], Anomaly::LowAverageConfidence { .. }));
        assert_eq!(anomalies[2], Anomaly::HighTierConcentration { high: 10, total: 10 });
    }

    #[test]
    fn test_healthy_pattern_has_no_anomalies() {
        let gov = Governance::new();
        for i in 0..10 {
            let confidence = if i % 2 == 0 { 0.95 } else { 0.5 };
            let d = decision(ExecutionMode::Assist, "auditee_prep", confidence);
            gov.record_decision(&format!("d{}", i), "t1", "auditee_prep", &d, None, None)
                .unwrap();
        }
        assert!(gov.check_anomalous_pattern("t1").is_empty());
    }

    #[test]
    fn test_review_workflow() {
        let gov = Governance::new();
        let d = decision(ExecutionMode::Assist, "auditee_response", 0.9);
        gov.record_decision("d1", "t1", "auditee_response", &d, None, None).unwrap();
        gov.record_decision("d2", "t1", "auditee_response", &d, None, None).unwrap();
        assert_eq!(gov.get_pending_reviews("t1").len(), 2);

        assert!(gov.mark_reviewed("d1", "looks fine"));
        assert!(gov.flag_for_review("d2", "amount looks off"));
        assert!(!gov.mark_reviewed("missing", ""));
        assert!(!gov.flag_for_review("missing", ""));

        assert!(gov.get_pending_reviews("t1").is_empty());
        assert_eq!(gov.get_stats("t1").flagged_for_review, 1);

        let logs = gov.get_logs("t1", None, 100);
        assert_eq!(logs[0].review_status, ReviewStatus::Reviewed);
        assert_eq!(logs[0].reviewer_notes, "looks fine");
        assert_eq!(logs[1].review_status, ReviewStatus::Flagged);
    }

    #[test]
    fn test_get_logs_filters_and_limits() {
        let gov = Governance::new();
        for i in 0..5 {
            let d = decision(ExecutionMode::Assist, "auditee_response", 0.9);
            gov.record_decision(&format!("r{}", i), "t1", "auditee_response", &d, None, None)
                .unwrap();
        }
        let d = decision(ExecutionMode::Assist, "auditee_prep", 0.9);
        gov.record_decision("p0", "t1", "auditee_prep", &d, None, None).unwrap();

        let last_two = gov.get_logs("t1", Some("auditee_response"), 2);
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[0].decision_id, "r3");
        assert_eq!(last_two[1].decision_id, "r4");
        assert_eq!(gov.get_logs("t1", None, 100).len(), 6);
        assert!(gov.get_logs("t2", None, 100).is_empty());
    }

    #[test]
    fn test_decisions_mirrored_to_audit_trail() {
        let audit = Arc::new(AuditTrailService::new());
        let gov = Governance::new().with_audit_trail(Arc::clone(&audit));

        let mut input = JsonMap::new();
        input.insert("invoice".into(), serde_json::json!("INV-1"));
        let d = decision(ExecutionMode::Assist, "auditee_response", 0.9);
        gov.record_decision("d1", "t1", "auditee_response", &d, Some(input), None)
            .unwrap();

        let entries = audit.flush().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].resource_id, "d1");
        assert_eq!(entries[0].details["decision"], "auto_execute");
        assert_eq!(entries[0].details["input_summary"]["invoice"], "INV-1");
    }

    #[test]
    fn test_failed_audit_mirror_counts_nothing() {
        let audit = Arc::new(AuditTrailService::new());
        audit.poison();
        let gov = Governance::new().with_audit_trail(audit);

        let d = decision(ExecutionMode::Assist, "auditee_response", 0.9);
        assert!(gov
            .record_decision("d1", "t1", "auditee_response", &d, None, None)
            .is_err());
        assert_eq!(gov.get_stats("t1").total_decisions, 0);
        assert!(gov.get_logs("t1", None, 10).is_empty());
    }

    #[test]
    fn test_non_finite_confidence_keeps_average_usable() {
        let gov = Governance::with_config(GovernanceConfig {
            min_decisions_for_anomaly: 2,
            ..Default::default()
        });
        let assist = |c| {
            PolicyConfig {
                mode: ExecutionMode::Assist,
                ..Default::default()
            }
            .decide("auditee_response", c, None)
        };

        let invalid = assist(f64::NAN);
        assert!(!invalid.approved);
        gov.record_decision("d1", "t1", "auditee_response", &invalid, None, None)
            .unwrap();
        gov.record_decision("d2", "t1", "auditee_response", &assist(0.2), None, None)
            .unwrap();
        gov.record_decision("d3", "t1", "auditee_response", &assist(0.4), None, None)
            .unwrap();

        let stats = gov.get_stats("t1");
        assert_eq!(stats.total_decisions, 3);
        assert_eq!(stats.confidence_samples, 2);
        assert!((stats.average_confidence - 0.3).abs() < 1e-9);
        assert!(gov
            .check_anomalous_pattern("t1")
            .iter()
            .any(|a| matches!(a, Anomaly::LowAverageConfidence { .. })));
    }

    #[test]
    fn test_agent_summary_sorted() {
        let summary = Governance::new().agent_summary();
        assert_eq!(summary.len(), 14);
        assert_eq!(summary[0].0, "auditee_controls_monitor");
        assert!(summary.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[test]
    fn test_concurrent_recording() {
        let gov = Arc::new(Governance::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let gov = Arc::clone(&gov);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let d = decision(ExecutionMode::Assist, "auditee_response", 0.9);
                        gov.record_decision(&format!("{}-{}", t, i), "t1", "auditee_response", &d, None, None)
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(gov.get_stats("t1").total_decisions, 400);
    }
}
