//! Answer quality evaluation
//!
//! Scores an answer against its thread on four axes (completeness,
//! evidence sufficiency, content depth, timeliness) and combines them with
//! a configurable weight map. Evaluation never fails: missing context
//! degrades to neutral defaults.

use crate::error::{DialogueError, Result};
use crate::types::{Message, MessageType};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Completeness when the thread holds no question to compare against
const NEUTRAL_COMPLETENESS: f64 = 0.5;
/// Evidence score when nothing is attached or promised
const NO_EVIDENCE: f64 = 0.3;
/// Evidence score when attachments are declared but not yet attached
const PROMISED_EVIDENCE: f64 = 0.7;
/// Characters at which content depth saturates
const DEPTH_SATURATION_CHARS: f64 = 100.0;
/// Sub-scores below this produce an issue note
const ISSUE_THRESHOLD: f64 = 0.5;

/// Relative weight of each quality axis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityWeights {
    pub completeness: f64,
    pub evidence_sufficiency: f64,
    pub content_depth: f64,
    pub timeliness: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            completeness: 0.35,
            evidence_sufficiency: 0.25,
            content_depth: 0.25,
            timeliness: 0.15,
        }
    }
}

impl QualityWeights {
    fn sum(&self) -> f64 {
        self.completeness + self.evidence_sufficiency + self.content_depth + self.timeliness
    }

    /// Weights must be finite, non-negative and not all zero
    pub fn validate(&self) -> Result<()> {
        let all = [
            self.completeness,
            self.evidence_sufficiency,
            self.content_depth,
            self.timeliness,
        ];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(DialogueError::Config(
                "Quality weights must be finite and non-negative".to_string(),
            ));
        }
        if self.sum() <= 0.0 {
            return Err(DialogueError::Config(
                "Quality weights must not all be zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-axis scores attached to an answer's metadata
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityBreakdown {
    pub completeness: f64,
    pub evidence_sufficiency: f64,
    pub content_depth: f64,
    pub timeliness: f64,
    pub overall: f64,
}

/// Full evaluation outcome
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityResult {
    pub score: f64,
    pub breakdown: QualityBreakdown,
    /// Human-readable deficiency notes, one per weak axis
    pub issues: Vec<String>,
}

/// Caller-supplied context for an evaluation
#[derive(Debug, Clone, Default)]
pub struct QualityContext {
    /// Answer deadline; falls back to the latest question's `deadline`
    pub deadline: Option<DateTime<Utc>>,
}

/// Multi-axis answer quality evaluator
#[derive(Debug, Clone)]
pub struct QualityEvaluator {
    weights: QualityWeights,
    /// Time past the deadline after which timeliness reaches zero
    overdue_grace: Duration,
}

impl Default for QualityEvaluator {
    fn default() -> Self {
        Self {
            weights: QualityWeights::default(),
            overdue_grace: Duration::hours(48),
        }
    }
}

impl QualityEvaluator {
    /// Create an evaluator with custom weights
    pub fn new(weights: QualityWeights) -> Result<Self> {
        weights.validate()?;
        Ok(Self {
            weights,
            ..Default::default()
        })
    }

    /// Override the overdue grace window
    pub fn with_overdue_grace(mut self, grace: Duration) -> Self {
        self.overdue_grace = grace;
        self
    }

    pub fn weights(&self) -> &QualityWeights {
        &self.weights
    }

    /// Overall score in [0, 1]
    pub fn evaluate(&self, answer: &Message, thread: &[Message]) -> f64 {
        self.evaluate_detailed(answer, thread).score
    }

    /// Score with breakdown and issues, using only thread context
    pub fn evaluate_detailed(&self, answer: &Message, thread: &[Message]) -> QualityResult {
        self.evaluate_with_context(answer, thread, &QualityContext::default())
    }

    /// Score with breakdown and issues
    pub fn evaluate_with_context(
        &self,
        answer: &Message,
        thread: &[Message],
        ctx: &QualityContext,
    ) -> QualityResult {
        let completeness = check_completeness(answer, thread);
        let evidence = check_evidence(answer);
        let depth = check_content_depth(answer);
        let timeliness = self.check_timeliness(answer, thread, ctx);

        let mut issues = Vec::new();
        if completeness < ISSUE_THRESHOLD {
            issues.push("Answer does not sufficiently cover the question".to_string());
        }
        if evidence < ISSUE_THRESHOLD {
            issues.push("Supporting evidence is missing".to_string());
        }
        if depth < ISSUE_THRESHOLD {
            issues.push("Answer is too short or lacks detail".to_string());
        }
        if timeliness < ISSUE_THRESHOLD {
            issues.push("Answer was submitted after the deadline".to_string());
        }

        let w = &self.weights;
        let weighted = completeness * w.completeness
            + evidence * w.evidence_sufficiency
            + depth * w.content_depth
            + timeliness * w.timeliness;
        let overall = round2((weighted / w.sum()).clamp(0.0, 1.0));

        let breakdown = QualityBreakdown {
            completeness: round2(completeness),
            evidence_sufficiency: round2(evidence),
            content_depth: round2(depth),
            timeliness: round2(timeliness),
            overall,
        };

        tracing::debug!(
            message_id = %answer.id,
            completeness = breakdown.completeness,
            evidence = breakdown.evidence_sufficiency,
            depth = breakdown.content_depth,
            timeliness = breakdown.timeliness,
            overall,
            "Answer quality evaluated"
        );

        QualityResult {
            score: overall,
            breakdown,
            issues,
        }
    }

    fn check_timeliness(&self, answer: &Message, thread: &[Message], ctx: &QualityContext) -> f64 {
        let deadline = match ctx.deadline.or_else(|| thread_deadline(thread)) {
            Some(d) => d,
            None => return 1.0,
        };

        if answer.timestamp <= deadline {
            return 1.0;
        }

        let grace_ms = self.overdue_grace.num_milliseconds();
        if grace_ms <= 0 {
            return 0.0;
        }
        let overdue_ms = (answer.timestamp - deadline).num_milliseconds();
        (1.0 - overdue_ms as f64 / grace_ms as f64).max(0.0)
    }
}

fn check_completeness(answer: &Message, thread: &[Message]) -> f64 {
    let question_chars: usize = thread
        .iter()
        .filter(|m| m.message_type == MessageType::Question)
        .map(|m| m.content.chars().count())
        .sum();

    if question_chars == 0 {
        return NEUTRAL_COMPLETENESS;
    }

    let answer_chars = answer.content.chars().count() as f64;
    (answer_chars / question_chars as f64 * 0.5).min(1.0)
}

fn check_evidence(answer: &Message) -> f64 {
    if !answer.attachments.is_empty() {
        return 1.0;
    }

    let declared = answer
        .structured_content
        .get("evidence_to_attach")
        .map(is_truthy)
        .unwrap_or(false);
    if declared {
        return PROMISED_EVIDENCE;
    }

    let refs = answer
        .structured_content
        .get("referenced_documents")
        .and_then(|v| v.as_array())
        .map(|a| a.len())
        .unwrap_or(0);
    if refs > 0 {
        return (0.5 + refs as f64 * 0.1).min(PROMISED_EVIDENCE);
    }

    NO_EVIDENCE
}

fn check_content_depth(answer: &Message) -> f64 {
    (answer.content.chars().count() as f64 / DEPTH_SATURATION_CHARS).min(1.0)
}

/// Deadline declared by the latest question in the thread
fn thread_deadline(thread: &[Message]) -> Option<DateTime<Utc>> {
    thread
        .iter()
        .rev()
        .find(|m| m.message_type == MessageType::Question)
        .and_then(|q| q.structured_content.get("deadline"))
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
}

fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Array(a) => !a.is_empty(),
        serde_json::Value::Object(o) => !o.is_empty(),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
