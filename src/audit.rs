//! Tamper-evident audit trail
//!
//! `HashChain` links every entry to its predecessor:
//! `hash = SHA256(previous_hash || ":" || canonical(details))`, starting
//! from a genesis of 64 `'0'` characters. Replaying the chain detects any
//! retroactive edit.
//!
//! A chain has one logical writer. `AuditTrailService` serializes writers
//! behind a mutex so concurrent callers cannot interleave appends.

use crate::error::{DialogueError, Result};
use crate::types::JsonMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Mutex;

/// Hash preceding the first entry of every chain
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Append-only SHA-256 hash chain
#[derive(Debug, Clone)]
pub struct HashChain {
    previous_hash: String,
}

impl Default for HashChain {
    fn default() -> Self {
        Self::new()
    }
}

impl HashChain {
    /// Start a new chain at genesis
    pub fn new() -> Self {
        Self {
            previous_hash: GENESIS_HASH.to_string(),
        }
    }

    /// Continue a chain whose last hash was restored from storage
    pub fn resume(previous_hash: impl Into<String>) -> Self {
        Self {
            previous_hash: previous_hash.into(),
        }
    }

    /// Hash of the most recent entry (genesis if empty)
    pub fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    /// Append an entry and advance the chain, returning its hash
    pub fn add_entry(&mut self, details: &serde_json::Value) -> String {
        let hash = Self::compute(&self.previous_hash, details);
        self.previous_hash = hash.clone();
        hash
    }

    /// Pure hash step shared by append and verification
    pub fn compute(previous_hash: &str, details: &serde_json::Value) -> String {
        let mut hasher = Sha256::new();
        hasher.update(previous_hash.as_bytes());
        hasher.update(b":");
        hasher.update(canonical_json(details).as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Replay `entries` from genesis and compare against `hashes`
    ///
    /// Returns false at the first mismatch or if the lengths differ.
    pub fn verify_chain(entries: &[serde_json::Value], hashes: &[String]) -> bool {
        if entries.len() != hashes.len() {
            return false;
        }

        let mut previous = GENESIS_HASH.to_string();
        for (entry, expected) in entries.iter().zip(hashes) {
            let hash = Self::compute(&previous, entry);
            if &hash != expected {
                return false;
            }
            previous = hash;
        }
        true
    }
}

/// Deterministic JSON rendering: object keys sorted at every depth
pub fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::Value::String(k.clone()),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        serde_json::Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        other => other.to_string(),
    }
}

/// Kind of recorded action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Execute,
    Approve,
    Reject,
    AgentDecision,
}

/// Who performed an action: a human user or an agent, never both
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Actor {
    User(String),
    Agent(String),
}

/// One immutable audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub tenant_id: String,
    pub actor: Actor,
    pub action: AuditAction,
    pub resource_type: String,
    pub resource_id: String,
    #[serde(default)]
    pub details: JsonMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub hash: String,
    pub previous_hash: String,
}

impl AuditEntry {
    /// The hashed representation: every field except the chain fields
    pub fn hashable(&self) -> Result<serde_json::Value> {
        let mut value = serde_json::to_value(self)?;
        if let Some(obj) = value.as_object_mut() {
            obj.remove("hash");
            obj.remove("previousHash");
        }
        Ok(value)
    }
}

/// An agent decision with its reasoning
#[derive(Debug, Clone)]
pub struct AgentDecisionRecord {
    pub tenant_id: String,
    pub agent_name: String,
    pub decision: String,
    pub reasoning: String,
    pub confidence: f64,
    pub resource_type: String,
    pub resource_id: String,
    pub input_summary: JsonMap,
}

struct TrailState {
    chain: HashChain,
    buffer: Vec<AuditEntry>,
}

/// Builds hash-chained `AuditEntry` records for the persistence layer
///
/// Entries accumulate in a buffer until `flush()` hands them over.
pub struct AuditTrailService {
    state: Mutex<TrailState>,
}

impl Default for AuditTrailService {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditTrailService {
    /// Start a fresh trail at genesis
    pub fn new() -> Self {
        Self::with_chain(HashChain::new())
    }

    /// Continue a trail whose last persisted hash is known
    pub fn resume(previous_hash: impl Into<String>) -> Self {
        Self::with_chain(HashChain::resume(previous_hash))
    }

    fn with_chain(chain: HashChain) -> Self {
        Self {
            state: Mutex::new(TrailState {
                chain,
                buffer: Vec::new(),
            }),
        }
    }

    /// Record a generic action
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        tenant_id: &str,
        actor: Actor,
        action: AuditAction,
        resource_type: &str,
        resource_id: &str,
        details: JsonMap,
        confidence: Option<f64>,
    ) -> Result<AuditEntry> {
        let mut state = self.state.lock().map_err(|e| {
            DialogueError::Provider(format!("Audit trail lock poisoned: {}", e))
        })?;

        let mut entry = AuditEntry {
            id: format!("aud-{}", uuid::Uuid::new_v4()),
            timestamp: Utc::now(),
            tenant_id: tenant_id.to_string(),
            actor,
            action,
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            details,
            confidence,
            hash: String::new(),
            previous_hash: state.chain.previous_hash().to_string(),
        };
        entry.hash = state.chain.add_entry(&entry.hashable()?);
        state.buffer.push(entry.clone());

        tracing::info!(
            tenant = %entry.tenant_id,
            action = ?entry.action,
            resource_type = %entry.resource_type,
            resource_id = %entry.resource_id,
            confidence = ?entry.confidence,
            "Audit entry recorded"
        );

        Ok(entry)
    }

    /// Record an agent decision with reasoning and input summary
    pub fn record_agent_decision(&self, record: AgentDecisionRecord) -> Result<AuditEntry> {
        let mut details = JsonMap::new();
        details.insert("decision".into(), serde_json::json!(record.decision));
        details.insert("reasoning".into(), serde_json::json!(record.reasoning));
        details.insert(
            "input_summary".into(),
            serde_json::Value::Object(record.input_summary),
        );

        self.record(
            &record.tenant_id,
            Actor::Agent(record.agent_name),
            AuditAction::AgentDecision,
            &record.resource_type,
            &record.resource_id,
            details,
            Some(record.confidence),
        )
    }

    /// Drain buffered entries for durable storage
    pub fn flush(&self) -> Result<Vec<AuditEntry>> {
        let mut state = self.state.lock().map_err(|e| {
            DialogueError::Provider(format!("Audit trail lock poisoned: {}", e))
        })?;
        Ok(std::mem::take(&mut state.buffer))
    }

    /// Number of entries waiting for `flush()`
    pub fn pending(&self) -> usize {
        self.state.lock().map(|s| s.buffer.len()).unwrap_or(0)
    }

    /// Hash of the most recent entry
    pub fn last_hash(&self) -> Result<String> {
        let state = self.state.lock().map_err(|e| {
            DialogueError::Provider(format!("Audit trail lock poisoned: {}", e))
        })?;
        Ok(state.chain.previous_hash().to_string())
    }

    /// Poison the trail lock so every later write fails
    #[cfg(test)]
    pub(crate) fn poison(&self) {
        let _ = std::thread::scope(|s| {
            s.spawn(|| {
                let _guard = self.state.lock();
                panic!("audit trail poisoned");
            })
            .join()
        });
    }

    /// Re-derive every hash and link from the entries themselves
    ///
    /// `entries` must start at `start_hash` (genesis for a full trail).
    pub fn verify_entries(entries: &[AuditEntry], start_hash: &str) -> bool {
        let mut previous = start_hash.to_string();
        for entry in entries {
            if entry.previous_hash != previous {
                return false;
            }
            let hashable = match entry.hashable() {
                Ok(v) => v,
                Err(_) => return false,
            };
            if HashChain::compute(&previous, &hashable) != entry.hash {
                return false;
            }
            previous = entry.hash.clone();
        }
        true
    }
}
