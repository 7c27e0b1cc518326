//! Dialogue provider trait: the core abstraction for message backends
//!
//! All backends (in-process, Redis Streams, NATS JetStream) implement
//! `DialogueProvider` so the bus depends only on this contract and never on
//! a concrete transport.

use crate::error::Result;
use crate::types::{Approval, Message};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};

pub mod memory;
pub mod nats;
pub mod redis;

/// Core trait for dialogue backends
///
/// Implementations own durability and ordering: within a thread, messages
/// come back in append order.
#[async_trait]
pub trait DialogueProvider: Send + Sync {
    /// Durably append a finalized message
    ///
    /// Appending an id that is already stored is a no-op for backends that
    /// can detect it; consumers must still deduplicate by id.
    async fn append(&self, message: &Message) -> Result<()>;

    /// All messages of a thread, in send order
    async fn get_thread(&self, thread_id: &str) -> Result<Vec<Message>>;

    /// Messages sent to or from a tenant, in send order
    async fn get_messages_for_tenant(&self, tenant_id: &str) -> Result<Vec<Message>>;

    /// Look up a single message by id
    async fn find_message(&self, message_id: &str) -> Result<Option<Message>>;

    /// Record a human decision; returns false if the message is unknown
    async fn record_approval(&self, message_id: &str, approval: &Approval) -> Result<bool>;

    /// Provider name (e.g., "memory", "redis", "nats")
    fn name(&self) -> &str;

    /// Health check: returns true if the backend is reachable
    async fn health(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Bounded set of recently processed message ids
///
/// Stream and broker delivery is at-least-once; consumers run every
/// delivery through `first_seen` and skip repeats.
#[derive(Debug)]
pub struct MessageDeduplicator {
    seen: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl MessageDeduplicator {
    /// Remember at most `capacity` ids, evicting the oldest first
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// True the first time an id is observed
    pub fn first_seen(&mut self, message_id: &str) -> bool {
        if self.seen.contains(message_id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(message_id.to_string());
        self.order.push_back(message_id.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for MessageDeduplicator {
    fn default() -> Self {
        Self::new(10_000)
    }
}
