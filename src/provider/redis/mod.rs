//! Redis Streams dialogue provider
//!
//! The persistent-stream backend. Each message is written to the stream of
//! its destination tenant, its origin tenant and its thread. Tenants consume
//! their stream through a consumer group with explicit acknowledgement, so
//! unacknowledged entries survive a crash and show up in `pending`.
//!
//! Delivery is at-least-once: consumers must deduplicate by message id
//! (see `MessageDeduplicator`).

mod client;
mod config;

pub use client::{PendingEntry, RedisStreamClient, StreamDelivery};
pub use config::RedisConfig;

use crate::error::Result;
use crate::provider::DialogueProvider;
use crate::retry::{with_retry, AttemptOutcome, RetryConfig};
use crate::types::{Approval, Message};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::RwLock;

/// Bounded copy of recently appended threads
///
/// Holds at most `max_threads` threads of at most `max_per_thread` messages
/// each. The oldest thread and the oldest message of a thread go first.
#[derive(Debug)]
struct ThreadCache {
    threads: HashMap<String, VecDeque<Message>>,
    order: VecDeque<String>,
    max_threads: usize,
    max_per_thread: usize,
}

impl ThreadCache {
    fn new(max_threads: usize, max_per_thread: usize) -> Self {
        Self {
            threads: HashMap::new(),
            order: VecDeque::new(),
            max_threads,
            max_per_thread,
        }
    }

    fn push(&mut self, message: &Message) {
        if self.max_threads == 0 || self.max_per_thread == 0 {
            return;
        }

        let thread_id = message.thread_id();
        if !self.threads.contains_key(thread_id) {
            if self.order.len() == self.max_threads {
                if let Some(oldest) = self.order.pop_front() {
                    self.threads.remove(&oldest);
                }
            }
            self.order.push_back(thread_id.to_string());
        }

        let thread = self.threads.entry(thread_id.to_string()).or_default();
        if thread.len() == self.max_per_thread {
            thread.pop_front();
        }
        thread.push_back(message.clone());
    }

    fn get(&self, thread_id: &str) -> Vec<Message> {
        self.threads
            .get(thread_id)
            .map(|thread| thread.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn apply_approval(&mut self, message_id: &str, approval: &Approval) {
        for message in self.threads.values_mut().flatten() {
            if message.id == message_id {
                approval.apply(message);
            }
        }
    }

    fn len(&self) -> usize {
        self.threads.len()
    }
}

/// Redis Streams dialogue provider
///
/// Wraps `RedisStreamClient` and implements `DialogueProvider`. A bounded
/// local thread cache answers `get_thread` when Redis is unreachable.
pub struct RedisStreamProvider {
    client: RedisStreamClient,
    retry: RetryConfig,
    /// Recent threads appended through this instance
    thread_cache: RwLock<ThreadCache>,
    /// tenants whose consumer group is known to exist
    groups: RwLock<HashSet<String>>,
}

impl RedisStreamProvider {
    /// Connect to Redis
    pub async fn connect(config: RedisConfig) -> Result<Self> {
        let retry = config.retry.clone();
        let cache = ThreadCache::new(config.cache_max_threads, config.cache_max_messages);
        let client = RedisStreamClient::connect(config).await?;
        Ok(Self {
            client,
            retry,
            thread_cache: RwLock::new(cache),
            groups: RwLock::new(HashSet::new()),
        })
    }

    /// Get the underlying client for advanced usage
    pub fn client(&self) -> &RedisStreamClient {
        &self.client
    }

    /// Create the tenant's consumer group; "already exists" is not an error
    pub async fn ensure_group(&self, tenant_id: &str) -> Result<()> {
        if self.groups.read().await.contains(tenant_id) {
            return Ok(());
        }
        self.client.ensure_group(tenant_id).await?;
        self.groups.write().await.insert(tenant_id.to_string());
        Ok(())
    }

    /// Read new entries from the tenant's stream as `consumer`
    ///
    /// Creates the consumer group on first use. Entries stay pending until
    /// acknowledged with `ack`.
    pub async fn read_as_consumer(
        &self,
        tenant_id: &str,
        consumer: &str,
    ) -> Result<Vec<StreamDelivery>> {
        self.ensure_group(tenant_id).await?;
        self.client.read_group(tenant_id, consumer).await
    }

    /// Acknowledge processed entries
    pub async fn ack(&self, tenant_id: &str, entry_ids: &[String]) -> Result<u64> {
        let acked = self.client.ack(tenant_id, entry_ids).await?;
        tracing::debug!(tenant = %tenant_id, acked, "Stream entries acknowledged");
        Ok(acked)
    }

    /// Unacknowledged entries of the tenant's consumer group
    pub async fn pending(&self, tenant_id: &str, count: usize) -> Result<Vec<PendingEntry>> {
        self.ensure_group(tenant_id).await?;
        self.client.pending(tenant_id, count).await
    }

    async fn overlay_approvals(&self, mut messages: Vec<Message>) -> Result<Vec<Message>> {
        let ids: Vec<String> = messages.iter().map(|m| m.id.clone()).collect();
        let approvals = self.client.approvals(&ids).await?;
        for message in &mut messages {
            if let Some(approval) = approvals.get(&message.id) {
                approval.apply(message);
            }
        }
        Ok(messages)
    }
}

#[async_trait]
impl DialogueProvider for RedisStreamProvider {
    async fn append(&self, message: &Message) -> Result<()> {
        let client = &self.client;
        let target = self.client.config().tenant_stream(&message.to_tenant);

        let written = with_retry(&self.retry, &target, move |_| async move {
            AttemptOutcome::from(client.append(message).await)
        })
        .await?;

        if written {
            self.thread_cache.write().await.push(message);
        }

        Ok(())
    }

    async fn get_thread(&self, thread_id: &str) -> Result<Vec<Message>> {
        let key = self.client.config().thread_stream(thread_id);
        let fetched = match self.client.range(&key).await {
            Ok(messages) => self.overlay_approvals(messages).await,
            Err(e) => Err(e),
        };

        match fetched {
            Ok(messages) => Ok(messages),
            Err(e) if e.is_transient() => {
                tracing::warn!(thread = %thread_id, error = %e, "Redis unavailable, serving thread from local cache");
                Ok(self.thread_cache.read().await.get(thread_id))
            }
            Err(e) => Err(e),
        }
    }

    async fn get_messages_for_tenant(&self, tenant_id: &str) -> Result<Vec<Message>> {
        let key = self.client.config().tenant_stream(tenant_id);
        let messages = self.client.range(&key).await?;
        self.overlay_approvals(messages).await
    }

    async fn find_message(&self, message_id: &str) -> Result<Option<Message>> {
        let Some(mut message) = self.client.find(message_id).await? else {
            return Ok(None);
        };
        let approvals = self.client.approvals(&[message_id.to_string()]).await?;
        if let Some(approval) = approvals.get(message_id) {
            approval.apply(&mut message);
        }
        Ok(Some(message))
    }

    async fn record_approval(&self, message_id: &str, approval: &Approval) -> Result<bool> {
        let client = &self.client;
        let target = self.client.config().approvals_key();

        let found = with_retry(&self.retry, &target, move |_| async move {
            AttemptOutcome::from(client.set_approval(message_id, approval).await)
        })
        .await?;

        if found {
            self.thread_cache
                .write()
                .await
                .apply_approval(message_id, approval);
        }

        Ok(found)
    }

    fn name(&self) -> &str {
        "redis"
    }

    async fn health(&self) -> Result<bool> {
        Ok(self.client.ping().await.is_ok())
    }
}
