//! NATS JetStream broker provider
//!
//! The replicated-log backend. Durability comes from an inner provider (the
//! in-memory log by default, or Redis Streams); every append is additionally
//! published to `{subject_prefix}.{to_tenant}` for cross-process fan-out.
//! Publishing is best-effort: a broker failure is logged and the append
//! still succeeds, because the inner provider remains the source of truth.

mod client;
mod config;

pub use client::{NatsClient, StreamInfo};
pub use config::{NatsConfig, StorageType};

use crate::error::Result;
use crate::provider::memory::MemoryProvider;
use crate::provider::{DialogueProvider, MessageDeduplicator};
use crate::subscriber::MessageSubscriber;
use crate::types::{Approval, Message};
use async_trait::async_trait;
use futures::future::Either;
use futures::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;

/// NATS JetStream broker provider
pub struct NatsProvider {
    client: NatsClient,
    inner: Arc<dyn DialogueProvider>,
    /// tenant id → handlers for messages consumed from the broker
    handlers: RwLock<HashMap<String, Vec<Arc<dyn MessageSubscriber>>>>,
}

impl NatsProvider {
    /// Connect to NATS, keeping the durable log in process memory
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        Self::connect_with_inner(config, Arc::new(MemoryProvider::new())).await
    }

    /// Connect to NATS on top of an existing durable provider
    pub async fn connect_with_inner(
        config: NatsConfig,
        inner: Arc<dyn DialogueProvider>,
    ) -> Result<Self> {
        let client = NatsClient::connect(config).await?;
        Ok(Self {
            client,
            inner,
            handlers: RwLock::new(HashMap::new()),
        })
    }

    /// Get the underlying NATS client for advanced usage
    pub fn client(&self) -> &NatsClient {
        &self.client
    }

    /// The durable provider behind the broker
    pub fn inner(&self) -> &Arc<dyn DialogueProvider> {
        &self.inner
    }

    /// Register a handler for broker messages addressed to a tenant
    ///
    /// Handlers run from `run_consumer`, independently of the bus's own
    /// subscriber list.
    pub async fn on_message(&self, tenant_id: &str, handler: Arc<dyn MessageSubscriber>) {
        self.handlers
            .write()
            .await
            .entry(tenant_id.to_string())
            .or_default()
            .push(handler);
    }

    /// Consume a tenant's subject and dispatch to its handlers until
    /// `shutdown` resolves or the consumer stream ends
    ///
    /// Redeliveries are skipped by message id. Every consumed entry is
    /// acknowledged, including ones whose payload cannot be decoded.
    pub async fn run_consumer<F>(
        &self,
        tenant_id: &str,
        consumer_name: &str,
        shutdown: F,
    ) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let messages = self.client.tenant_messages(tenant_id, consumer_name).await?;
        let mut messages = std::pin::pin!(messages);
        let mut shutdown = std::pin::pin!(shutdown);
        let mut dedup = MessageDeduplicator::default();

        loop {
            let item = match futures::future::select(messages.next(), shutdown.as_mut()).await {
                Either::Left((Some(item), _)) => item,
                Either::Left((None, _)) => break,
                Either::Right(_) => {
                    tracing::info!(tenant = %tenant_id, consumer = consumer_name, "Consumer shut down");
                    break;
                }
            };

            let msg = match item {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::warn!(tenant = %tenant_id, error = %e, "Error receiving broker message");
                    continue;
                }
            };

            match serde_json::from_slice::<Message>(&msg.payload) {
                Ok(message) if dedup.first_seen(&message.id) => {
                    self.dispatch(&message).await;
                }
                Ok(message) => {
                    tracing::debug!(message_id = %message.id, "Skipping redelivered message");
                }
                Err(e) => {
                    tracing::warn!(subject = %msg.subject, error = %e, "Skipping unreadable broker message");
                }
            }

            if let Err(e) = msg.ack().await {
                tracing::warn!(tenant = %tenant_id, error = %e, "Failed to ack broker message");
            }
        }

        Ok(())
    }

    /// Invoke every handler registered for the destination tenant
    async fn dispatch(&self, message: &Message) {
        let handlers = self
            .handlers
            .read()
            .await
            .get(&message.to_tenant)
            .cloned()
            .unwrap_or_default();

        for handler in handlers {
            if let Err(e) = handler.on_message(message).await {
                tracing::error!(
                    message_id = %message.id,
                    tenant = %message.to_tenant,
                    error = %e,
                    "Broker handler failed"
                );
            }
        }
    }
}

#[async_trait]
impl DialogueProvider for NatsProvider {
    async fn append(&self, message: &Message) -> Result<()> {
        self.inner.append(message).await?;

        if let Err(e) = self.client.publish(message).await {
            tracing::warn!(
                message_id = %message.id,
                to = %message.to_tenant,
                error = %e,
                "Broker publish failed, message kept in durable log only"
            );
        }

        Ok(())
    }

    async fn get_thread(&self, thread_id: &str) -> Result<Vec<Message>> {
        self.inner.get_thread(thread_id).await
    }

    async fn get_messages_for_tenant(&self, tenant_id: &str) -> Result<Vec<Message>> {
        self.inner.get_messages_for_tenant(tenant_id).await
    }

    async fn find_message(&self, message_id: &str) -> Result<Option<Message>> {
        self.inner.find_message(message_id).await
    }

    async fn record_approval(&self, message_id: &str, approval: &Approval) -> Result<bool> {
        self.inner.record_approval(message_id, approval).await
    }

    fn name(&self) -> &str {
        "nats"
    }

    async fn health(&self) -> Result<bool> {
        Ok(self.client.is_connected() && self.inner.health().await?)
    }
}
