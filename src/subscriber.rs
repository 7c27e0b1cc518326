//! Message subscribers
//!
//! Fan-out targets for the bus and for broker consumers. A failing subscriber
//! never affects delivery to the others.

use crate::error::Result;
use crate::types::{DialogueNotification, Message};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// Receives messages addressed to a tenant
#[async_trait]
pub trait MessageSubscriber: Send + Sync {
    async fn on_message(&self, message: &Message) -> Result<()>;
}

/// Closure-backed subscriber
struct FnSubscriber<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> MessageSubscriber for FnSubscriber<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn on_message(&self, message: &Message) -> Result<()> {
        (self.f)(message.clone()).await
    }
}

/// Adapt an async closure into a subscriber
///
/// ```rust,ignore
/// bus.subscribe("acme", subscriber_fn(|msg| async move {
///     println!("{} -> {}", msg.from_agent, msg.content);
///     Ok(())
/// })).await;
/// ```
pub fn subscriber_fn<F, Fut>(f: F) -> Arc<dyn MessageSubscriber>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnSubscriber { f })
}

/// Closure-backed subscriber that only sees the notification event
struct NotificationSubscriber<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> MessageSubscriber for NotificationSubscriber<F>
where
    F: Fn(DialogueNotification) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn on_message(&self, message: &Message) -> Result<()> {
        (self.f)(DialogueNotification::from(message)).await
    }
}

/// Adapt an async closure into a subscriber for a real-time notification layer
///
/// The closure receives a `DialogueNotification` (id, agent, type, truncated
/// content, timestamp) rather than the full message.
pub fn notification_fn<F, Fut>(f: F) -> Arc<dyn MessageSubscriber>
where
    F: Fn(DialogueNotification) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(NotificationSubscriber { f })
}
