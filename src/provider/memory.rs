//! In-memory dialogue provider
//!
//! Keeps an append-only log plus a thread index in process memory. Nothing is
//! visible across processes and nothing survives a restart, which makes this
//! backend suitable for tests and single-instance deployments.

use crate::error::Result;
use crate::provider::DialogueProvider;
use crate::types::{Approval, Message};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct MemoryState {
    /// Every appended message, in append order
    log: Vec<Message>,
    /// message id → position in `log`
    index: HashMap<String, usize>,
    /// thread id → positions in `log`, in append order
    threads: HashMap<String, Vec<usize>>,
}

/// In-process dialogue provider
#[derive(Default)]
pub struct MemoryProvider {
    state: RwLock<MemoryState>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored messages
    pub async fn len(&self) -> usize {
        self.state.read().await.log.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.log.is_empty()
    }
}

#[async_trait]
impl DialogueProvider for MemoryProvider {
    async fn append(&self, message: &Message) -> Result<()> {
        let mut state = self.state.write().await;

        if state.index.contains_key(&message.id) {
            tracing::debug!(message_id = %message.id, "Duplicate append ignored");
            return Ok(());
        }

        let position = state.log.len();
        state.log.push(message.clone());
        state.index.insert(message.id.clone(), position);
        state
            .threads
            .entry(message.thread_id().to_string())
            .or_default()
            .push(position);

        Ok(())
    }

    async fn get_thread(&self, thread_id: &str) -> Result<Vec<Message>> {
        let state = self.state.read().await;
        Ok(state
            .threads
            .get(thread_id)
            .map(|positions| positions.iter().map(|&i| state.log[i].clone()).collect())
            .unwrap_or_default())
    }

    async fn get_messages_for_tenant(&self, tenant_id: &str) -> Result<Vec<Message>> {
        let state = self.state.read().await;
        Ok(state
            .log
            .iter()
            .filter(|m| m.to_tenant == tenant_id || m.from_tenant == tenant_id)
            .cloned()
            .collect())
    }

    async fn find_message(&self, message_id: &str) -> Result<Option<Message>> {
        let state = self.state.read().await;
        Ok(state.index.get(message_id).map(|&i| state.log[i].clone()))
    }

    async fn record_approval(&self, message_id: &str, approval: &Approval) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(&position) = state.index.get(message_id) else {
            return Ok(false);
        };
        approval.apply(&mut state.log[position]);
        Ok(true)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageType;

    fn msg(from: &str, to: &str, content: &str) -> Message {
        Message::new(from, to, "agent", MessageType::Question, content)
    }

    #[tokio::test]
    async fn test_append_and_find() {
        let provider = MemoryProvider::new();
        let m = msg("a", "b", "hello");
        provider.append(&m).await.unwrap();

        let found = provider.find_message(&m.id).await.unwrap().unwrap();
        assert_eq!(found.content, "hello");
        assert!(provider.find_message("msg-missing").await.unwrap().is_none());
        assert_eq!(provider.len().await, 1);
    }

    #[tokio::test]
    async fn test_thread_order() {
        let provider = MemoryProvider::new();
        let root = msg("a", "b", "first").with_thread("t-1");
        let reply = msg("b", "a", "second").in_reply_to(&root);
        let other = msg("a", "b", "unrelated");

        provider.append(&root).await.unwrap();
        provider.append(&other).await.unwrap();
        provider.append(&reply).await.unwrap();

        let thread = provider.get_thread("t-1").await.unwrap();
        assert_eq!(thread.len(), 2);
        assert_eq!(thread[0].content, "first");
        assert_eq!(thread[1].content, "second");
        assert!(provider.get_thread("t-missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tenant_view_includes_both_directions() {
        let provider = MemoryProvider::new();
        provider.append(&msg("a", "b", "out")).await.unwrap();
        provider.append(&msg("b", "a", "in")).await.unwrap();
        provider.append(&msg("b", "c", "elsewhere")).await.unwrap();

        let for_a = provider.get_messages_for_tenant("a").await.unwrap();
        assert_eq!(for_a.len(), 2);
        assert_eq!(for_a[0].content, "out");
        assert_eq!(for_a[1].content, "in");
    }

    #[tokio::test]
    async fn test_duplicate_append_is_noop() {
        let provider = MemoryProvider::new();
        let m = msg("a", "b", "once");
        provider.append(&m).await.unwrap();
        provider.append(&m).await.unwrap();
        assert_eq!(provider.len().await, 1);
        assert_eq!(provider.get_thread(m.thread_id()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_record_approval() {
        let provider = MemoryProvider::new();
        let m = msg("a", "b", "approve me");
        provider.append(&m).await.unwrap();

        let approval = Approval::new(true, "user-1");
        assert!(provider.record_approval(&m.id, &approval).await.unwrap());
        assert!(!provider.record_approval("msg-missing", &approval).await.unwrap());

        let stored = provider.find_message(&m.id).await.unwrap().unwrap();
        assert_eq!(stored.human_approved, Some(true));
        assert_eq!(stored.approved_by.as_deref(), Some("user-1"));
        assert!(stored.approved_at.is_some());
    }
}
