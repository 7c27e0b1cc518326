//! Redis Streams client: append, range, consumer groups, approvals

use super::config::RedisConfig;
use crate::error::{DialogueError, Result};
use crate::types::{Approval, Message};
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::streams::{
    StreamId, StreamPendingCountReply, StreamRangeReply, StreamReadOptions, StreamReadReply,
};
use redis::AsyncCommands;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Field holding the serialized message in every stream entry
const PAYLOAD_FIELD: &str = "payload";

/// A stream entry delivered to a consumer group member
#[derive(Debug, Clone)]
pub struct StreamDelivery {
    /// Redis stream entry id, needed for `ack`
    pub entry_id: String,
    pub message: Message,
}

/// An entry delivered but not yet acknowledged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub entry_id: String,
    pub consumer: String,
    /// Milliseconds since the entry was last delivered
    pub idle_ms: u64,
    pub delivery_count: u64,
}

/// Redis Streams client
///
/// Low-level operations over the stream and hash layout described by
/// `RedisConfig`. The connection manager reconnects on its own; clones of it
/// share one multiplexed connection.
pub struct RedisStreamClient {
    conn: ConnectionManager,
    config: Arc<RedisConfig>,
}

impl RedisStreamClient {
    /// Connect to Redis
    ///
    /// Gives up with `Timeout` once `connect_timeout_ms` has passed.
    pub async fn connect(config: RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str()).map_err(|e| {
            DialogueError::Config(format!("Invalid Redis URL '{}': {}", config.url, e))
        })?;

        let manager_config = ConnectionManagerConfig::new()
            .set_number_of_retries(config.connect_retries)
            .set_connection_timeout(config.connect_timeout());
        let conn = tokio::time::timeout(
            config.connect_timeout(),
            client.get_connection_manager_with_config(manager_config),
        )
        .await
        .map_err(|_| {
            DialogueError::Timeout(format!(
                "connecting to {} after {}ms",
                config.url, config.connect_timeout_ms
            ))
        })?
        .map_err(|e| DialogueError::Connection(format!("{}: {}", config.url, e)))?;

        tracing::info!(url = %config.url, "Connected to Redis");

        Ok(Self {
            conn,
            config: Arc::new(config),
        })
    }

    /// Write a message to its destination, origin and thread streams
    ///
    /// The stream writes and the id index update happen in one MULTI/EXEC.
    /// Returns false if the id was already indexed. The index check runs
    /// before the transaction, so two concurrent appends of one id can both
    /// write; `range` drops the repeat.
    pub async fn append(&self, message: &Message) -> Result<bool> {
        let mut conn = self.conn.clone();
        let messages_key = self.config.messages_key();

        let exists: bool = conn
            .hexists(&messages_key, &message.id)
            .await
            .map_err(|e| redis_error("HEXISTS", e))?;
        if exists {
            return Ok(false);
        }

        let payload = serde_json::to_string(message)?;
        let fields = [(PAYLOAD_FIELD, payload.as_str())];

        let mut pipe = redis::pipe();
        pipe.atomic();
        for key in self.stream_keys(message) {
            pipe.xadd(key, "*", &fields).ignore();
        }
        pipe.hset(&messages_key, &message.id, &payload).ignore();

        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_error("XADD", e))?;

        tracing::debug!(
            message_id = %message.id,
            to = %message.to_tenant,
            thread = %message.thread_id(),
            "Message appended to streams"
        );

        Ok(true)
    }

    /// Every message in a stream, oldest first
    pub async fn range(&self, key: &str) -> Result<Vec<Message>> {
        let mut conn = self.conn.clone();
        let reply: StreamRangeReply = conn
            .xrange_all(key)
            .await
            .map_err(|e| redis_error("XRANGE", e))?;

        let mut seen = HashSet::new();
        Ok(reply
            .ids
            .iter()
            .filter_map(|entry| decode_entry(key, entry))
            .filter(|m| seen.insert(m.id.clone()))
            .collect())
    }

    /// Look up a message through the id index
    pub async fn find(&self, message_id: &str) -> Result<Option<Message>> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn
            .hget(self.config.messages_key(), message_id)
            .await
            .map_err(|e| redis_error("HGET", e))?;

        match payload {
            Some(p) => Ok(Some(serde_json::from_str(&p)?)),
            None => Ok(None),
        }
    }

    /// Stored approvals for the given ids
    pub async fn approvals(&self, message_ids: &[String]) -> Result<HashMap<String, Approval>> {
        if message_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut conn = self.conn.clone();
        let values: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(self.config.approvals_key())
            .arg(message_ids)
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_error("HMGET", e))?;

        let mut approvals = HashMap::new();
        for (id, value) in message_ids.iter().zip(values) {
            if let Some(raw) = value {
                match serde_json::from_str::<Approval>(&raw) {
                    Ok(approval) => {
                        approvals.insert(id.clone(), approval);
                    }
                    Err(e) => {
                        tracing::warn!(message_id = %id, error = %e, "Skipping unreadable approval");
                    }
                }
            }
        }
        Ok(approvals)
    }

    /// Store a human decision; false if the message is unknown
    pub async fn set_approval(&self, message_id: &str, approval: &Approval) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn
            .hexists(self.config.messages_key(), message_id)
            .await
            .map_err(|e| redis_error("HEXISTS", e))?;
        if !exists {
            return Ok(false);
        }

        let payload = serde_json::to_string(approval)?;
        let _: () = conn
            .hset(self.config.approvals_key(), message_id, payload)
            .await
            .map_err(|e| redis_error("HSET", e))?;
        Ok(true)
    }

    /// Create the tenant's consumer group if it does not exist
    pub async fn ensure_group(&self, tenant_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = self.config.tenant_stream(tenant_id);
        let group = self.config.group_name(tenant_id);

        let result: redis::RedisResult<()> = conn.xgroup_create_mkstream(&key, &group, "0").await;
        match result {
            Ok(()) => {
                tracing::info!(stream = %key, group = %group, "Consumer group created");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(DialogueError::Consumer(format!(
                "Failed to create group '{}' on '{}': {}",
                group, key, e
            ))),
        }
    }

    /// Read new entries as a consumer-group member
    pub async fn read_group(&self, tenant_id: &str, consumer: &str) -> Result<Vec<StreamDelivery>> {
        let mut conn = self.conn.clone();
        let key = self.config.tenant_stream(tenant_id);
        let group = self.config.group_name(tenant_id);

        let mut opts = StreamReadOptions::default()
            .group(&group, consumer)
            .count(self.config.read_count);
        if self.config.block_ms > 0 {
            opts = opts.block(self.config.block_ms);
        }

        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&key], &[">"], &opts)
            .await
            .map_err(|e| redis_error("XREADGROUP", e))?;

        let mut deliveries = Vec::new();
        for stream in reply.map(|r| r.keys).unwrap_or_default() {
            for entry in &stream.ids {
                if let Some(message) = decode_entry(&stream.key, entry) {
                    deliveries.push(StreamDelivery {
                        entry_id: entry.id.clone(),
                        message,
                    });
                }
            }
        }
        Ok(deliveries)
    }

    /// Acknowledge processed entries, returning how many were acknowledged
    pub async fn ack(&self, tenant_id: &str, entry_ids: &[String]) -> Result<u64> {
        if entry_ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let key = self.config.tenant_stream(tenant_id);
        let group = self.config.group_name(tenant_id);

        conn.xack(&key, &group, entry_ids)
            .await
            .map_err(|e| DialogueError::Ack(format!("XACK on '{}': {}", key, e)))
    }

    /// Entries delivered to the group but not yet acknowledged
    pub async fn pending(&self, tenant_id: &str, count: usize) -> Result<Vec<PendingEntry>> {
        let mut conn = self.conn.clone();
        let key = self.config.tenant_stream(tenant_id);
        let group = self.config.group_name(tenant_id);

        let reply: StreamPendingCountReply = conn
            .xpending_count(&key, &group, "-", "+", count)
            .await
            .map_err(|e| DialogueError::Consumer(format!("XPENDING on '{}': {}", key, e)))?;

        Ok(reply
            .ids
            .into_iter()
            .map(|p| PendingEntry {
                entry_id: p.id,
                consumer: p.consumer,
                idle_ms: p.last_delivered_ms as u64,
                delivery_count: p.times_delivered as u64,
            })
            .collect())
    }

    /// PING the server
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_error("PING", e))?;
        Ok(())
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// Streams a message is written to
    fn stream_keys(&self, message: &Message) -> Vec<String> {
        let mut keys = vec![self.config.tenant_stream(&message.to_tenant)];
        if message.from_tenant != message.to_tenant {
            keys.push(self.config.tenant_stream(&message.from_tenant));
        }
        keys.push(self.config.thread_stream(message.thread_id()));
        keys
    }
}

/// Decode one stream entry, skipping entries that don't parse
fn decode_entry(key: &str, entry: &StreamId) -> Option<Message> {
    let payload: String = match entry.get(PAYLOAD_FIELD) {
        Some(p) => p,
        None => {
            tracing::warn!(stream = %key, entry_id = %entry.id, "Stream entry without payload");
            return None;
        }
    };

    match serde_json::from_str(&payload) {
        Ok(message) => Some(message),
        Err(e) => {
            tracing::warn!(stream = %key, entry_id = %entry.id, error = %e, "Skipping unreadable stream entry");
            None
        }
    }
}

/// Map a Redis error, classifying transport failures as connection errors
pub(crate) fn redis_error(op: &str, e: redis::RedisError) -> DialogueError {
    if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout() {
        DialogueError::Connection(format!("{}: {}", op, e))
    } else {
        DialogueError::Stream(format!("{}: {}", op, e))
    }
}
