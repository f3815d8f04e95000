//! # Queue Transport
//!
//! At-least-once message delivery. [`PgmqTransport`] talks to the pgmq
//! extension through plain SQL on the shared sqlx pool; [`InMemoryTransport`]
//! keeps the same visibility-timeout semantics in process.

use super::errors::{MessagingError, MessagingResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// A message read from a queue; invisible to other readers until its
/// visibility timeout lapses or it is deleted
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    pub msg_id: i64,
    pub read_ct: i32,
    pub message: serde_json::Value,
}

#[async_trait]
pub trait QueueTransport: Send + Sync {
    async fn ensure_queue(&self, queue: &str) -> MessagingResult<()>;

    async fn send(&self, queue: &str, message: &serde_json::Value) -> MessagingResult<i64>;

    async fn read(
        &self,
        queue: &str,
        visibility_timeout_seconds: i32,
        limit: i32,
    ) -> MessagingResult<Vec<QueueMessage>>;

    async fn delete(&self, queue: &str, msg_id: i64) -> MessagingResult<()>;

    /// Push the message's visibility `seconds` into the future
    async fn set_visibility_timeout(
        &self,
        queue: &str,
        msg_id: i64,
        seconds: i32,
    ) -> MessagingResult<()>;
}

#[derive(Debug, Clone)]
pub struct PgmqTransport {
    pool: PgPool,
}

impl PgmqTransport {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueTransport for PgmqTransport {
    async fn ensure_queue(&self, queue: &str) -> MessagingResult<()> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(queue)
            .execute(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(queue, "create", e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self, message))]
    async fn send(&self, queue: &str, message: &serde_json::Value) -> MessagingResult<i64> {
        let msg_id = sqlx::query_scalar::<_, i64>("SELECT pgmq.send($1, $2::jsonb)")
            .bind(queue)
            .bind(message)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(queue, "send", e.to_string()))?;

        debug!(msg_id, "Message sent");
        Ok(msg_id)
    }

    async fn read(
        &self,
        queue: &str,
        visibility_timeout_seconds: i32,
        limit: i32,
    ) -> MessagingResult<Vec<QueueMessage>> {
        let rows = sqlx::query("SELECT msg_id, read_ct, message FROM pgmq.read($1, $2, $3)")
            .bind(queue)
            .bind(visibility_timeout_seconds)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(queue, "read", e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| QueueMessage {
                msg_id: row.get("msg_id"),
                read_ct: row.get("read_ct"),
                message: row.get("message"),
            })
            .collect())
    }

    async fn delete(&self, queue: &str, msg_id: i64) -> MessagingResult<()> {
        let deleted = sqlx::query_scalar::<_, bool>("SELECT pgmq.delete($1, $2)")
            .bind(queue)
            .bind(msg_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(queue, "delete", e.to_string()))?;

        if !deleted {
            return Err(MessagingError::MessageNotFound {
                queue_name: queue.to_string(),
                msg_id,
            });
        }
        Ok(())
    }

    async fn set_visibility_timeout(
        &self,
        queue: &str,
        msg_id: i64,
        seconds: i32,
    ) -> MessagingResult<()> {
        let updated = sqlx::query("SELECT msg_id FROM pgmq.set_vt($1, $2, $3)")
            .bind(queue)
            .bind(msg_id)
            .bind(seconds)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(queue, "set_vt", e.to_string()))?;

        if updated.is_none() {
            return Err(MessagingError::MessageNotFound {
                queue_name: queue.to_string(),
                msg_id,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct StoredMessage {
    msg_id: i64,
    read_ct: i32,
    visible_at: Instant,
    message: serde_json::Value,
}

/// Process-local queues with pgmq-like visibility semantics
#[derive(Debug, Default)]
pub struct InMemoryTransport {
    queues: Mutex<HashMap<String, Vec<StoredMessage>>>,
    next_id: AtomicI64,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message still in `queue`, visible or not
    pub fn messages(&self, queue: &str) -> Vec<serde_json::Value> {
        self.queues
            .lock()
            .get(queue)
            .map(|messages| messages.iter().map(|m| m.message.clone()).collect())
            .unwrap_or_default()
    }

    pub fn len(&self, queue: &str) -> usize {
        self.queues.lock().get(queue).map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self, queue: &str) -> bool {
        self.len(queue) == 0
    }
}

fn seconds(value: i32) -> Duration {
    Duration::from_secs(value.max(0) as u64)
}

#[async_trait]
impl QueueTransport for InMemoryTransport {
    async fn ensure_queue(&self, queue: &str) -> MessagingResult<()> {
        self.queues.lock().entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn send(&self, queue: &str, message: &serde_json::Value) -> MessagingResult<i64> {
        let msg_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.queues
            .lock()
            .entry(queue.to_string())
            .or_default()
            .push(StoredMessage {
                msg_id,
                read_ct: 0,
                visible_at: Instant::now(),
                message: message.clone(),
            });
        Ok(msg_id)
    }

    async fn read(
        &self,
        queue: &str,
        visibility_timeout_seconds: i32,
        limit: i32,
    ) -> MessagingResult<Vec<QueueMessage>> {
        let mut queues = self.queues.lock();
        let messages = queues
            .get_mut(queue)
            .ok_or_else(|| MessagingError::queue_not_found(queue))?;

        let now = Instant::now();
        let mut read = Vec::new();
        for stored in messages
            .iter_mut()
            .filter(|m| m.visible_at <= now)
            .take(limit.max(0) as usize)
        {
            stored.read_ct += 1;
            stored.visible_at = now + seconds(visibility_timeout_seconds);
            read.push(QueueMessage {
                msg_id: stored.msg_id,
                read_ct: stored.read_ct,
                message: stored.message.clone(),
            });
        }
        Ok(read)
    }

    async fn delete(&self, queue: &str, msg_id: i64) -> MessagingResult<()> {
        let mut queues = self.queues.lock();
        let messages = queues
            .get_mut(queue)
            .ok_or_else(|| MessagingError::queue_not_found(queue))?;

        let before = messages.len();
        messages.retain(|m| m.msg_id != msg_id);
        if messages.len() == before {
            return Err(MessagingError::MessageNotFound {
                queue_name: queue.to_string(),
                msg_id,
            });
        }
        Ok(())
    }

    async fn set_visibility_timeout(
        &self,
        queue: &str,
        msg_id: i64,
        seconds_from_now: i32,
    ) -> MessagingResult<()> {
        let mut queues = self.queues.lock();
        let stored = queues
            .get_mut(queue)
            .and_then(|messages| messages.iter_mut().find(|m| m.msg_id == msg_id))
            .ok_or_else(|| MessagingError::MessageNotFound {
                queue_name: queue.to_string(),
                msg_id,
            })?;
        stored.visible_at = Instant::now() + seconds(seconds_from_now);
        Ok(())
    }
}

/// Handle on the queue message that triggered the current invocation, used
/// by long-running processors to keep the transport from redelivering it
#[derive(Clone)]
pub struct MessageLease {
    transport: Arc<dyn QueueTransport>,
    queue: String,
    msg_id: i64,
}

impl std::fmt::Debug for MessageLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageLease")
            .field("queue", &self.queue)
            .field("msg_id", &self.msg_id)
            .finish()
    }
}

impl MessageLease {
    pub fn new(transport: Arc<dyn QueueTransport>, queue: impl Into<String>, msg_id: i64) -> Self {
        Self {
            transport,
            queue: queue.into(),
            msg_id,
        }
    }

    pub fn msg_id(&self) -> i64 {
        self.msg_id
    }

    pub async fn extend(&self, seconds: i32) -> MessagingResult<()> {
        debug!(queue = %self.queue, msg_id = self.msg_id, seconds, "Extending message lease");
        self.transport
            .set_visibility_timeout(&self.queue, self.msg_id, seconds)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_read_hides_message_until_timeout() {
        let transport = InMemoryTransport::new();
        transport.ensure_queue("q").await.unwrap();
        transport.send("q", &json!({"n": 1})).await.unwrap();

        let first = transport.read("q", 30, 10).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].read_ct, 1);
        assert!(transport.read("q", 30, 10).await.unwrap().is_empty());

        transport
            .set_visibility_timeout("q", first[0].msg_id, 0)
            .await
            .unwrap();
        let again = transport.read("q", 30, 10).await.unwrap();
        assert_eq!(again[0].read_ct, 2);
    }

    #[tokio::test]
    async fn test_delete_removes_message() {
        let transport = InMemoryTransport::new();
        let msg_id = transport.send("q", &json!({})).await.unwrap();

        transport.delete("q", msg_id).await.unwrap();
        assert!(transport.is_empty("q"));
        assert!(matches!(
            transport.delete("q", msg_id).await.unwrap_err(),
            MessagingError::MessageNotFound { .. }
        ));
    }

    #[tokio::test]
    async fn test_lease_extension() {
        let transport = Arc::new(InMemoryTransport::new());
        let msg_id = transport.send("q", &json!({})).await.unwrap();
        transport.read("q", 0, 1).await.unwrap();

        let lease = MessageLease::new(transport.clone(), "q", msg_id);
        lease.extend(600).await.unwrap();

        assert!(transport.read("q", 30, 10).await.unwrap().is_empty());
    }
}
