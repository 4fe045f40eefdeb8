use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Script};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const RECEIVE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Pops the oldest pending message, parks it in the processing list and
/// registers its visibility deadline in one atomic step. Were these separate
/// commands, a worker crash in between would strand the message in the
/// processing list with no deadline, beyond the reach of `redrive_expired`.
const RECEIVE_SCRIPT: &str = r#"
local payload = redis.call('RPOP', KEYS[1])
if payload then
  redis.call('LPUSH', KEYS[2], payload)
  redis.call('ZADD', KEYS[3], ARGV[1], payload)
end
return payload
"#;

/// One received message plus the queue metadata the worker needs.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Stable across redeliveries; doubles as the job id.
    pub message_id: String,
    /// Acknowledgment token for this receive.
    pub receipt_handle: String,
    /// How many times this message has been received, this delivery included.
    pub receive_count: u32,
    /// Raw message body as enqueued by the producer.
    pub body: String,
}

/// Durable at-least-once job queue with visibility-timeout redelivery.
///
/// A received message stays invisible until it is either deleted or its
/// visibility timeout expires, at which point `redrive_expired` makes it
/// receivable again. Duplicate deliveries are possible and must be tolerated
/// by consumers.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Submit a message; returns the assigned message id.
    async fn send(&self, body: &str) -> Result<String, QueueError>;

    /// Receive at most one message, waiting up to `wait` for one to arrive.
    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, QueueError>;

    /// Acknowledge a delivery; the only action that prevents redelivery.
    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError>;

    /// Return in-flight messages whose visibility timeout has expired to the
    /// pending queue. Returns how many were redriven.
    async fn redrive_expired(&self) -> Result<u64, QueueError>;

    /// Number of pending (not in-flight) messages.
    async fn depth(&self) -> Result<u64, QueueError>;
}

/// Wire envelope stored in Redis; gives each message a stable identity
/// independent of its body.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    message_id: String,
    body: String,
}

/// Redis-backed queue. Pending messages live in a list; in-flight messages
/// are parked in a processing list with a deadline in a sorted set, and a
/// hash tracks per-message receive counts.
pub struct RedisQueue {
    client: redis::Client,
    receive_script: Script,
    pending_key: String,
    processing_key: String,
    deadlines_key: String,
    counts_key: String,
    visibility_timeout: Duration,
}

impl RedisQueue {
    pub fn new(
        redis_url: &str,
        queue_name: &str,
        visibility_timeout: Duration,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            receive_script: Script::new(RECEIVE_SCRIPT),
            pending_key: format!("{queue_name}:pending"),
            processing_key: format!("{queue_name}:processing"),
            deadlines_key: format!("{queue_name}:deadlines"),
            counts_key: format!("{queue_name}:receive_counts"),
            visibility_timeout,
        })
    }

    fn now_epoch() -> f64 {
        chrono::Utc::now().timestamp_millis() as f64 / 1000.0
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn send(&self, body: &str) -> Result<String, QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;
        let envelope = Envelope {
            message_id: Uuid::new_v4().to_string(),
            body: body.to_string(),
        };
        let payload = serde_json::to_string(&envelope).map_err(QueueError::Serialize)?;
        conn.lpush::<_, _, ()>(&self.pending_key, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(envelope.message_id)
    }

    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;

        let started = tokio::time::Instant::now();
        loop {
            let deadline = Self::now_epoch() + self.visibility_timeout.as_secs_f64();
            let payload: Option<String> = self
                .receive_script
                .key(&self.pending_key)
                .key(&self.processing_key)
                .key(&self.deadlines_key)
                .arg(deadline)
                .invoke_async(&mut conn)
                .await
                .map_err(QueueError::Redis)?;

            if let Some(payload) = payload {
                let envelope: Envelope = match serde_json::from_str(&payload) {
                    Ok(e) => e,
                    Err(e) => {
                        // Not one of our envelopes; drop it rather than
                        // redeliver it forever.
                        tracing::warn!(error = %e, "discarding corrupt queue entry");
                        conn.lrem::<_, _, ()>(&self.processing_key, 1, &payload)
                            .await
                            .map_err(QueueError::Redis)?;
                        conn.zrem::<_, _, ()>(&self.deadlines_key, &payload)
                            .await
                            .map_err(QueueError::Redis)?;
                        return Ok(None);
                    }
                };

                let receive_count: i64 = conn
                    .hincr(&self.counts_key, &envelope.message_id, 1)
                    .await
                    .map_err(QueueError::Redis)?;

                return Ok(Some(Delivery {
                    message_id: envelope.message_id,
                    receipt_handle: payload,
                    receive_count: receive_count as u32,
                    body: envelope.body,
                }));
            }

            let elapsed = started.elapsed();
            if elapsed >= wait {
                return Ok(None);
            }
            tokio::time::sleep(RECEIVE_POLL_INTERVAL.min(wait - elapsed)).await;
        }
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;
        conn.lrem::<_, _, ()>(&self.processing_key, 1, receipt_handle)
            .await
            .map_err(QueueError::Redis)?;
        conn.zrem::<_, _, ()>(&self.deadlines_key, receipt_handle)
            .await
            .map_err(QueueError::Redis)?;
        if let Ok(envelope) = serde_json::from_str::<Envelope>(receipt_handle) {
            conn.hdel::<_, _, ()>(&self.counts_key, &envelope.message_id)
                .await
                .map_err(QueueError::Redis)?;
        }
        Ok(())
    }

    async fn redrive_expired(&self) -> Result<u64, QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;

        let expired: Vec<String> = conn
            .zrangebyscore(&self.deadlines_key, "-inf", Self::now_epoch())
            .await
            .map_err(QueueError::Redis)?;

        let mut redriven = 0;
        for payload in expired {
            let removed: i64 = conn
                .lrem(&self.processing_key, 1, &payload)
                .await
                .map_err(QueueError::Redis)?;
            if removed > 0 {
                conn.lpush::<_, _, ()>(&self.pending_key, &payload)
                    .await
                    .map_err(QueueError::Redis)?;
                redriven += 1;
            }
            conn.zrem::<_, _, ()>(&self.deadlines_key, &payload)
                .await
                .map_err(QueueError::Redis)?;
        }
        Ok(redriven)
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;
        let depth: u64 = conn
            .llen(&self.pending_key)
            .await
            .map_err(QueueError::Redis)?;
        Ok(depth)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
