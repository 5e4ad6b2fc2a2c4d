//! Job queue using Redis Streams.
//!
//! Each priority gets its own stream; consumers read the streams in
//! dispatch order (urgent first), so dispatch is priority-ordered across
//! bands and FIFO within a band.

use std::time::Duration;

use redis::AsyncCommands;
use tracing::{debug, info, warn};

use estudio_models::JobPriority;

use crate::error::{QueueError, QueueResult};
use crate::job::QueueJob;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name prefix; priority streams are `{prefix}:{priority}`
    pub stream_prefix: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter queue stream name
    pub dlq_stream_name: String,
    /// Max retries before DLQ
    pub max_retries: u32,
    /// Job visibility timeout
    pub visibility_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_prefix: "estudio:jobs".to_string(),
            consumer_group: "estudio:workers".to_string(),
            dlq_stream_name: "estudio:dlq".to_string(),
            max_retries: 3,
            visibility_timeout: Duration::from_secs(600), // 10 minutes
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            stream_prefix: std::env::var("QUEUE_STREAM_PREFIX")
                .unwrap_or_else(|_| "estudio:jobs".to_string()),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or_else(|_| "estudio:workers".to_string()),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM")
                .unwrap_or_else(|_| "estudio:dlq".to_string()),
            max_retries: std::env::var("QUEUE_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            visibility_timeout: Duration::from_secs(
                std::env::var("QUEUE_VISIBILITY_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(600),
            ),
        }
    }

    /// Stream name for a priority band.
    pub fn stream_for(&self, priority: JobPriority) -> String {
        format!("{}:{}", self.stream_prefix, priority)
    }

    /// All priority streams in dispatch order (urgent first).
    pub fn streams(&self) -> Vec<String> {
        JobPriority::DISPATCH_ORDER
            .iter()
            .map(|p| self.stream_for(*p))
            .collect()
    }
}

/// A message consumed from the queue.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    /// Stream the message came from
    pub stream: String,
    /// Redis stream entry ID
    pub id: String,
    /// The job payload
    pub job: QueueJob,
}

/// Queue depth snapshot.
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub urgent: u64,
    pub high: u64,
    pub normal: u64,
    pub low: u64,
    pub dlq: u64,
}

impl QueueStats {
    /// Total queued jobs across all priority bands.
    pub fn total_queued(&self) -> u64 {
        self.urgent + self.high + self.normal + self.low
    }
}

/// Job queue client.
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl JobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    /// Initialize the queue (create consumer groups if not present).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        for stream in self.config.streams() {
            let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(&stream)
                .arg(&self.config.consumer_group)
                .arg("$")
                .arg("MKSTREAM")
                .query_async(&mut conn)
                .await;

            match result {
                Ok(_) => info!("Created consumer group {} on {}", self.config.consumer_group, stream),
                Err(e) if e.to_string().contains("BUSYGROUP") => {
                    debug!("Consumer group already exists on {}", stream);
                }
                Err(e) => return Err(QueueError::Redis(e)),
            }
        }

        Ok(())
    }

    /// Enqueue a job onto its priority stream.
    ///
    /// Duplicate submissions (same idempotency key) are rejected until the
    /// previous job completes or the dedup key expires.
    pub async fn enqueue(&self, job: QueueJob) -> QueueResult<String> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let payload = serde_json::to_string(&job)?;
        let idempotency_key = job.idempotency_key();

        let dedup_key = Self::dedup_key(&idempotency_key);
        let exists: bool = conn.exists(&dedup_key).await?;
        if exists {
            warn!("Duplicate job rejected: {}", idempotency_key);
            return Err(QueueError::enqueue_failed("Duplicate job"));
        }

        let stream = self.config.stream_for(job.priority());
        let message_id: String = redis::cmd("XADD")
            .arg(&stream)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("key")
            .arg(&idempotency_key)
            .query_async(&mut conn)
            .await?;

        // Dedup key with TTL (1 hour)
        conn.set_ex::<_, _, ()>(&dedup_key, "1", 3600).await?;

        info!(
            "Enqueued job {} on {} with message ID {}",
            job.job_id(),
            stream,
            message_id
        );

        Ok(message_id)
    }

    /// Acknowledge a job (mark as completed).
    pub async fn ack(&self, stream: &str, message_id: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        redis::cmd("XACK")
            .arg(stream)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(stream)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged job: {} on {}", message_id, stream);
        Ok(())
    }

    /// Move a job to the dead letter queue.
    pub async fn dlq(&self, message: &QueuedMessage, error: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let payload = serde_json::to_string(&message.job)?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(&message.id)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack(&message.stream, &message.id).await?;

        warn!("Moved job {} to DLQ: {}", message.job.job_id(), error);
        Ok(())
    }

    /// Clear the dedup key so the same work can be resubmitted.
    pub async fn clear_dedup(&self, job: &QueueJob) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let dedup_key = Self::dedup_key(&job.idempotency_key());
        conn.del::<_, ()>(&dedup_key).await?;
        Ok(())
    }

    /// Queue depth snapshot across priority bands and the DLQ.
    pub async fn stats(&self) -> QueueResult<QueueStats> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let mut stats = QueueStats::default();
        for priority in JobPriority::DISPATCH_ORDER {
            let len: u64 = conn
                .xlen(self.config.stream_for(priority))
                .await
                .unwrap_or(0);
            match priority {
                JobPriority::Urgent => stats.urgent = len,
                JobPriority::High => stats.high = len,
                JobPriority::Normal => stats.normal = len,
                JobPriority::Low => stats.low = len,
            }
        }
        stats.dlq = conn.xlen(&self.config.dlq_stream_name).await.unwrap_or(0);

        Ok(stats)
    }

    /// Consume jobs from the priority streams.
    ///
    /// Streams are passed to XREADGROUP in dispatch order, so entries from
    /// higher-priority bands are returned first.
    pub async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<QueuedMessage>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let streams = self.config.streams();
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS");
        for stream in &streams {
            cmd.arg(stream);
        }
        for _ in &streams {
            cmd.arg(">"); // Only new messages
        }

        let result: redis::streams::StreamReadReply = cmd.query_async(&mut conn).await?;

        let mut messages = Vec::new();

        for stream_key in result.keys {
            for entry in stream_key.ids {
                if let Some(message) =
                    self.decode_entry(&stream_key.key, entry.id.clone(), &entry.map).await
                {
                    messages.push(message);
                }
            }
        }

        Ok(messages)
    }

    /// Claim pending jobs that have been idle for too long.
    /// This handles jobs from crashed workers.
    pub async fn claim_pending(
        &self,
        consumer_name: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<QueuedMessage>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let mut messages = Vec::new();

        for stream in self.config.streams() {
            let result: Result<redis::streams::StreamAutoClaimReply, redis::RedisError> =
                redis::cmd("XAUTOCLAIM")
                    .arg(&stream)
                    .arg(&self.config.consumer_group)
                    .arg(consumer_name)
                    .arg(min_idle_ms)
                    .arg("0-0")
                    .arg("COUNT")
                    .arg(count)
                    .query_async(&mut conn)
                    .await;

            let reply = match result {
                Ok(reply) => reply,
                // NOGROUP before init or on an empty band is not an error here.
                Err(e) if e.to_string().contains("NOGROUP") => continue,
                Err(e) => return Err(QueueError::Redis(e)),
            };

            for entry in reply.claimed {
                if let Some(message) =
                    self.decode_entry(&stream, entry.id.clone(), &entry.map).await
                {
                    info!("Claimed pending job {} from {}", message.job.job_id(), stream);
                    messages.push(message);
                }
            }
        }

        Ok(messages)
    }

    /// Get retry count for a message.
    pub async fn get_retry_count(&self, message: &QueuedMessage) -> QueueResult<u32> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let key = Self::retry_key(&message.stream, &message.id);
        let count: Option<u32> = conn.get(&key).await?;
        Ok(count.unwrap_or(0))
    }

    /// Increment retry count for a message.
    pub async fn increment_retry(&self, message: &QueuedMessage) -> QueueResult<u32> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let key = Self::retry_key(&message.stream, &message.id);
        let count: u32 = conn.incr(&key, 1).await?;
        // TTL 24 hours
        conn.expire::<_, ()>(&key, 86400).await?;
        Ok(count)
    }

    /// Get max retries from config.
    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Visibility timeout from config.
    pub fn visibility_timeout(&self) -> Duration {
        self.config.visibility_timeout
    }

    async fn decode_entry(
        &self,
        stream: &str,
        message_id: String,
        map: &std::collections::HashMap<String, redis::Value>,
    ) -> Option<QueuedMessage> {
        let Some(redis::Value::BulkString(payload)) = map.get("job") else {
            warn!("Stream entry {} missing job field", message_id);
            self.ack(stream, &message_id).await.ok();
            return None;
        };

        let payload_str = String::from_utf8_lossy(payload);
        match serde_json::from_str::<QueueJob>(&payload_str) {
            Ok(job) => {
                debug!("Consumed job {} from {}", job.job_id(), stream);
                Some(QueuedMessage {
                    stream: stream.to_string(),
                    id: message_id,
                    job,
                })
            }
            Err(e) => {
                warn!("Failed to parse job payload: {}", e);
                // Ack the malformed message to prevent reprocessing
                self.ack(stream, &message_id).await.ok();
                None
            }
        }
    }

    fn dedup_key(idempotency_key: &str) -> String {
        format!("estudio:dedup:{idempotency_key}")
    }

    fn retry_key(stream: &str, message_id: &str) -> String {
        format!("estudio:retry:{stream}:{message_id}")
    }
}
