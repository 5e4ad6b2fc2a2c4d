//! Progress events via Redis Pub/Sub.

use redis::AsyncCommands;
use tracing::debug;

use estudio_models::{JobEvent, JobId, RenderStage};

use crate::error::QueueResult;

/// Channel for publishing/subscribing to job events.
pub struct ProgressChannel {
    client: redis::Client,
}

impl ProgressChannel {
    /// Create a new progress channel.
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    /// Get the channel name for a job.
    pub fn channel_name(job_id: &JobId) -> String {
        format!("estudio:events:{job_id}")
    }

    /// Publish an event.
    pub async fn publish(&self, job_id: &JobId, event: &JobEvent) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let channel = Self::channel_name(job_id);
        let payload = serde_json::to_string(event)?;

        debug!("Publishing event to {}", channel);
        conn.publish::<_, _, ()>(channel, payload).await?;

        Ok(())
    }

    /// Publish a log message.
    pub async fn log(&self, job_id: &JobId, message: impl Into<String>) -> QueueResult<()> {
        self.publish(job_id, &JobEvent::log(message)).await
    }

    /// Publish a progress update.
    pub async fn progress(
        &self,
        job_id: &JobId,
        value: u8,
        stage: RenderStage,
        stage_progress: u8,
        eta_seconds: Option<u64>,
    ) -> QueueResult<()> {
        self.publish(
            job_id,
            &JobEvent::progress(value, stage, stage_progress, eta_seconds),
        )
        .await
    }

    /// Publish a stage started notification.
    pub async fn stage_started(&self, job_id: &JobId, stage: RenderStage) -> QueueResult<()> {
        self.publish(job_id, &JobEvent::stage_started(stage)).await
    }

    /// Publish a stage completed notification.
    pub async fn stage_completed(
        &self,
        job_id: &JobId,
        stage: RenderStage,
        duration_ms: u64,
    ) -> QueueResult<()> {
        self.publish(job_id, &JobEvent::stage_completed(stage, duration_ms))
            .await
    }

    /// Publish a paused notification.
    pub async fn paused(&self, job_id: &JobId) -> QueueResult<()> {
        self.publish(job_id, &JobEvent::paused()).await
    }

    /// Publish a resumed notification.
    pub async fn resumed(&self, job_id: &JobId) -> QueueResult<()> {
        self.publish(job_id, &JobEvent::resumed()).await
    }

    /// Publish a cancelled notification.
    pub async fn cancelled(&self, job_id: &JobId) -> QueueResult<()> {
        self.publish(job_id, &JobEvent::cancelled()).await
    }

    /// Publish an error message.
    pub async fn error(&self, job_id: &JobId, message: impl Into<String>) -> QueueResult<()> {
        self.publish(job_id, &JobEvent::error(message)).await
    }

    /// Publish a done message.
    pub async fn done(&self, job_id: &JobId, output_url: impl Into<String>) -> QueueResult<()> {
        self.publish(job_id, &JobEvent::done(output_url)).await
    }

    /// Subscribe to events for a job.
    /// Returns a pinned stream that can be polled with `.next()`.
    pub async fn subscribe(
        &self,
        job_id: &JobId,
    ) -> QueueResult<std::pin::Pin<Box<dyn futures_util::Stream<Item = JobEvent> + Send>>> {
        use futures_util::StreamExt;

        let mut pubsub = self.client.get_async_pubsub().await?;
        let channel = Self::channel_name(job_id);

        pubsub.subscribe(&channel).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            serde_json::from_str(&payload).ok()
        });

        Ok(Box::pin(stream))
    }
}
