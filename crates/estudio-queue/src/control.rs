//! Pipeline control commands via Redis Pub/Sub.
//!
//! A UI "pause" click lands on the API side, which publishes a command on
//! the job's control channel. The worker that owns the job subscribes and
//! forwards the command to the pipeline controller, so the render suspends
//! at its next checkpoint without the process being touched.

use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::debug;

use estudio_models::JobId;

use crate::error::QueueResult;

/// Control operation requested by an external actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCommand {
    /// Suspend at the next checkpoint
    Pause,
    /// Resume a paused pipeline
    Resume,
    /// Cancel; the stage loop unwinds and releases resources
    Cancel,
}

impl ControlCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlCommand::Pause => "pause",
            ControlCommand::Resume => "resume",
            ControlCommand::Cancel => "cancel",
        }
    }
}

/// Channel for publishing/subscribing to control commands.
pub struct ControlChannel {
    client: redis::Client,
}

impl ControlChannel {
    /// Create a new control channel.
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    /// Get the channel name for a job.
    pub fn channel_name(job_id: &JobId) -> String {
        format!("estudio:control:{job_id}")
    }

    /// Publish a control command for a job.
    pub async fn publish(&self, job_id: &JobId, command: ControlCommand) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let channel = Self::channel_name(job_id);
        let payload = serde_json::to_string(&command)?;

        debug!("Publishing {} to {}", command.as_str(), channel);
        conn.publish::<_, _, ()>(channel, payload).await?;

        Ok(())
    }

    /// Subscribe to control commands for a job.
    pub async fn subscribe(
        &self,
        job_id: &JobId,
    ) -> QueueResult<std::pin::Pin<Box<dyn futures_util::Stream<Item = ControlCommand> + Send>>>
    {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_serde() {
        let json = serde_json::to_string(&ControlCommand::Pause).unwrap();
        assert_eq!(json, "\"pause\"");
        let decoded: ControlCommand = serde_json::from_str("\"cancel\"").unwrap();
        assert_eq!(decoded, ControlCommand::Cancel);
    }

    #[test]
    fn test_channel_name() {
        let job_id = JobId::from_string("j1");
        assert_eq!(ControlChannel::channel_name(&job_id), "estudio:control:j1");
    }
}
