//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Synthesis failed: {0}")]
    SynthesisFailed(String),

    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Media error: {0}")]
    Media(#[from] estudio_media::MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] estudio_queue::QueueError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] estudio_pipeline::PipelineError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn synthesis_failed(msg: impl Into<String>) -> Self {
        Self::SynthesisFailed(msg.into())
    }

    pub fn delivery_failed(msg: impl Into<String>) -> Self {
        Self::DeliveryFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Whether the executor should leave the job for redelivery instead of
    /// counting it as a hard failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, WorkerError::Cancelled)
    }
}
