//! Pipeline error types.

use thiserror::Error;

use crate::state::PipelineState;
use estudio_models::RenderStage;

pub type PipelineResult<T> = Result<T, PipelineError>;
pub type StageResult<T> = Result<T, StageError>;

/// Errors returned by the pipeline executor.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Pipeline cannot start from state '{0}'")]
    InvalidStart(PipelineState),

    #[error("Stage {stage} failed: {message}")]
    StageFailed {
        stage: RenderStage,
        message: String,
    },
}

/// Errors returned by stage implementations.
#[derive(Debug, Error)]
pub enum StageError {
    /// The stage observed a cancellation at a checkpoint and unwound.
    #[error("Cancelled at checkpoint")]
    Cancelled,

    /// Transient failure; the pipeline retries with backoff.
    #[error("{0}")]
    Retryable(String),

    /// Permanent failure; the pipeline fails without retrying.
    #[error("{0}")]
    Fatal(String),
}

impl StageError {
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StageError::Retryable(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StageError::Cancelled)
    }
}

impl From<std::io::Error> for StageError {
    fn from(e: std::io::Error) -> Self {
        StageError::Retryable(format!("IO error: {e}"))
    }
}
