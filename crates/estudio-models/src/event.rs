//! Job event schemas.
//!
//! Events are published on the per-job progress channel and forwarded to
//! the UI over SSE, so field names follow the frontend's camelCase.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::stage::RenderStage;

/// Event envelope published for a job.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// Log line with timestamp
    Log {
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Overall progress update
    Progress {
        /// Overall progress (0-100)
        value: u8,
        /// Stage currently executing
        stage: RenderStage,
        /// Progress within the stage (0-100)
        #[serde(rename = "stageProgress")]
        stage_progress: u8,
        /// Estimated seconds remaining (UI hint only)
        #[serde(rename = "etaSeconds", skip_serializing_if = "Option::is_none")]
        eta_seconds: Option<u64>,
    },

    /// A stage began executing
    StageStarted { stage: RenderStage },

    /// A stage finished
    StageCompleted {
        stage: RenderStage,
        /// Stage duration net of paused time
        #[serde(rename = "durationMs")]
        duration_ms: u64,
    },

    /// Pipeline paused at a checkpoint
    Paused { timestamp: DateTime<Utc> },

    /// Pipeline resumed
    Resumed { timestamp: DateTime<Utc> },

    /// Pipeline cancelled
    Cancelled { timestamp: DateTime<Utc> },

    /// Error message
    Error {
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Processing complete
    Done {
        #[serde(rename = "outputUrl")]
        output_url: String,
    },
}

impl JobEvent {
    /// Create a log event.
    pub fn log(message: impl Into<String>) -> Self {
        JobEvent::Log {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a progress event. Values clamp to 100.
    pub fn progress(
        value: u8,
        stage: RenderStage,
        stage_progress: u8,
        eta_seconds: Option<u64>,
    ) -> Self {
        JobEvent::Progress {
            value: value.min(100),
            stage,
            stage_progress: stage_progress.min(100),
            eta_seconds,
        }
    }

    /// Create a stage started event.
    pub fn stage_started(stage: RenderStage) -> Self {
        JobEvent::StageStarted { stage }
    }

    /// Create a stage completed event.
    pub fn stage_completed(stage: RenderStage, duration_ms: u64) -> Self {
        JobEvent::StageCompleted { stage, duration_ms }
    }

    /// Create a paused event.
    pub fn paused() -> Self {
        JobEvent::Paused {
            timestamp: Utc::now(),
        }
    }

    /// Create a resumed event.
    pub fn resumed() -> Self {
        JobEvent::Resumed {
            timestamp: Utc::now(),
        }
    }

    /// Create a cancelled event.
    pub fn cancelled() -> Self {
        JobEvent::Cancelled {
            timestamp: Utc::now(),
        }
    }

    /// Create an error event.
    pub fn error(message: impl Into<String>) -> Self {
        JobEvent::Error {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a done event.
    pub fn done(output_url: impl Into<String>) -> Self {
        JobEvent::Done {
            output_url: output_url.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tag() {
        let json = serde_json::to_string(&JobEvent::paused()).unwrap();
        assert!(json.contains("\"type\":\"paused\""));
    }

    #[test]
    fn test_progress_clamps_and_renames() {
        let event = JobEvent::progress(150, RenderStage::Encoding, 150, Some(12));
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"value\":100"));
        assert!(json.contains("\"stageProgress\":100"));
        assert!(json.contains("\"etaSeconds\":12"));
    }

    #[test]
    fn test_done_rename() {
        let json = serde_json::to_string(&JobEvent::done("https://d/x.mp4")).unwrap();
        assert!(json.contains("\"outputUrl\":\"https://d/x.mp4\""));
    }

    #[test]
    fn test_roundtrip() {
        let event = JobEvent::stage_completed(RenderStage::Upload, 1234);
        let json = serde_json::to_string(&event).unwrap();
        let decoded: JobEvent = serde_json::from_str(&json).unwrap();
        match decoded {
            JobEvent::StageCompleted { stage, duration_ms } => {
                assert_eq!(stage, RenderStage::Upload);
                assert_eq!(duration_ms, 1234);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
