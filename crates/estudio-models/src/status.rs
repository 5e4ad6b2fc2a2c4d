//! Job status cache for progress tracking and polling.
//!
//! This module provides types for caching job status in Redis,
//! enabling fast polling queries and stale job detection.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::stage::RenderStage;

/// Job processing status as seen by the UI.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is queued waiting for a worker
    #[default]
    Queued,
    /// Job is actively being processed
    Processing,
    /// Job is paused at a pipeline checkpoint
    Paused,
    /// Job completed successfully
    Completed,
    /// Job failed with an error
    Failed,
    /// Job was cancelled by the user
    Cancelled,
    /// Worker stopped responding (stale)
    Stale,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Stale => "stale",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Cached job status for fast polling queries.
///
/// Stored in Redis as a snapshot of the current job state so the UI can
/// poll without touching the queue.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobStatusCache {
    /// Unique job identifier
    pub job_id: String,
    /// Project the job renders
    pub project_id: String,
    /// User who owns this job
    pub user_id: String,
    /// Current job status
    pub status: JobStatus,
    /// Progress percentage (0-100)
    pub progress: u8,
    /// Stage currently executing
    pub current_stage: Option<RenderStage>,
    /// Estimated seconds remaining (UI hint only)
    pub eta_seconds: Option<u64>,
    /// Error message if job failed
    pub error_message: Option<String>,
    /// Delivered artifact URL once completed
    pub output_url: Option<String>,
    /// When the job was started
    pub started_at: DateTime<Utc>,
    /// When the status was last updated
    pub updated_at: DateTime<Utc>,
    /// Last heartbeat from the worker
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Sequence number for event ordering (monotonically increasing)
    pub event_seq: u64,
}

impl JobStatusCache {
    /// Create a new job status cache entry.
    pub fn new(
        job_id: impl Into<String>,
        project_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            project_id: project_id.into(),
            user_id: user_id.into(),
            status: JobStatus::Queued,
            progress: 0,
            current_stage: None,
            eta_seconds: None,
            error_message: None,
            output_url: None,
            started_at: now,
            updated_at: now,
            last_heartbeat: None,
            event_seq: 0,
        }
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Update the status and bump the updated_at timestamp.
    pub fn set_status(&mut self, status: JobStatus) {
        self.status = status;
        self.touch();
    }

    /// Update progress, the current stage and the ETA hint.
    pub fn set_progress(&mut self, progress: u8, stage: Option<RenderStage>, eta_seconds: Option<u64>) {
        self.progress = progress.min(100);
        self.current_stage = stage;
        self.eta_seconds = eta_seconds;
        self.touch();
    }

    /// Update heartbeat timestamp.
    pub fn record_heartbeat(&mut self) {
        self.last_heartbeat = Some(Utc::now());
        self.updated_at = Utc::now();
    }

    /// Mark job as completed with the delivered artifact URL.
    pub fn complete(&mut self, output_url: impl Into<String>) {
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.eta_seconds = Some(0);
        self.output_url = Some(output_url.into());
        self.touch();
    }

    /// Mark job as failed with an error message.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.error_message = Some(error.into());
        self.touch();
    }

    /// Mark job as cancelled.
    pub fn cancel(&mut self) {
        self.status = JobStatus::Cancelled;
        self.eta_seconds = None;
        self.touch();
    }

    /// Mark job as stale (worker timeout). No-op on terminal entries.
    pub fn mark_stale(&mut self) {
        if self.is_terminal() {
            return;
        }
        self.status = JobStatus::Stale;
        self.error_message =
            Some("Processing timed out. The worker may have crashed. Please try again.".into());
        self.touch();
    }

    /// Check if the job should be considered stale based on heartbeat.
    ///
    /// A job is stale if:
    /// - It's not in a terminal state
    /// - Either no heartbeat received and job is older than grace_period_secs
    /// - Or last heartbeat is older than stale_threshold_secs
    pub fn is_stale(&self, stale_threshold_secs: i64, grace_period_secs: i64) -> bool {
        if self.is_terminal() {
            return false;
        }

        let now = Utc::now();
        match self.last_heartbeat {
            Some(hb) => (now - hb).num_seconds() > stale_threshold_secs,
            None => (now - self.started_at).num_seconds() > grace_period_secs,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.event_seq += 1;
    }
}
