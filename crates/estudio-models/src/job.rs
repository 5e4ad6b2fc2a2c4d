//! Job identity, priority and queue-side lifecycle.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling priority for a job.
///
/// Urgent jobs dispatch before high, high before normal, normal before low.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl JobPriority {
    /// Numeric priority score (higher dispatches first).
    pub fn score(&self) -> u8 {
        match self {
            JobPriority::Low => 1,
            JobPriority::Normal => 5,
            JobPriority::High => 10,
            JobPriority::Urgent => 20,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobPriority::Low => "low",
            JobPriority::Normal => "normal",
            JobPriority::High => "high",
            JobPriority::Urgent => "urgent",
        }
    }

    /// All priorities in dispatch order (urgent first).
    pub const DISPATCH_ORDER: [JobPriority; 4] = [
        JobPriority::Urgent,
        JobPriority::High,
        JobPriority::Normal,
        JobPriority::Low,
    ];
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(JobPriority::Low),
            "normal" => Ok(JobPriority::Normal),
            "high" => Ok(JobPriority::High),
            "urgent" => Ok(JobPriority::Urgent),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// Job state in the queue.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Job is waiting in queue
    #[default]
    Pending,
    /// Job is being processed
    Processing,
    /// Job completed successfully
    Completed,
    /// Job failed (may be retried)
    Failed,
    /// Job sent to DLQ after max retries
    DeadLettered,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::DeadLettered => "dead_lettered",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::DeadLettered)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_roundtrip() {
        let id = JobId::new();
        let json = serde_json::to_string(&id).unwrap();
        let decoded: JobId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, decoded);
    }

    #[test]
    fn test_priority_scores_are_ordered() {
        assert!(JobPriority::Urgent.score() > JobPriority::High.score());
        assert!(JobPriority::High.score() > JobPriority::Normal.score());
        assert!(JobPriority::Normal.score() > JobPriority::Low.score());
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!("urgent".parse::<JobPriority>().unwrap(), JobPriority::Urgent);
        assert!("critical".parse::<JobPriority>().is_err());
    }

    #[test]
    fn test_dispatch_order_starts_with_urgent() {
        assert_eq!(JobPriority::DISPATCH_ORDER[0], JobPriority::Urgent);
        assert_eq!(JobPriority::DISPATCH_ORDER[3], JobPriority::Low);
    }

    #[test]
    fn test_job_state_terminal() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::DeadLettered.is_terminal());
        assert!(!JobState::Failed.is_terminal());
        assert!(!JobState::Pending.is_terminal());
    }
}
