//! Pipeline control states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a render pipeline.
///
/// `Idle`, `Cancelled`, `Completed` and `Failed` are terminal with respect
/// to control operations: pause/resume/cancel are no-ops in those states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Pipeline has not started yet
    #[default]
    Idle,
    /// Stage loop is executing
    Running,
    /// Suspended at a checkpoint, no work in flight
    Paused,
    /// Cancelled by the user; the stage loop unwinds at the next checkpoint
    Cancelled,
    /// All stages completed
    Completed,
    /// A stage failed after retries
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Running => "running",
            PipelineState::Paused => "paused",
            PipelineState::Cancelled => "cancelled",
            PipelineState::Completed => "completed",
            PipelineState::Failed => "failed",
        }
    }

    /// Whether control operations (pause/resume/cancel) can act on this state.
    pub fn accepts_control(&self) -> bool {
        matches!(self, PipelineState::Running | PipelineState::Paused)
    }

    /// Whether the pipeline has finished (successfully or not).
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            PipelineState::Cancelled | PipelineState::Completed | PipelineState::Failed
        )
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_acceptance() {
        assert!(PipelineState::Running.accepts_control());
        assert!(PipelineState::Paused.accepts_control());
        assert!(!PipelineState::Idle.accepts_control());
        assert!(!PipelineState::Cancelled.accepts_control());
        assert!(!PipelineState::Completed.accepts_control());
        assert!(!PipelineState::Failed.accepts_control());
    }

    #[test]
    fn test_finished_states() {
        assert!(!PipelineState::Idle.is_finished());
        assert!(!PipelineState::Paused.is_finished());
        assert!(PipelineState::Failed.is_finished());
    }
}
