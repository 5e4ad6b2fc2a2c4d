//! Stage trait and execution context.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use estudio_models::{RenderSpec, RenderStage};

use crate::control::PipelineController;
use crate::error::StageResult;
use crate::eta::EtaEstimator;
use crate::pipeline::PipelineEvent;

/// One phase of the render pipeline.
///
/// Implementations must call [`StageContext::checkpoint`] between discrete
/// units of work (per narration segment, per scene segment, per upload
/// chunk) and return [`StageError::Cancelled`](crate::StageError::Cancelled)
/// when it resolves `false`. Checkpoints sit at safely resumable
/// boundaries; no work happens while the pipeline is paused.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Which pipeline stage this implements.
    fn stage(&self) -> RenderStage;

    /// Run the stage to completion.
    async fn run(&self, ctx: &StageContext) -> StageResult<()>;
}

/// Context handed to a stage by the pipeline executor.
pub struct StageContext {
    controller: PipelineController,
    work_dir: PathBuf,
    spec: Arc<RenderSpec>,
    reporter: ProgressReporter,
}

impl StageContext {
    pub(crate) fn new(
        controller: PipelineController,
        work_dir: PathBuf,
        spec: Arc<RenderSpec>,
        reporter: ProgressReporter,
    ) -> Self {
        Self {
            controller,
            work_dir,
            spec,
            reporter,
        }
    }

    /// Build a detached context for exercising a single stage outside the
    /// pipeline (tools and tests).
    pub fn detached(
        controller: PipelineController,
        work_dir: impl Into<PathBuf>,
        spec: RenderSpec,
        stage: RenderStage,
    ) -> Self {
        Self::new(
            controller,
            work_dir.into(),
            Arc::new(spec),
            ProgressReporter {
                events: None,
                stage,
                completed_stages: 0,
                total_stages: 1,
                eta: Arc::new(Mutex::new(EtaEstimator::default())),
            },
        )
    }

    /// Cooperative checkpoint; see [`PipelineController::checkpoint`].
    pub async fn checkpoint(&self) -> bool {
        self.controller.checkpoint().await
    }

    /// Cancellation signal for in-flight subprocesses.
    pub fn cancel_signal(&self) -> watch::Receiver<bool> {
        self.controller.cancel_signal()
    }

    /// Report progress within the current stage as a fraction in `[0, 1]`.
    pub fn report(&self, stage_fraction: f64) {
        self.reporter.report(stage_fraction);
    }

    /// Owned progress handle for callbacks that outlive the borrow of the
    /// context (subprocess progress parsers).
    pub fn progress_handle(&self) -> StageProgress {
        StageProgress {
            reporter: self.reporter.clone(),
        }
    }

    /// Scratch directory for this job.
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// The render specification.
    pub fn spec(&self) -> &RenderSpec {
        &self.spec
    }
}

/// Owned, cloneable handle reporting stage-local progress.
#[derive(Clone)]
pub struct StageProgress {
    reporter: ProgressReporter,
}

impl StageProgress {
    /// Report progress within the stage as a fraction in `[0, 1]`.
    pub fn report(&self, stage_fraction: f64) {
        self.reporter.report(stage_fraction);
    }
}

/// Translates stage-local progress into overall progress + ETA events.
#[derive(Clone)]
pub(crate) struct ProgressReporter {
    pub(crate) events: Option<mpsc::UnboundedSender<PipelineEvent>>,
    pub(crate) stage: RenderStage,
    pub(crate) completed_stages: usize,
    pub(crate) total_stages: usize,
    pub(crate) eta: Arc<Mutex<EtaEstimator>>,
}

impl ProgressReporter {
    fn report(&self, stage_fraction: f64) {
        let Some(events) = &self.events else {
            return;
        };

        let fraction = if stage_fraction.is_finite() {
            stage_fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let total = self.total_stages.max(1);
        let overall = (self.completed_stages as f64 + fraction) / total as f64;
        let remaining = total - self.completed_stages;

        let eta = {
            let estimator = self
                .eta
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            estimator.estimate(overall, remaining)
        };

        let _ = events.send(PipelineEvent::Progress {
            stage: self.stage,
            stage_progress: (fraction * 100.0).round() as u8,
            overall: (overall * 100.0).round().min(100.0) as u8,
            eta,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use estudio_models::SceneSpec;
    use std::time::Duration;

    fn spec() -> RenderSpec {
        RenderSpec::new(
            "p",
            vec![SceneSpec {
                id: "s".into(),
                image: "s.png".into(),
                title: String::new(),
                duration_secs: 1.0,
                transition: Default::default(),
                transition_duration_secs: 0.5,
            }],
        )
    }

    #[tokio::test]
    async fn test_detached_context_checkpoint() {
        let controller = PipelineController::new();
        let ctx = StageContext::detached(
            controller,
            "/tmp/estudio-test",
            spec(),
            RenderStage::Composition,
        );
        // Idle controller: checkpoint passes
        assert!(ctx.checkpoint().await);
        assert_eq!(ctx.spec().project_id, "p");
    }

    #[test]
    fn test_reporter_emits_overall_progress() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = ProgressReporter {
            events: Some(tx),
            stage: RenderStage::Encoding,
            completed_stages: 3,
            total_stages: 5,
            eta: Arc::new(Mutex::new(EtaEstimator::new(Duration::from_secs(10)))),
        };

        reporter.report(0.5);

        match rx.try_recv().unwrap() {
            PipelineEvent::Progress {
                stage,
                stage_progress,
                overall,
                eta,
            } => {
                assert_eq!(stage, RenderStage::Encoding);
                assert_eq!(stage_progress, 50);
                assert_eq!(overall, 70); // (3 + 0.5) / 5
                assert!(eta.as_secs_f64().is_finite());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_reporter_clamps_garbage_input() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = ProgressReporter {
            events: Some(tx),
            stage: RenderStage::Upload,
            completed_stages: 0,
            total_stages: 1,
            eta: Arc::new(Mutex::new(EtaEstimator::default())),
        };

        reporter.report(f64::NAN);
        match rx.try_recv().unwrap() {
            PipelineEvent::Progress { stage_progress, .. } => assert_eq!(stage_progress, 0),
            other => panic!("unexpected event: {other:?}"),
        }

        reporter.report(7.0);
        match rx.try_recv().unwrap() {
            PipelineEvent::Progress { stage_progress, .. } => assert_eq!(stage_progress, 100),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
