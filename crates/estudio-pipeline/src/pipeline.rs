//! Pipeline executor.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use estudio_models::{RenderSpec, RenderStage};

use crate::control::PipelineController;
use crate::error::{PipelineResult, StageError};
use crate::eta::EtaEstimator;
use crate::retry::StageRetry;
use crate::stage::{ProgressReporter, Stage, StageContext};
use crate::state::PipelineState;

/// Event emitted by a running pipeline.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A stage began executing.
    StageStarted { stage: RenderStage },
    /// A stage finished; duration is net of paused time.
    StageCompleted { stage: RenderStage, duration: Duration },
    /// Progress within the current stage.
    Progress {
        stage: RenderStage,
        /// Stage-local progress (0-100)
        stage_progress: u8,
        /// Overall progress (0-100)
        overall: u8,
        /// Estimated time remaining (UI hint only)
        eta: Duration,
    },
    /// A stage attempt failed and will be retried.
    StageRetrying {
        stage: RenderStage,
        attempt: u32,
        error: String,
    },
}

/// How a pipeline run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// All stages completed.
    Completed,
    /// Cancelled by the user; resources were released at a checkpoint.
    Cancelled,
    /// A stage failed after retries.
    Failed {
        stage: RenderStage,
        message: String,
    },
}

impl PipelineOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, PipelineOutcome::Completed)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineOutcome::Cancelled)
    }
}

/// Result of one stage within a run.
#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: RenderStage,
    /// Wall-clock duration net of paused time.
    pub duration: Duration,
    pub success: bool,
    pub error: Option<String>,
}

/// Summary of a finished pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub outcome: PipelineOutcome,
    pub stages: Vec<StageReport>,
    /// Total run duration net of paused time.
    pub total_duration: Duration,
    /// Cumulative time spent paused.
    pub paused_duration: Duration,
    /// Total retry attempts across all stages.
    pub retry_attempts: u32,
}

/// Executes a sequence of stages under a [`PipelineController`].
pub struct RenderPipeline {
    controller: PipelineController,
    stages: Vec<Box<dyn Stage>>,
    retry: StageRetry,
    eta: Arc<Mutex<EtaEstimator>>,
    events: Option<mpsc::UnboundedSender<PipelineEvent>>,
}

impl RenderPipeline {
    /// Create a pipeline bound to a controller.
    pub fn new(controller: PipelineController) -> Self {
        Self {
            controller,
            stages: Vec::new(),
            retry: StageRetry::default(),
            eta: Arc::new(Mutex::new(EtaEstimator::default())),
            events: None,
        }
    }

    /// Append a stage.
    pub fn with_stage(mut self, stage: Box<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Set the per-stage retry policy.
    pub fn with_retry(mut self, retry: StageRetry) -> Self {
        self.retry = retry;
        self
    }

    /// Set the default per-stage estimate used before any stage completes.
    pub fn with_default_stage_estimate(mut self, estimate: Duration) -> Self {
        self.eta = Arc::new(Mutex::new(EtaEstimator::new(estimate)));
        self
    }

    /// Attach an event sink.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<PipelineEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// The controller driving this pipeline.
    pub fn controller(&self) -> &PipelineController {
        &self.controller
    }

    /// Run all stages in order.
    ///
    /// Returns `Err` only when the pipeline is started from a non-idle
    /// state; every other ending (completed, cancelled, stage failure) is a
    /// [`PipelineReport`].
    pub async fn execute(
        &self,
        work_dir: impl Into<PathBuf>,
        spec: RenderSpec,
    ) -> PipelineResult<PipelineReport> {
        self.controller.begin()?;

        let work_dir = work_dir.into();
        let spec = Arc::new(spec);
        let started = Instant::now();
        let total_stages = self.stages.len();

        let mut stage_reports = Vec::with_capacity(total_stages);
        let mut retry_attempts = 0u32;

        for (index, stage) in self.stages.iter().enumerate() {
            let name = stage.stage();

            // Observe pause/cancel before starting the stage.
            if !self.controller.checkpoint().await {
                info!(stage = %name, "Pipeline cancelled before stage");
                return Ok(self.finish(
                    PipelineOutcome::Cancelled,
                    stage_reports,
                    started,
                    retry_attempts,
                ));
            }

            let ctx = StageContext::new(
                self.controller.clone(),
                work_dir.clone(),
                Arc::clone(&spec),
                ProgressReporter {
                    events: self.events.clone(),
                    stage: name,
                    completed_stages: index,
                    total_stages,
                    eta: Arc::clone(&self.eta),
                },
            );

            self.emit(PipelineEvent::StageStarted { stage: name });
            info!(stage = %name, "Stage started");

            let stage_started = Instant::now();
            let paused_before = self.controller.paused_duration();

            let result = self
                .run_with_retry(stage.as_ref(), &ctx, &mut retry_attempts)
                .await;

            let paused_during = self
                .controller
                .paused_duration()
                .saturating_sub(paused_before);
            let duration = stage_started.elapsed().saturating_sub(paused_during);

            match result {
                Ok(()) => {
                    {
                        let mut estimator = self
                            .eta
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner());
                        estimator.record(duration);
                    }
                    stage_reports.push(StageReport {
                        stage: name,
                        duration,
                        success: true,
                        error: None,
                    });
                    self.emit(PipelineEvent::StageCompleted {
                        stage: name,
                        duration,
                    });
                    info!(stage = %name, duration_ms = duration.as_millis() as u64, "Stage completed");
                }
                Err(StageError::Cancelled) => {
                    stage_reports.push(StageReport {
                        stage: name,
                        duration,
                        success: false,
                        error: Some("cancelled".into()),
                    });
                    info!(stage = %name, "Stage unwound after cancellation");
                    return Ok(self.finish(
                        PipelineOutcome::Cancelled,
                        stage_reports,
                        started,
                        retry_attempts,
                    ));
                }
                Err(e) => {
                    let message = e.to_string();
                    stage_reports.push(StageReport {
                        stage: name,
                        duration,
                        success: false,
                        error: Some(message.clone()),
                    });
                    error!(stage = %name, error = %message, "Stage failed");
                    return Ok(self.finish(
                        PipelineOutcome::Failed {
                            stage: name,
                            message,
                        },
                        stage_reports,
                        started,
                        retry_attempts,
                    ));
                }
            }
        }

        Ok(self.finish(
            PipelineOutcome::Completed,
            stage_reports,
            started,
            retry_attempts,
        ))
    }

    /// Run one stage with bounded retry. Cancellations and fatal errors are
    /// never retried.
    async fn run_with_retry(
        &self,
        stage: &dyn Stage,
        ctx: &StageContext,
        retry_attempts: &mut u32,
    ) -> Result<(), StageError> {
        let mut failed = 0u32;

        loop {
            match stage.run(ctx).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && failed + 1 < self.retry.max_attempts => {
                    failed += 1;
                    *retry_attempts += 1;
                    let delay = self.retry.delay_for_attempt(failed);
                    warn!(
                        stage = %stage.stage(),
                        attempt = failed,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Stage attempt failed, retrying"
                    );
                    self.emit(PipelineEvent::StageRetrying {
                        stage: stage.stage(),
                        attempt: failed,
                        error: e.to_string(),
                    });
                    tokio::time::sleep(delay).await;

                    // A cancel during backoff must win over the retry.
                    if !self.controller.checkpoint().await {
                        return Err(StageError::Cancelled);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn finish(
        &self,
        outcome: PipelineOutcome,
        stages: Vec<StageReport>,
        started: Instant,
        retry_attempts: u32,
    ) -> PipelineReport {
        match &outcome {
            PipelineOutcome::Completed => self.controller.finish(PipelineState::Completed),
            PipelineOutcome::Failed { .. } => self.controller.finish(PipelineState::Failed),
            // The controller already holds Cancelled.
            PipelineOutcome::Cancelled => {}
        }

        let paused_duration = self.controller.paused_duration();
        PipelineReport {
            outcome,
            stages,
            total_duration: started.elapsed().saturating_sub(paused_duration),
            paused_duration,
            retry_attempts,
        }
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageResult;
    use async_trait::async_trait;
    use estudio_models::SceneSpec;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn spec() -> RenderSpec {
        RenderSpec::new(
            "proj",
            vec![SceneSpec {
                id: "s1".into(),
                image: "s1.png".into(),
                title: String::new(),
                duration_secs: 2.0,
                transition: Default::default(),
                transition_duration_secs: 0.5,
            }],
        )
    }

    /// Stage that checkpoints through a fixed number of units.
    struct CountingStage {
        name: RenderStage,
        units: u32,
        ran: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Stage for CountingStage {
        fn stage(&self) -> RenderStage {
            self.name
        }

        async fn run(&self, ctx: &StageContext) -> StageResult<()> {
            for unit in 0..self.units {
                if !ctx.checkpoint().await {
                    return Err(StageError::Cancelled);
                }
                self.ran.fetch_add(1, Ordering::SeqCst);
                ctx.report(f64::from(unit + 1) / f64::from(self.units));
            }
            Ok(())
        }
    }

    /// Stage that fails a configurable number of times before succeeding.
    struct FlakyStage {
        fail_times: u32,
        calls: Arc<AtomicU32>,
        fatal: bool,
    }

    #[async_trait]
    impl Stage for FlakyStage {
        fn stage(&self) -> RenderStage {
            RenderStage::Encoding
        }

        async fn run(&self, _ctx: &StageContext) -> StageResult<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_times {
                if self.fatal {
                    return Err(StageError::fatal("bad input"));
                }
                return Err(StageError::retryable("transient"));
            }
            Ok(())
        }
    }

    fn fast_retry() -> StageRetry {
        StageRetry::default().with_base_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_all_stages_complete() {
        let controller = PipelineController::new();
        let ran = Arc::new(AtomicU32::new(0));
        let pipeline = RenderPipeline::new(controller.clone())
            .with_stage(Box::new(CountingStage {
                name: RenderStage::AudioSynthesis,
                units: 3,
                ran: Arc::clone(&ran),
            }))
            .with_stage(Box::new(CountingStage {
                name: RenderStage::Upload,
                units: 2,
                ran: Arc::clone(&ran),
            }));

        let report = pipeline.execute("/tmp/estudio-test", spec()).await.unwrap();

        assert!(report.outcome.is_completed());
        assert_eq!(report.stages.len(), 2);
        assert!(report.stages.iter().all(|s| s.success));
        assert_eq!(ran.load(Ordering::SeqCst), 5);
        assert_eq!(controller.state(), PipelineState::Completed);
    }

    #[tokio::test]
    async fn test_execute_twice_is_invalid() {
        let controller = PipelineController::new();
        let pipeline = RenderPipeline::new(controller);
        pipeline.execute("/tmp/estudio-test", spec()).await.unwrap();

        let err = pipeline.execute("/tmp/estudio-test", spec()).await;
        assert!(matches!(err, Err(crate::PipelineError::InvalidStart(_))));
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let pipeline = RenderPipeline::new(PipelineController::new())
            .with_retry(fast_retry())
            .with_stage(Box::new(FlakyStage {
                fail_times: 2,
                calls: Arc::clone(&calls),
                fatal: false,
            }));

        let report = pipeline.execute("/tmp/estudio-test", spec()).await.unwrap();

        assert!(report.outcome.is_completed());
        assert_eq!(report.retry_attempts, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted_fails_pipeline() {
        let controller = PipelineController::new();
        let pipeline = RenderPipeline::new(controller.clone())
            .with_retry(fast_retry())
            .with_stage(Box::new(FlakyStage {
                fail_times: 10,
                calls: Arc::new(AtomicU32::new(0)),
                fatal: false,
            }));

        let report = pipeline.execute("/tmp/estudio-test", spec()).await.unwrap();

        match &report.outcome {
            PipelineOutcome::Failed { stage, .. } => assert_eq!(*stage, RenderStage::Encoding),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(report.retry_attempts, 2); // 3 attempts = 2 retries
        assert_eq!(controller.state(), PipelineState::Failed);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let pipeline = RenderPipeline::new(PipelineController::new())
            .with_retry(fast_retry())
            .with_stage(Box::new(FlakyStage {
                fail_times: 10,
                calls: Arc::clone(&calls),
                fatal: true,
            }));

        let report = pipeline.execute("/tmp/estudio-test", spec()).await.unwrap();

        assert!(matches!(report.outcome, PipelineOutcome::Failed { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.retry_attempts, 0);
    }

    #[tokio::test]
    async fn test_cancel_mid_stage_unwinds() {
        let controller = PipelineController::with_poll_interval(Duration::from_millis(5));
        let ran = Arc::new(AtomicU32::new(0));

        // Stage with many small units, giving the cancel a window to land.
        struct SlowStage {
            ran: Arc<AtomicU32>,
        }

        #[async_trait]
        impl Stage for SlowStage {
            fn stage(&self) -> RenderStage {
                RenderStage::Composition
            }

            async fn run(&self, ctx: &StageContext) -> StageResult<()> {
                for _ in 0..100 {
                    if !ctx.checkpoint().await {
                        return Err(StageError::Cancelled);
                    }
                    self.ran.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                Ok(())
            }
        }

        let pipeline = RenderPipeline::new(controller.clone())
            .with_stage(Box::new(SlowStage {
                ran: Arc::clone(&ran),
            }));

        let handle = tokio::spawn(async move {
            pipeline.execute("/tmp/estudio-test", spec()).await.unwrap()
        });

        // Let a few units run, then cancel.
        tokio::time::sleep(Duration::from_millis(25)).await;
        controller.cancel();

        let report = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("pipeline should unwind promptly")
            .unwrap();

        assert!(report.outcome.is_cancelled());
        assert!(ran.load(Ordering::SeqCst) < 100);
        assert_eq!(controller.state(), PipelineState::Cancelled);
    }

    #[tokio::test]
    async fn test_pause_excluded_from_stage_duration() {
        let controller = PipelineController::with_poll_interval(Duration::from_millis(5));
        let ran = Arc::new(AtomicU32::new(0));

        // Ten units of ~10ms each, checkpointing between units.
        struct SleepyStage {
            ran: Arc<AtomicU32>,
        }

        #[async_trait]
        impl Stage for SleepyStage {
            fn stage(&self) -> RenderStage {
                RenderStage::AudioSynthesis
            }

            async fn run(&self, ctx: &StageContext) -> StageResult<()> {
                for _ in 0..10 {
                    if !ctx.checkpoint().await {
                        return Err(StageError::Cancelled);
                    }
                    self.ran.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Ok(())
            }
        }

        let pipeline = RenderPipeline::new(controller.clone())
            .with_stage(Box::new(SleepyStage {
                ran: Arc::clone(&ran),
            }));

        let driver = {
            let controller = controller.clone();
            let ran = Arc::clone(&ran);
            tokio::spawn(async move {
                // Wait for the stage to demonstrably run, pause, hold, resume.
                while ran.load(Ordering::SeqCst) < 2 {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                }
                controller.pause();
                tokio::time::sleep(Duration::from_millis(300)).await;
                controller.resume();
            })
        };

        let report = pipeline.execute("/tmp/estudio-test", spec()).await.unwrap();
        driver.await.unwrap();

        assert!(report.outcome.is_completed());
        // The 300ms hold registered as paused time...
        assert!(report.paused_duration >= Duration::from_millis(250));
        // ...and is excluded from the measured stage duration: ~100ms of
        // real work plus scheduling slack, nowhere near the pause length.
        assert!(report.stages[0].duration < Duration::from_millis(250));
        assert!(report.total_duration < Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_progress_events_carry_finite_eta() {
        let controller = PipelineController::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let pipeline = RenderPipeline::new(controller)
            .with_events(tx)
            .with_stage(Box::new(CountingStage {
                name: RenderStage::AudioSynthesis,
                units: 4,
                ran: Arc::new(AtomicU32::new(0)),
            }));

        pipeline.execute("/tmp/estudio-test", spec()).await.unwrap();

        let mut saw_progress = false;
        while let Ok(event) = rx.try_recv() {
            if let PipelineEvent::Progress { overall, eta, .. } = event {
                saw_progress = true;
                assert!(overall <= 100);
                assert!(eta.as_secs_f64().is_finite());
            }
        }
        assert!(saw_progress);
    }
}
