//! End-to-end control properties over the public pipeline API.
//!
//! A real pipeline run drives the controller into `Running`, then control
//! sequences are applied from outside while a stage checkpoints through
//! many small units of work.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use estudio_models::{RenderSpec, RenderStage, SceneSpec};
use estudio_pipeline::{
    EtaEstimator, PipelineController, PipelineState, RenderPipeline, Stage, StageContext,
    StageError, StageResult,
};

fn spec() -> RenderSpec {
    RenderSpec::new(
        "proj-int",
        vec![SceneSpec {
            id: "s1".into(),
            image: "s1.png".into(),
            title: "Slide".into(),
            duration_secs: 3.0,
            transition: Default::default(),
            transition_duration_secs: 0.5,
        }],
    )
}

/// Stage that checkpoints through many short units until told to stop.
struct TickingStage {
    units: u32,
    unit_sleep: Duration,
    ticks: Arc<AtomicU32>,
}

#[async_trait]
impl Stage for TickingStage {
    fn stage(&self) -> RenderStage {
        RenderStage::Composition
    }

    async fn run(&self, ctx: &StageContext) -> StageResult<()> {
        for unit in 0..self.units {
            if !ctx.checkpoint().await {
                return Err(StageError::Cancelled);
            }
            self.ticks.fetch_add(1, Ordering::SeqCst);
            ctx.report(f64::from(unit + 1) / f64::from(self.units));
            tokio::time::sleep(self.unit_sleep).await;
        }
        Ok(())
    }
}

fn ticking_pipeline(
    controller: PipelineController,
    units: u32,
) -> (RenderPipeline, Arc<AtomicU32>) {
    let ticks = Arc::new(AtomicU32::new(0));
    let pipeline = RenderPipeline::new(controller).with_stage(Box::new(TickingStage {
        units,
        unit_sleep: Duration::from_millis(5),
        ticks: Arc::clone(&ticks),
    }));
    (pipeline, ticks)
}

/// Repeated pause calls produce exactly one transition; the run still
/// finishes after a resume.
#[tokio::test]
async fn pause_is_idempotent_and_resumable() {
    let controller = PipelineController::with_poll_interval(Duration::from_millis(5));
    let (pipeline, ticks) = ticking_pipeline(controller.clone(), 40);

    let run = tokio::spawn(async move { pipeline.execute("/tmp/estudio-it", spec()).await });

    // Wait until the stage is demonstrably running.
    while ticks.load(Ordering::SeqCst) < 2 {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    assert!(controller.pause());
    assert!(!controller.pause());
    assert!(!controller.pause());
    assert_eq!(controller.state(), PipelineState::Paused);

    // No work happens while paused.
    let before = ticks.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(50)).await;
    // One unit may have been in flight when the pause landed.
    assert!(ticks.load(Ordering::SeqCst) <= before + 1);

    assert!(controller.resume());
    assert!(!controller.resume());

    let report = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("run should finish after resume")
        .unwrap()
        .unwrap();
    assert!(report.outcome.is_completed());
    assert_eq!(controller.state(), PipelineState::Completed);
}

/// Cancel from Paused goes straight to Cancelled without a resume.
#[tokio::test]
async fn cancel_from_paused_needs_no_resume() {
    let controller = PipelineController::with_poll_interval(Duration::from_millis(5));
    let (pipeline, ticks) = ticking_pipeline(controller.clone(), 1000);

    let run = tokio::spawn(async move { pipeline.execute("/tmp/estudio-it", spec()).await });

    while ticks.load(Ordering::SeqCst) < 2 {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    controller.pause();
    assert_eq!(controller.state(), PipelineState::Paused);
    assert!(controller.cancel());
    assert_eq!(controller.state(), PipelineState::Cancelled);

    let report = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("run should unwind after cancel")
        .unwrap()
        .unwrap();
    assert!(report.outcome.is_cancelled());
}

/// Once terminal, no control call changes the state.
#[tokio::test]
async fn terminal_states_ignore_control() {
    let controller = PipelineController::with_poll_interval(Duration::from_millis(5));
    let (pipeline, _ticks) = ticking_pipeline(controller.clone(), 2);

    let report = pipeline.execute("/tmp/estudio-it", spec()).await.unwrap();
    assert!(report.outcome.is_completed());

    for _ in 0..3 {
        assert!(!controller.pause());
        assert!(!controller.resume());
        assert!(!controller.cancel());
        assert_eq!(controller.state(), PipelineState::Completed);
    }
}

/// Arbitrary control sequences against a live run keep the machine in a
/// defined state and the run always terminates.
#[tokio::test]
async fn random_control_sequences_stay_defined() {
    // Deterministic sweep over all length-3 sequences of {pause, resume, cancel}.
    for mask in 0..27u32 {
        let seq = [mask % 3, (mask / 3) % 3, (mask / 9) % 3];

        let controller = PipelineController::with_poll_interval(Duration::from_millis(2));
        let (pipeline, ticks) = ticking_pipeline(controller.clone(), 30);
        let run = tokio::spawn(async move { pipeline.execute("/tmp/estudio-it", spec()).await });

        while ticks.load(Ordering::SeqCst) < 1 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        for op in seq {
            match op {
                0 => {
                    controller.pause();
                }
                1 => {
                    controller.resume();
                }
                _ => {
                    controller.cancel();
                }
            }
            let state = controller.state();
            assert!(
                matches!(
                    state,
                    PipelineState::Running
                        | PipelineState::Paused
                        | PipelineState::Cancelled
                        | PipelineState::Completed
                ),
                "undefined state {state} for sequence {seq:?}"
            );
        }

        // Whatever happened, the run must terminate: resume if left paused.
        controller.resume();
        let report = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("run must terminate")
            .unwrap()
            .unwrap();
        assert!(matches!(
            controller.state(),
            PipelineState::Completed | PipelineState::Cancelled
        ));
        assert!(report.outcome.is_completed() || report.outcome.is_cancelled());
    }
}

/// ETA sweep: finite and non-negative for all progress in [0, 1) and any
/// stage count.
#[test]
fn eta_bounds_hold_across_sweep() {
    let mut eta = EtaEstimator::new(Duration::from_secs(30));

    for pass in 0..2 {
        for step in 0..100 {
            let progress = f64::from(step) / 100.0;
            for remaining in 0..10usize {
                let secs = eta.estimate(progress, remaining).as_secs_f64();
                assert!(secs.is_finite());
                assert!(secs >= 0.0);
            }
        }
        if pass == 0 {
            eta.record(Duration::from_millis(1200));
            eta.record(Duration::from_secs(90));
        }
    }
}
