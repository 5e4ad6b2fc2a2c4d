//! Per-job orchestration.
//!
//! For each consumed job the processor prepares a work directory, builds
//! the stage list, wires the pipeline controller to the job's control
//! channel (so UI pause/resume/cancel reaches the running pipeline),
//! maintains heartbeats and status snapshots, and translates the pipeline
//! report into a final status.

use std::path::PathBuf;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use estudio_media::fs_utils;
use estudio_models::{JobId, JobStatus, JobStatusCache, RenderSpec};
use estudio_pipeline::{
    PipelineController, PipelineEvent, PipelineOutcome, RenderPipeline, Stage, StageRetry,
};
use estudio_queue::{ControlChannel, ControlCommand, JobStatusStore, ProgressChannel, QueueJob,
    RenderVideoJob, SynthesizeNarrationJob};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::retry::FailureTracker;
use crate::stages::{
    final_artifact_name, AudioSynthesisStage, CompositionStage, EncodingStage, LipSyncStage,
    UploadStage, NARRATION_FILE,
};
use crate::tts::TtsClient;

/// How a job ended from the executor's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Artifact delivered.
    Completed,
    /// Cancelled by the user; the message is consumed, not retried.
    Cancelled,
}

/// Shared services for job processing.
pub struct ProcessingContext {
    pub config: WorkerConfig,
    pub progress: ProgressChannel,
    pub status: JobStatusStore,
    pub control: ControlChannel,
    pub tts: TtsClient,
    pub http: reqwest::Client,
}

impl ProcessingContext {
    /// Build the context from worker configuration.
    pub fn new(config: WorkerConfig) -> WorkerResult<Self> {
        let progress = ProgressChannel::new(&config.redis_url)?;
        let status = JobStatusStore::new(&config.redis_url)?;
        let control = ControlChannel::new(&config.redis_url)?;
        let tts = TtsClient::new(config.tts_base_url.clone());

        Ok(Self {
            config,
            progress,
            status,
            control,
            tts,
            http: reqwest::Client::new(),
        })
    }
}

/// Process one consumed job.
pub async fn process_job(ctx: &Arc<ProcessingContext>, job: &QueueJob) -> WorkerResult<JobOutcome> {
    match job {
        QueueJob::RenderVideo(j) => render_video(ctx, j).await,
        QueueJob::SynthesizeNarration(j) => synthesize_narration(ctx, j).await,
    }
}

/// Run a full five-stage render.
pub async fn render_video(
    ctx: &Arc<ProcessingContext>,
    job: &RenderVideoJob,
) -> WorkerResult<JobOutcome> {
    let logger = JobLogger::new(&job.job_id, "render_video");
    let spec = job.spec.clone();

    let mut stages: Vec<Box<dyn Stage>> = Vec::new();
    if !spec.narration.is_empty() {
        stages.push(Box::new(AudioSynthesisStage::new(ctx.tts.clone())));
        if spec.avatar.is_some() {
            stages.push(Box::new(LipSyncStage));
        }
    }
    stages.push(Box::new(CompositionStage::new(ctx.http.clone())));
    stages.push(Box::new(EncodingStage));

    let upload = UploadStage::new(
        ctx.http.clone(),
        ctx.config.delivery_base_url.clone(),
        job.user_id.clone(),
        job.job_id.as_str(),
    );
    let output_url = upload.artifact_url(
        &spec.project_id,
        &final_artifact_name(spec.output.format),
    );
    stages.push(Box::new(upload));

    run_pipeline(ctx, &logger, &job.job_id, &job.user_id, spec, stages, output_url).await
}

/// Run a narration-only synthesis (audio + delivery).
pub async fn synthesize_narration(
    ctx: &Arc<ProcessingContext>,
    job: &SynthesizeNarrationJob,
) -> WorkerResult<JobOutcome> {
    let logger = JobLogger::new(&job.job_id, "synthesize_narration");
    let spec = job.to_spec();

    let upload = UploadStage::new(
        ctx.http.clone(),
        ctx.config.delivery_base_url.clone(),
        job.user_id.clone(),
        job.job_id.as_str(),
    );
    let output_url = upload.artifact_url(&job.project_id, NARRATION_FILE);

    let stages: Vec<Box<dyn Stage>> = vec![
        Box::new(AudioSynthesisStage::new(ctx.tts.clone())),
        Box::new(upload),
    ];

    run_pipeline(ctx, &logger, &job.job_id, &job.user_id, spec, stages, output_url).await
}

async fn run_pipeline(
    ctx: &Arc<ProcessingContext>,
    logger: &JobLogger,
    job_id: &JobId,
    user_id: &str,
    spec: RenderSpec,
    stages: Vec<Box<dyn Stage>>,
    output_url: String,
) -> WorkerResult<JobOutcome> {
    let work_dir = PathBuf::from(&ctx.config.work_dir).join(job_id.as_str());
    fs_utils::ensure_dir(&work_dir).await?;

    let mut cache = JobStatusCache::new(job_id.as_str(), &spec.project_id, user_id);
    cache.set_status(JobStatus::Processing);
    ctx.status.put(&cache).await?;

    logger.start(&format!("{} stages, project {}", stages.len(), spec.project_id));

    let controller =
        PipelineController::with_poll_interval(ctx.config.checkpoint_poll_interval);

    let control_task = spawn_control_listener(Arc::clone(ctx), job_id.clone(), controller.clone());
    let heartbeat_task = spawn_heartbeat(Arc::clone(ctx), job_id.clone());

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let forwarder = spawn_event_forwarder(Arc::clone(ctx), job_id.clone(), events_rx);

    let mut pipeline = RenderPipeline::new(controller)
        .with_retry(StageRetry::default().with_max_attempts(ctx.config.stage_max_attempts))
        .with_default_stage_estimate(ctx.config.default_stage_estimate)
        .with_events(events_tx);
    for stage in stages {
        pipeline = pipeline.with_stage(stage);
    }

    let result = pipeline.execute(work_dir.clone(), spec).await;

    // Closing the event channel lets the forwarder drain and exit.
    drop(pipeline);
    forwarder.await.ok();
    control_task.abort();
    heartbeat_task.abort();

    fs_utils::remove_dir_if_exists(&work_dir).await.ok();

    let report = result?;

    match report.outcome {
        PipelineOutcome::Completed => {
            logger.completion(&format!(
                "{} stages in {:?} ({} retries, {:?} paused)",
                report.stages.len(),
                report.total_duration,
                report.retry_attempts,
                report.paused_duration,
            ));
            ctx.progress.done(job_id, &output_url).await.ok();
            ctx.status
                .modify(job_id, |s| s.complete(&output_url))
                .await
                .ok();
            Ok(JobOutcome::Completed)
        }
        PipelineOutcome::Cancelled => {
            logger.progress("cancelled by user");
            ctx.progress.cancelled(job_id).await.ok();
            ctx.status.modify(job_id, |s| s.cancel()).await.ok();
            Ok(JobOutcome::Cancelled)
        }
        PipelineOutcome::Failed { stage, message } => {
            let description = format!("stage {stage} failed: {message}");
            logger.error(&description);
            ctx.progress.error(job_id, &description).await.ok();
            ctx.status
                .modify(job_id, |s| s.fail(&description))
                .await
                .ok();
            Err(WorkerError::job_failed(description))
        }
    }
}

/// Forward control-channel commands to the pipeline controller.
fn spawn_control_listener(
    ctx: Arc<ProcessingContext>,
    job_id: JobId,
    controller: PipelineController,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stream = match ctx.control.subscribe(&job_id).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(job_id = %job_id, "Control subscription failed: {}", e);
                return;
            }
        };

        while let Some(command) = stream.next().await {
            match command {
                ControlCommand::Pause => {
                    if controller.pause() {
                        ctx.progress.paused(&job_id).await.ok();
                        ctx.status
                            .modify(&job_id, |s| s.set_status(JobStatus::Paused))
                            .await
                            .ok();
                    }
                }
                ControlCommand::Resume => {
                    if controller.resume() {
                        ctx.progress.resumed(&job_id).await.ok();
                        ctx.status
                            .modify(&job_id, |s| s.set_status(JobStatus::Processing))
                            .await
                            .ok();
                    }
                }
                ControlCommand::Cancel => {
                    // Final status and event come from the pipeline outcome.
                    controller.cancel();
                }
            }
        }
    })
}

/// Keep the status heartbeat fresh while the job runs.
fn spawn_heartbeat(ctx: Arc<ProcessingContext>, job_id: JobId) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(ctx.config.heartbeat_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut failures = FailureTracker::new(3);

        loop {
            interval.tick().await;
            match ctx.status.heartbeat(&job_id).await {
                Ok(_) => failures.record_success(),
                Err(e) => {
                    if failures.record_failure() {
                        warn!(job_id = %job_id, "Heartbeat failed: {}", e);
                    }
                }
            }
        }
    })
}

/// Translate pipeline events into progress-channel events and status
/// updates.
fn spawn_event_forwarder(
    ctx: Arc<ProcessingContext>,
    job_id: JobId,
    mut events: mpsc::UnboundedReceiver<PipelineEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                PipelineEvent::StageStarted { stage } => {
                    ctx.progress.stage_started(&job_id, stage).await.ok();
                    ctx.status
                        .modify(&job_id, |s| {
                            let progress = s.progress;
                            let eta = s.eta_seconds;
                            s.set_progress(progress, Some(stage), eta);
                        })
                        .await
                        .ok();
                }
                PipelineEvent::StageCompleted { stage, duration } => {
                    ctx.progress
                        .stage_completed(&job_id, stage, duration.as_millis() as u64)
                        .await
                        .ok();
                }
                PipelineEvent::Progress {
                    stage,
                    stage_progress,
                    overall,
                    eta,
                } => {
                    ctx.progress
                        .progress(&job_id, overall, stage, stage_progress, Some(eta.as_secs()))
                        .await
                        .ok();
                    ctx.status
                        .modify(&job_id, |s| {
                            s.set_progress(overall, Some(stage), Some(eta.as_secs()));
                        })
                        .await
                        .ok();
                }
                PipelineEvent::StageRetrying {
                    stage,
                    attempt,
                    error,
                } => {
                    ctx.progress
                        .log(
                            &job_id,
                            format!("Stage {stage} attempt {attempt} failed, retrying: {error}"),
                        )
                        .await
                        .ok();
                }
            }
        }
    })
}
