//! Job executor.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use estudio_queue::{JobQueue, QueuedMessage};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::processor::{process_job, JobOutcome, ProcessingContext};

/// Job executor that processes jobs from the queue.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<JobQueue>,
    job_semaphore: Arc<Semaphore>,
    shutdown: tokio::sync::watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    /// Create a new job executor.
    pub fn new(config: WorkerConfig, queue: JobQueue) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = tokio::sync::watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            config,
            queue: Arc::new(queue),
            job_semaphore,
            shutdown,
            consumer_name,
        }
    }

    /// Start the executor.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting job executor '{}' with {} max concurrent jobs",
            self.consumer_name, self.config.max_concurrent_jobs
        );

        self.queue.init().await?;

        let ctx = Arc::new(ProcessingContext::new(self.config.clone())?);

        let mut shutdown_rx = self.shutdown.subscribe();
        let claim_task = self.spawn_claim_task(Arc::clone(&ctx));
        let sweep_task = self.spawn_stale_sweep(Arc::clone(&ctx));

        // Main job consumption loop
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_jobs(&ctx) => {
                    if let Err(e) = result {
                        error!("Error consuming jobs: {}", e);
                        // Back off on error
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();
        sweep_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        let _ = tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs()).await;

        info!("Job executor stopped");
        Ok(())
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Consume and process jobs from the queue.
    async fn consume_jobs(&self, ctx: &Arc<ProcessingContext>) -> WorkerResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            // All slots busy, wait a bit
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let messages = self
            .queue
            .consume(
                &self.consumer_name,
                1000, // Block for 1 second
                available.min(5),
            )
            .await?;

        if messages.is_empty() {
            return Ok(());
        }

        debug!("Consumed {} jobs from queue", messages.len());

        for message in messages {
            self.dispatch(Arc::clone(ctx), message).await?;
        }

        Ok(())
    }

    /// Spawn a job onto a semaphore slot.
    async fn dispatch(
        &self,
        ctx: Arc<ProcessingContext>,
        message: QueuedMessage,
    ) -> WorkerResult<()> {
        let queue = Arc::clone(&self.queue);
        let job_timeout = self.config.job_timeout;
        let permit = self
            .job_semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| WorkerError::job_failed("Semaphore closed"))?;

        tokio::spawn(async move {
            let _permit = permit;
            Self::execute_job(ctx, queue, message, job_timeout).await;
        });

        Ok(())
    }

    /// Periodically claim jobs stranded by crashed workers.
    fn spawn_claim_task(&self, ctx: Arc<ProcessingContext>) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let consumer_name = self.consumer_name.clone();
        let semaphore = Arc::clone(&self.job_semaphore);
        let claim_interval = self.config.claim_interval;
        let claim_min_idle = self.config.claim_min_idle;
        let job_timeout = self.config.job_timeout;
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(claim_interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        match queue
                            .claim_pending(&consumer_name, claim_min_idle.as_millis() as u64, 5)
                            .await
                        {
                            Ok(messages) if !messages.is_empty() => {
                                info!("Claimed {} pending jobs", messages.len());
                                for message in messages {
                                    let ctx = Arc::clone(&ctx);
                                    let queue = Arc::clone(&queue);
                                    let Ok(permit) = semaphore.clone().acquire_owned().await else {
                                        return;
                                    };
                                    tokio::spawn(async move {
                                        let _permit = permit;
                                        Self::execute_job(ctx, queue, message, job_timeout).await;
                                    });
                                }
                            }
                            Ok(_) => {}
                            Err(e) => {
                                warn!("Failed to claim pending jobs: {}", e);
                            }
                        }
                    }
                }
            }
        })
    }

    /// Periodically mark lapsed status entries stale.
    fn spawn_stale_sweep(&self, ctx: Arc<ProcessingContext>) -> tokio::task::JoinHandle<()> {
        let sweep_interval = self.config.stale_sweep_interval;
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        match ctx.status.scan_stale().await {
                            Ok(0) => {}
                            Ok(marked) => {
                                warn!("Marked {} jobs stale", marked);
                                metrics::counter!("estudio_jobs_stale").increment(marked);
                            }
                            Err(e) => {
                                warn!("Stale sweep failed: {}", e);
                            }
                        }
                    }
                }
            }
        })
    }

    /// Execute a single job with retry and DLQ handling.
    async fn execute_job(
        ctx: Arc<ProcessingContext>,
        queue: Arc<JobQueue>,
        message: QueuedMessage,
        job_timeout: Duration,
    ) {
        let job_id = message.job.job_id().to_string();
        info!("Executing job {}", job_id);
        metrics::counter!("estudio_jobs_started").increment(1);

        let result = match tokio::time::timeout(job_timeout, process_job(&ctx, &message.job)).await
        {
            Ok(result) => result,
            Err(_) => Err(WorkerError::job_failed(format!(
                "timed out after {}s",
                job_timeout.as_secs()
            ))),
        };

        match result {
            Ok(JobOutcome::Completed) => {
                info!("Job {} completed successfully", job_id);
                metrics::counter!("estudio_jobs_completed").increment(1);
                Self::consume_message(&queue, &message, &job_id).await;
            }
            Ok(JobOutcome::Cancelled) => {
                info!("Job {} cancelled by user", job_id);
                metrics::counter!("estudio_jobs_cancelled").increment(1);
                Self::consume_message(&queue, &message, &job_id).await;
            }
            Err(e) => {
                error!("Job {} failed: {}", job_id, e);
                metrics::counter!("estudio_jobs_failed").increment(1);

                let retry_count = queue.increment_retry(&message).await.unwrap_or(u32::MAX);
                let max_retries = queue.max_retries();

                if retry_count >= max_retries {
                    warn!(
                        "Job {} exceeded max retries ({}), moving to DLQ",
                        job_id, max_retries
                    );
                    if let Err(dlq_err) = queue.dlq(&message, &e.to_string()).await {
                        error!("Failed to move job {} to DLQ: {}", job_id, dlq_err);
                    }
                    // Allow manual resubmission later
                    if let Err(e) = queue.clear_dedup(&message.job).await {
                        warn!("Failed to clear dedup key for job {}: {}", job_id, e);
                    }
                    metrics::counter!("estudio_jobs_dead_lettered").increment(1);

                    ctx.progress
                        .error(
                            message.job.job_id(),
                            format!("Job failed after {max_retries} attempts: {e}"),
                        )
                        .await
                        .ok();
                } else {
                    info!(
                        "Job {} will be retried (attempt {}/{})",
                        job_id, retry_count, max_retries
                    );
                    // Redelivered via claim after the visibility window
                }
            }
        }
    }

    /// Ack a finished message and release its dedup key.
    async fn consume_message(queue: &JobQueue, message: &QueuedMessage, job_id: &str) {
        if let Err(e) = queue.ack(&message.stream, &message.id).await {
            error!("Failed to ack job {}: {}", job_id, e);
        }
        if let Err(e) = queue.clear_dedup(&message.job).await {
            warn!("Failed to clear dedup key for job {}: {}", job_id, e);
        }
    }

    /// Wait for all in-flight jobs to complete.
    async fn wait_for_jobs(&self) {
        loop {
            let available = self.job_semaphore.available_permits();
            if available == self.config.max_concurrent_jobs {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
