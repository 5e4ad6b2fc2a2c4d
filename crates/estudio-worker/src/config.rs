//! Worker configuration.

use std::net::SocketAddr;
use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Redis URL (queue, channels and status store)
    pub redis_url: String,
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Job timeout
    pub job_timeout: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Work directory for temporary files
    pub work_dir: String,
    /// How often the worker scans for orphaned pending jobs
    pub claim_interval: Duration,
    /// Minimum idle time before a pending job can be claimed (crash recovery)
    pub claim_min_idle: Duration,
    /// Interval for job status heartbeats while processing
    pub heartbeat_interval: Duration,
    /// How often the stale-status sweep runs
    pub stale_sweep_interval: Duration,
    /// Poll interval for paused checkpoints
    pub checkpoint_poll_interval: Duration,
    /// Default per-stage estimate used before any stage completes
    pub default_stage_estimate: Duration,
    /// Maximum attempts per pipeline stage
    pub stage_max_attempts: u32,
    /// TTS service base URL
    pub tts_base_url: String,
    /// Delivery endpoint base URL for finished artifacts
    pub delivery_base_url: String,
    /// Prometheus exporter listen address (disabled when unset)
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            max_concurrent_jobs: 2,
            job_timeout: Duration::from_secs(3600), // 1 hour
            shutdown_timeout: Duration::from_secs(30),
            work_dir: "/tmp/estudio".to_string(),
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(300), // 5 minutes
            heartbeat_interval: Duration::from_secs(30),
            stale_sweep_interval: Duration::from_secs(60),
            checkpoint_poll_interval: Duration::from_millis(100),
            default_stage_estimate: Duration::from_secs(30),
            stage_max_attempts: 3,
            tts_base_url: "http://localhost:8089".to_string(),
            delivery_base_url: "http://localhost:9000/renders".to_string(),
            metrics_addr: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            max_concurrent_jobs: env_parse("WORKER_MAX_JOBS", defaults.max_concurrent_jobs),
            job_timeout: Duration::from_secs(env_parse(
                "WORKER_JOB_TIMEOUT",
                defaults.job_timeout.as_secs(),
            )),
            shutdown_timeout: Duration::from_secs(env_parse(
                "WORKER_SHUTDOWN_TIMEOUT",
                defaults.shutdown_timeout.as_secs(),
            )),
            work_dir: std::env::var("WORKER_WORK_DIR").unwrap_or(defaults.work_dir),
            claim_interval: Duration::from_secs(env_parse(
                "WORKER_CLAIM_INTERVAL_SECS",
                defaults.claim_interval.as_secs(),
            )),
            claim_min_idle: Duration::from_secs(env_parse(
                "WORKER_CLAIM_MIN_IDLE_SECS",
                defaults.claim_min_idle.as_secs(),
            )),
            heartbeat_interval: Duration::from_secs(env_parse(
                "WORKER_JOB_HEARTBEAT_SECS",
                defaults.heartbeat_interval.as_secs(),
            )),
            stale_sweep_interval: Duration::from_secs(env_parse(
                "WORKER_STALE_SWEEP_SECS",
                defaults.stale_sweep_interval.as_secs(),
            )),
            checkpoint_poll_interval: Duration::from_millis(env_parse(
                "WORKER_CHECKPOINT_POLL_MS",
                defaults.checkpoint_poll_interval.as_millis() as u64,
            )),
            default_stage_estimate: Duration::from_secs(env_parse(
                "WORKER_DEFAULT_STAGE_ESTIMATE_SECS",
                defaults.default_stage_estimate.as_secs(),
            )),
            stage_max_attempts: env_parse("WORKER_STAGE_MAX_ATTEMPTS", defaults.stage_max_attempts),
            tts_base_url: std::env::var("TTS_SERVICE_URL").unwrap_or(defaults.tts_base_url),
            delivery_base_url: std::env::var("DELIVERY_BASE_URL")
                .unwrap_or(defaults.delivery_base_url),
            metrics_addr: std::env::var("METRICS_LISTEN_ADDR")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
