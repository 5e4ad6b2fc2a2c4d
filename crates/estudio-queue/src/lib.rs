//! Redis-backed coordination for the Estudio render backend.
//!
//! This crate provides:
//! - Job enqueueing via Redis Streams, with priority bands, dedup and DLQ
//! - Worker consumption with retry bookkeeping and crash-recovery claims
//! - Progress events via Redis Pub/Sub
//! - The control channel that carries pause/resume/cancel to running jobs
//! - A job status store for polling and stale detection

pub mod control;
pub mod error;
pub mod job;
pub mod progress;
pub mod queue;
pub mod status;

pub use control::{ControlChannel, ControlCommand};
pub use error::{QueueError, QueueResult};
pub use job::{QueueJob, RenderVideoJob, SynthesizeNarrationJob};
pub use progress::ProgressChannel;
pub use queue::{JobQueue, QueueConfig, QueueStats, QueuedMessage};
pub use status::{
    JobStatusStore, JOB_STATUS_TTL_SECS, STALE_GRACE_PERIOD_SECS, STALE_THRESHOLD_SECS,
};
