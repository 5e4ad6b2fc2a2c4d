//! Render worker for the Estudio backend.
//!
//! This crate provides:
//! - The job executor consuming render jobs from the queue
//! - Per-job orchestration: pipeline assembly, control-channel forwarding,
//!   heartbeats and status updates
//! - The five pipeline stage implementations
//! - The TTS service client
//! - Graceful shutdown

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod processor;
pub mod retry;
pub mod stages;
pub mod tts;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use logging::JobLogger;
pub use processor::ProcessingContext;
pub use tts::TtsClient;
