//! FFmpeg CLI wrapper for the Estudio render worker.
//!
//! This crate provides:
//! - A command builder for the compositions and encodes the worker runs
//! - A runner with progress parsing, cancellation and timeouts
//! - FFprobe wrapping for media metadata
//! - Filesystem helpers for cross-device moves

pub mod command;
pub mod error;
pub mod fs_utils;
pub mod probe;
pub mod progress;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use probe::{probe_media, MediaInfo};
pub use progress::EncodeProgress;
