//! Pipeline stage implementations.
//!
//! Artifact layout inside a job's work directory:
//!
//! ```text
//! audio/segment-NNN.mp3   per-segment synthesized narration
//! audio/segments.txt      concat list
//! narration.m4a           concatenated narration track
//! visemes.json            viseme timing track (avatar jobs)
//! assets/                 downloaded slide images
//! scenes/scene-NNN.mp4    composed scene segments (mezzanine)
//! segments.txt            scene concat list
//! composed.mp4            concatenated silent video
//! final.<ext>             delivered artifact
//! ```

pub mod audio;
pub mod compose;
pub mod encode;
pub mod lipsync;
pub mod upload;

pub use audio::AudioSynthesisStage;
pub use compose::CompositionStage;
pub use encode::EncodingStage;
pub use lipsync::LipSyncStage;
pub use upload::UploadStage;

use std::path::{Path, PathBuf};

use estudio_media::MediaError;
use estudio_models::ContainerFormat;
use estudio_pipeline::StageError;

/// Concatenated narration track file name.
pub const NARRATION_FILE: &str = "narration.m4a";

/// Viseme track file name.
pub const VISEME_FILE: &str = "visemes.json";

/// Concatenated silent video file name.
pub const COMPOSED_FILE: &str = "composed.mp4";

/// Final artifact file name for a container format.
pub fn final_artifact_name(format: ContainerFormat) -> String {
    format!("final.{}", format.extension())
}

/// Path of one synthesized narration segment.
pub fn segment_audio_path(work_dir: &Path, index: usize) -> PathBuf {
    work_dir.join("audio").join(format!("segment-{index:03}.mp3"))
}

/// Path of one composed scene segment.
pub fn scene_segment_path(work_dir: &Path, index: usize) -> PathBuf {
    work_dir.join("scenes").join(format!("scene-{index:03}.mp4"))
}

/// Map media-layer errors to stage errors.
pub(crate) fn map_media_err(e: MediaError) -> StageError {
    match e {
        MediaError::Cancelled => StageError::Cancelled,
        MediaError::FfmpegNotFound | MediaError::FfprobeNotFound => {
            StageError::fatal(e.to_string())
        }
        MediaError::FileNotFound(_) | MediaError::InvalidMedia(_) => {
            StageError::fatal(e.to_string())
        }
        other => StageError::retryable(other.to_string()),
    }
}
