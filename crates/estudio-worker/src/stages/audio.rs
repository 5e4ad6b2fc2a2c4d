//! Narration audio synthesis stage.
//!
//! One unit of work per narration segment: synthesize via the TTS service,
//! write the segment file, checkpoint, move on. The segments are then
//! concatenated into a single AAC narration track.

use async_trait::async_trait;
use tracing::info;

use estudio_media::{fs_utils, FfmpegCommand, FfmpegRunner};
use estudio_models::RenderStage;
use estudio_pipeline::{Stage, StageContext, StageError, StageResult};

use crate::stages::{map_media_err, segment_audio_path, NARRATION_FILE};
use crate::tts::TtsClient;

/// Synthesizes the narration track.
pub struct AudioSynthesisStage {
    tts: TtsClient,
}

impl AudioSynthesisStage {
    pub fn new(tts: TtsClient) -> Self {
        Self { tts }
    }
}

#[async_trait]
impl Stage for AudioSynthesisStage {
    fn stage(&self) -> RenderStage {
        RenderStage::AudioSynthesis
    }

    async fn run(&self, ctx: &StageContext) -> StageResult<()> {
        let segments = &ctx.spec().narration;
        if segments.is_empty() {
            // Nothing to narrate; scheduled defensively.
            return Ok(());
        }

        let audio_dir = ctx.work_dir().join("audio");
        fs_utils::ensure_dir(&audio_dir).await.map_err(map_media_err)?;

        let total = segments.len();
        let mut concat_list = String::new();

        for (index, segment) in segments.iter().enumerate() {
            if !ctx.checkpoint().await {
                return Err(StageError::Cancelled);
            }

            let audio = self.tts.synthesize(segment).await.map_err(|e| {
                if e.is_permanent() {
                    StageError::fatal(e.to_string())
                } else {
                    StageError::retryable(e.to_string())
                }
            })?;

            let path = segment_audio_path(ctx.work_dir(), index);
            tokio::fs::write(&path, &audio).await?;
            concat_list.push_str(&format!("file '{}'\n", path.display()));

            ctx.report(0.9 * (index + 1) as f64 / total as f64);
        }

        // Concatenate the segments into one track.
        if !ctx.checkpoint().await {
            return Err(StageError::Cancelled);
        }

        let list_path = audio_dir.join("segments.txt");
        tokio::fs::write(&list_path, &concat_list).await?;

        let narration_path = ctx.work_dir().join(NARRATION_FILE);
        let cmd = FfmpegCommand::new(&narration_path)
            .concat_list(&list_path)
            .output_args(["-c:a", "aac", "-b:a", ctx.spec().output.quality.audio_bitrate()]);

        FfmpegRunner::new()
            .with_cancel(ctx.cancel_signal())
            .run(&cmd)
            .await
            .map_err(map_media_err)?;

        info!(segments = total, "Narration track written");
        ctx.report(1.0);
        Ok(())
    }
}
