//! Final encoding stage.
//!
//! Two units of work: concatenate the composed scene segments (stream
//! copy), then transcode to the target codec/bitrate with the narration
//! track muxed in. Checkpoints sit between the units; the transcode feeds
//! stage progress from FFmpeg's progress output.

use async_trait::async_trait;
use tracing::info;

use estudio_media::{probe_media, FfmpegCommand, FfmpegRunner};
use estudio_models::RenderStage;
use estudio_pipeline::{Stage, StageContext, StageError, StageResult};

use crate::stages::{
    map_media_err, final_artifact_name, scene_segment_path, COMPOSED_FILE, NARRATION_FILE,
};

/// Produces the final deliverable from composed segments and narration.
pub struct EncodingStage;

#[async_trait]
impl Stage for EncodingStage {
    fn stage(&self) -> RenderStage {
        RenderStage::Encoding
    }

    async fn run(&self, ctx: &StageContext) -> StageResult<()> {
        let scene_count = ctx.spec().scenes.len();
        if scene_count == 0 {
            return Err(StageError::fatal("render spec has no scenes"));
        }

        // Unit 1: concatenate segments.
        if !ctx.checkpoint().await {
            return Err(StageError::Cancelled);
        }

        let mut concat_list = String::new();
        for index in 0..scene_count {
            let segment = scene_segment_path(ctx.work_dir(), index);
            if !segment.exists() {
                return Err(StageError::fatal(format!(
                    "missing composed segment {}",
                    segment.display()
                )));
            }
            concat_list.push_str(&format!("file '{}'\n", segment.display()));
        }

        let list_path = ctx.work_dir().join("segments.txt");
        tokio::fs::write(&list_path, &concat_list).await?;

        let composed = ctx.work_dir().join(COMPOSED_FILE);
        let concat_cmd = FfmpegCommand::new(&composed)
            .concat_list(&list_path)
            .copy_codecs();

        FfmpegRunner::new()
            .with_cancel(ctx.cancel_signal())
            .run(&concat_cmd)
            .await
            .map_err(map_media_err)?;

        ctx.report(0.4);

        // Unit 2: transcode + mux narration.
        if !ctx.checkpoint().await {
            return Err(StageError::Cancelled);
        }

        let info = probe_media(&composed).await.map_err(map_media_err)?;
        let total_ms = info.duration_ms();

        let settings = &ctx.spec().output;
        let final_path = ctx.work_dir().join(final_artifact_name(settings.format));
        let narration = ctx.work_dir().join(NARRATION_FILE);

        let mut cmd = FfmpegCommand::new(&final_path).input(&composed);
        if narration.exists() {
            cmd = cmd
                .input(&narration)
                .output_args(["-map", "0:v:0", "-map", "1:a:0"]);
        }
        let cmd = cmd.apply_output(settings);

        let progress = ctx.progress_handle();
        FfmpegRunner::new()
            .with_cancel(ctx.cancel_signal())
            .run_with_progress(&cmd, move |p| {
                progress.report(0.4 + 0.6 * p.fraction(total_ms));
            })
            .await
            .map_err(map_media_err)?;

        info!(artifact = %final_path.display(), "Final encode complete");
        ctx.report(1.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use estudio_models::RenderSpec;
    use estudio_pipeline::PipelineController;

    #[tokio::test]
    async fn test_no_scenes_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = StageContext::detached(
            PipelineController::new(),
            dir.path(),
            RenderSpec::new("p", Vec::new()),
            RenderStage::Encoding,
        );

        let err = EncodingStage.run(&ctx).await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
