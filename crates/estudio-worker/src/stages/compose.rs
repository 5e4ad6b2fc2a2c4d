//! Scene composition stage.
//!
//! One unit of work per scene: the slide image becomes a video segment at
//! the target frame size, with fades where the spec asks for them. The
//! segments use a fast intraframe-friendly mezzanine encode; the encoding
//! stage produces the final deliverable.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, info};

use estudio_media::{fs_utils, FfmpegCommand, FfmpegRunner};
use estudio_models::{RenderStage, SceneSpec, Transition};
use estudio_pipeline::{Stage, StageContext, StageError, StageResult};

use crate::stages::{map_media_err, scene_segment_path};

/// Composes per-scene video segments from slide images.
pub struct CompositionStage {
    http: reqwest::Client,
}

impl CompositionStage {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Resolve a scene's image to a local path, downloading URLs into the
    /// work directory.
    async fn resolve_image(&self, ctx: &StageContext, index: usize, scene: &SceneSpec) -> StageResult<PathBuf> {
        if scene.image.starts_with("http://") || scene.image.starts_with("https://") {
            let assets_dir = ctx.work_dir().join("assets");
            fs_utils::ensure_dir(&assets_dir).await.map_err(map_media_err)?;

            let extension = scene
                .image
                .rsplit('.')
                .next()
                .filter(|ext| ext.len() <= 4)
                .unwrap_or("png");
            let target = assets_dir.join(format!("scene-{index:03}.{extension}"));

            debug!(url = %scene.image, "Downloading slide image");
            let response = self
                .http
                .get(&scene.image)
                .send()
                .await
                .map_err(|e| StageError::retryable(format!("image download: {e}")))?;

            if !response.status().is_success() {
                return Err(StageError::fatal(format!(
                    "slide image {} returned {}",
                    scene.image,
                    response.status()
                )));
            }

            let bytes = response
                .bytes()
                .await
                .map_err(|e| StageError::retryable(format!("image download: {e}")))?;
            tokio::fs::write(&target, &bytes).await?;
            Ok(target)
        } else {
            let path = PathBuf::from(&scene.image);
            if !path.exists() {
                return Err(StageError::fatal(format!(
                    "slide image not found: {}",
                    path.display()
                )));
            }
            Ok(path)
        }
    }

    /// Filter graph for one scene.
    fn scene_filter(scene: &SceneSpec, width: u32, height: u32) -> String {
        let mut filter = format!(
            "scale={width}:{height}:force_original_aspect_ratio=decrease,\
             pad={width}:{height}:(ow-iw)/2:(oh-ih)/2:color=black"
        );

        if scene.transition == Transition::Fade && scene.transition_duration_secs > 0.0 {
            let fade = scene
                .transition_duration_secs
                .min(scene.duration_secs / 2.0);
            let out_start = (scene.duration_secs - fade).max(0.0);
            filter.push_str(&format!(
                ",fade=t=in:st=0:d={fade:.3},fade=t=out:st={out_start:.3}:d={fade:.3}"
            ));
        }

        filter
    }
}

#[async_trait]
impl Stage for CompositionStage {
    fn stage(&self) -> RenderStage {
        RenderStage::Composition
    }

    async fn run(&self, ctx: &StageContext) -> StageResult<()> {
        let scenes = &ctx.spec().scenes;
        if scenes.is_empty() {
            return Err(StageError::fatal("render spec has no scenes"));
        }

        fs_utils::ensure_dir(ctx.work_dir().join("scenes"))
            .await
            .map_err(map_media_err)?;

        let (width, height) = ctx.spec().output.resolution.dimensions();
        let fps = ctx.spec().output.fps;
        let total = scenes.len();

        for (index, scene) in scenes.iter().enumerate() {
            if !ctx.checkpoint().await {
                return Err(StageError::Cancelled);
            }

            let image = self.resolve_image(ctx, index, scene).await?;
            let output = scene_segment_path(ctx.work_dir(), index);

            let cmd = FfmpegCommand::new(&output)
                .image_loop(&image, scene.duration_secs)
                .video_filter(Self::scene_filter(scene, width, height))
                .output_args([
                    "-c:v",
                    "libx264",
                    "-preset",
                    "veryfast",
                    "-crf",
                    "18",
                    "-r",
                    &fps.to_string(),
                    "-pix_fmt",
                    "yuv420p",
                    "-an",
                ]);

            let progress = ctx.progress_handle();
            let scene_ms = (scene.duration_secs * 1000.0) as i64;
            let base = index as f64;
            let total_f = total as f64;

            FfmpegRunner::new()
                .with_cancel(ctx.cancel_signal())
                .run_with_progress(&cmd, move |p| {
                    progress.report((base + p.fraction(scene_ms)) / total_f);
                })
                .await
                .map_err(map_media_err)?;

            debug!(scene = %scene.id, segment = %output.display(), "Scene composed");
        }

        info!(scenes = total, "Composition complete");
        ctx.report(1.0);
        Ok(())
    }
}
