//! Delivery stage.
//!
//! Streams the final artifact to the delivery endpoint, along with a
//! probe-derived metadata document and the viseme track when present.
//! Each document is one unit of work with a checkpoint before it.

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::io::ReaderStream;
use tracing::info;

use estudio_media::{fs_utils, probe_media, MediaInfo};
use estudio_models::RenderStage;
use estudio_pipeline::{Stage, StageContext, StageError, StageResult};

use crate::retry::{retry_async, RetryConfig};
use crate::stages::{final_artifact_name, VISEME_FILE};

/// Metadata document delivered alongside the artifact.
#[derive(Debug, Serialize)]
struct ArtifactMetadata<'a> {
    project_id: &'a str,
    duration_secs: f64,
    width: u32,
    height: u32,
    size_bytes: u64,
    video_codec: Option<&'a str>,
    audio_codec: Option<&'a str>,
}

/// Delivers the finished render.
pub struct UploadStage {
    http: reqwest::Client,
    base_url: String,
    user_id: String,
    job_id: String,
    retry: RetryConfig,
}

impl UploadStage {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        user_id: impl Into<String>,
        job_id: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            user_id: user_id.into(),
            job_id: job_id.into(),
            retry: RetryConfig::new("delivery_put"),
        }
    }

    /// Delivery prefix for this job's documents.
    pub fn delivery_prefix(base_url: &str, user_id: &str, project_id: &str, job_id: &str) -> String {
        format!("{base_url}/{user_id}/{project_id}/{job_id}")
    }

    /// Public URL of the delivered artifact.
    pub fn artifact_url(&self, project_id: &str, artifact_name: &str) -> String {
        format!(
            "{}/{artifact_name}",
            Self::delivery_prefix(&self.base_url, &self.user_id, project_id, &self.job_id)
        )
    }

    async fn put_json(&self, url: &str, body: String) -> StageResult<()> {
        retry_async(&self.retry, || async {
            let response = self
                .http
                .put(url)
                .header("content-type", "application/json")
                .body(body.clone())
                .send()
                .await
                .map_err(|e| format!("{e}"))?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(format!("{} returned {}", url, response.status()))
            }
        })
        .await
        .map_err(StageError::retryable)
    }

    async fn put_file(&self, url: &str, path: &std::path::Path, content_type: &str) -> StageResult<()> {
        retry_async(&self.retry, || async {
            let file = tokio::fs::File::open(path)
                .await
                .map_err(|e| format!("open {}: {e}", path.display()))?;
            let stream = ReaderStream::new(file);
            let body = reqwest::Body::wrap_stream(stream);

            let response = self
                .http
                .put(url)
                .header("content-type", content_type)
                .body(body)
                .send()
                .await
                .map_err(|e| format!("{e}"))?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(format!("{} returned {}", url, response.status()))
            }
        })
        .await
        .map_err(StageError::retryable)
    }
}

#[async_trait]
impl Stage for UploadStage {
    fn stage(&self) -> RenderStage {
        RenderStage::Upload
    }

    async fn run(&self, ctx: &StageContext) -> StageResult<()> {
        let spec = ctx.spec();
        let artifact_name = if spec.scenes.is_empty() {
            // Narration-only jobs deliver the audio track.
            crate::stages::NARRATION_FILE.to_string()
        } else {
            final_artifact_name(spec.output.format)
        };

        let artifact_path = ctx.work_dir().join(&artifact_name);
        if !artifact_path.exists() {
            return Err(StageError::fatal(format!(
                "artifact missing: {}",
                artifact_path.display()
            )));
        }

        // Unit 1: metadata document.
        if !ctx.checkpoint().await {
            return Err(StageError::Cancelled);
        }

        let media: MediaInfo = probe_media(&artifact_path)
            .await
            .map_err(crate::stages::map_media_err)?;
        let size_bytes = fs_utils::file_size(&artifact_path)
            .await
            .map_err(crate::stages::map_media_err)?;

        let metadata = ArtifactMetadata {
            project_id: &spec.project_id,
            duration_secs: media.duration,
            width: media.width,
            height: media.height,
            size_bytes,
            video_codec: media.video_codec.as_deref(),
            audio_codec: media.audio_codec.as_deref(),
        };
        let metadata_json = serde_json::to_string(&metadata)
            .map_err(|e| StageError::fatal(format!("metadata serialization: {e}")))?;

        self.put_json(
            &self.artifact_url(&spec.project_id, "metadata.json"),
            metadata_json,
        )
        .await?;
        ctx.report(0.2);

        // Unit 2: viseme track, when the render produced one.
        if !ctx.checkpoint().await {
            return Err(StageError::Cancelled);
        }

        let visemes = ctx.work_dir().join(VISEME_FILE);
        if visemes.exists() {
            self.put_file(
                &self.artifact_url(&spec.project_id, VISEME_FILE),
                &visemes,
                "application/json",
            )
            .await?;
        }
        ctx.report(0.4);

        // Unit 3: the artifact itself.
        if !ctx.checkpoint().await {
            return Err(StageError::Cancelled);
        }

        let content_type = if artifact_name.ends_with(".webm") {
            "video/webm"
        } else if artifact_name.ends_with(".m4a") {
            "audio/mp4"
        } else {
            "video/mp4"
        };

        let url = self.artifact_url(&spec.project_id, &artifact_name);
        self.put_file(&url, &artifact_path, content_type).await?;

        info!(url = %url, bytes = size_bytes, "Artifact delivered");
        ctx.report(1.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_url_shape() {
        let stage = UploadStage::new(
            reqwest::Client::new(),
            "https://delivery.example.com/renders",
            "user-1",
            "job-9",
        );
        assert_eq!(
            stage.artifact_url("proj-3", "final.mp4"),
            "https://delivery.example.com/renders/user-1/proj-3/job-9/final.mp4"
        );
    }
}
