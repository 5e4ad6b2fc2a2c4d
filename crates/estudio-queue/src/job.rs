//! Job types for the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use estudio_models::{JobId, JobPriority, NarrationSegment, RenderSpec};

/// Job to render a full training video through the five-stage pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderVideoJob {
    /// Unique job ID
    pub job_id: JobId,
    /// User ID
    pub user_id: String,
    /// Scheduling priority
    #[serde(default)]
    pub priority: JobPriority,
    /// What to render
    pub spec: RenderSpec,
    /// When the job was created
    pub created_at: DateTime<Utc>,
}

impl RenderVideoJob {
    /// Create a new render job.
    pub fn new(user_id: impl Into<String>, spec: RenderSpec) -> Self {
        Self {
            job_id: JobId::new(),
            user_id: user_id.into(),
            priority: JobPriority::default(),
            spec,
            created_at: Utc::now(),
        }
    }

    /// Set priority.
    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Generate idempotency key for deduplication.
    pub fn idempotency_key(&self) -> String {
        format!("render:{}:{}", self.user_id, self.spec.project_id)
    }
}

/// Job to synthesize a narration track without rendering video.
///
/// Runs the audio synthesis and upload stages only; the original system
/// kept a dedicated TTS queue for this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesizeNarrationJob {
    /// Unique job ID
    pub job_id: JobId,
    /// User ID
    pub user_id: String,
    /// Project the narration belongs to
    pub project_id: String,
    /// Scheduling priority
    #[serde(default)]
    pub priority: JobPriority,
    /// Segments to synthesize
    pub narration: Vec<NarrationSegment>,
    /// When the job was created
    pub created_at: DateTime<Utc>,
}

impl SynthesizeNarrationJob {
    /// Create a new narration job.
    pub fn new(
        user_id: impl Into<String>,
        project_id: impl Into<String>,
        narration: Vec<NarrationSegment>,
    ) -> Self {
        Self {
            job_id: JobId::new(),
            user_id: user_id.into(),
            project_id: project_id.into(),
            priority: JobPriority::default(),
            narration,
            created_at: Utc::now(),
        }
    }

    /// Set priority.
    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Generate idempotency key for deduplication.
    pub fn idempotency_key(&self) -> String {
        format!("narration:{}:{}", self.user_id, self.project_id)
    }

    /// Build the render spec for the narration-only pipeline.
    pub fn to_spec(&self) -> RenderSpec {
        RenderSpec::new(self.project_id.clone(), Vec::new())
            .with_narration(self.narration.clone())
    }
}

/// Generic job wrapper for queue storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueJob {
    /// Full video render
    RenderVideo(RenderVideoJob),
    /// Narration-only synthesis
    SynthesizeNarration(SynthesizeNarrationJob),
}

impl QueueJob {
    pub fn job_id(&self) -> &JobId {
        match self {
            QueueJob::RenderVideo(j) => &j.job_id,
            QueueJob::SynthesizeNarration(j) => &j.job_id,
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            QueueJob::RenderVideo(j) => &j.user_id,
            QueueJob::SynthesizeNarration(j) => &j.user_id,
        }
    }

    pub fn project_id(&self) -> &str {
        match self {
            QueueJob::RenderVideo(j) => &j.spec.project_id,
            QueueJob::SynthesizeNarration(j) => &j.project_id,
        }
    }

    pub fn priority(&self) -> JobPriority {
        match self {
            QueueJob::RenderVideo(j) => j.priority,
            QueueJob::SynthesizeNarration(j) => j.priority,
        }
    }

    pub fn idempotency_key(&self) -> String {
        match self {
            QueueJob::RenderVideo(j) => j.idempotency_key(),
            QueueJob::SynthesizeNarration(j) => j.idempotency_key(),
        }
    }

    /// Returns true if this is a full render job.
    pub fn is_render(&self) -> bool {
        matches!(self, QueueJob::RenderVideo(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use estudio_models::SceneSpec;

    fn spec() -> RenderSpec {
        RenderSpec::new(
            "proj-9",
            vec![SceneSpec {
                id: "s1".into(),
                image: "s1.png".into(),
                title: String::new(),
                duration_secs: 4.0,
                transition: Default::default(),
                transition_duration_secs: 0.5,
            }],
        )
    }

    #[test]
    fn queue_job_render_serde_roundtrip() {
        let job = RenderVideoJob::new("user_1", spec()).with_priority(JobPriority::High);
        let wrapper = QueueJob::RenderVideo(job.clone());

        let json = serde_json::to_string(&wrapper).expect("serialize QueueJob");
        assert!(json.contains("\"type\":\"render_video\""));

        let decoded: QueueJob = serde_json::from_str(&json).expect("deserialize QueueJob");
        match decoded {
            QueueJob::RenderVideo(j) => {
                assert_eq!(j.job_id, job.job_id);
                assert_eq!(j.priority, JobPriority::High);
                assert_eq!(j.spec.project_id, "proj-9");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_idempotency_keys_distinguish_job_types() {
        let render = RenderVideoJob::new("u", spec());
        let narration = SynthesizeNarrationJob::new("u", "proj-9", Vec::new());
        assert_ne!(render.idempotency_key(), narration.idempotency_key());
    }

    #[test]
    fn test_narration_job_spec_carries_segments() {
        let narration = vec![NarrationSegment {
            scene_id: "s1".into(),
            text: "Olá".into(),
            voice: "pt-BR-Neural2-A".into(),
            language: "pt-BR".into(),
            speaking_rate: 1.0,
            pitch: 0.0,
        }];
        let job = SynthesizeNarrationJob::new("u", "p", narration);
        let spec = job.to_spec();
        assert_eq!(spec.narration.len(), 1);
        assert!(spec.scenes.is_empty());
    }
}
