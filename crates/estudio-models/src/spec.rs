//! Render specifications.
//!
//! A [`RenderSpec`] describes everything the worker needs to produce a
//! training video: the slide scenes, the narration script, optional avatar
//! settings, and the output encoding parameters.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Full specification of a render.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RenderSpec {
    /// Project this render belongs to
    pub project_id: String,
    /// Slide scenes in presentation order
    pub scenes: Vec<SceneSpec>,
    /// Narration script, one segment per narrated scene
    #[serde(default)]
    pub narration: Vec<NarrationSegment>,
    /// Avatar presenter settings (None for slide-only renders)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<AvatarSettings>,
    /// Output encoding settings
    #[serde(default)]
    pub output: OutputSettings,
}

impl RenderSpec {
    /// Create a spec with the given scenes and default output settings.
    pub fn new(project_id: impl Into<String>, scenes: Vec<SceneSpec>) -> Self {
        Self {
            project_id: project_id.into(),
            scenes,
            narration: Vec::new(),
            avatar: None,
            output: OutputSettings::default(),
        }
    }

    /// Set the narration script.
    pub fn with_narration(mut self, narration: Vec<NarrationSegment>) -> Self {
        self.narration = narration;
        self
    }

    /// Set avatar settings.
    pub fn with_avatar(mut self, avatar: AvatarSettings) -> Self {
        self.avatar = Some(avatar);
        self
    }

    /// Set output settings.
    pub fn with_output(mut self, output: OutputSettings) -> Self {
        self.output = output;
        self
    }

    /// Total presentation duration in seconds.
    pub fn total_duration_secs(&self) -> f64 {
        self.scenes.iter().map(|s| s.duration_secs).sum()
    }

    /// Narration segment for a scene, if any.
    pub fn narration_for_scene(&self, scene_id: &str) -> Option<&NarrationSegment> {
        self.narration.iter().find(|n| n.scene_id == scene_id)
    }
}

/// One slide scene.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SceneSpec {
    /// Scene identifier (unique within the spec)
    pub id: String,
    /// Slide image location (URL or worker-local path)
    pub image: String,
    /// Slide title
    #[serde(default)]
    pub title: String,
    /// On-screen duration in seconds
    pub duration_secs: f64,
    /// Transition into the next scene
    #[serde(default)]
    pub transition: Transition,
    /// Transition duration in seconds
    #[serde(default = "default_transition_duration")]
    pub transition_duration_secs: f64,
}

fn default_transition_duration() -> f64 {
    0.5
}

/// Scene transition style.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    #[default]
    Fade,
    Cut,
    SlideLeft,
    SlideRight,
}

/// One segment of the narration script.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NarrationSegment {
    /// Scene this segment narrates
    pub scene_id: String,
    /// Text to synthesize
    pub text: String,
    /// Voice name
    #[serde(default = "default_voice")]
    pub voice: String,
    /// BCP-47 language tag
    #[serde(default = "default_language")]
    pub language: String,
    /// Speaking rate multiplier
    #[serde(default = "default_speaking_rate")]
    pub speaking_rate: f64,
    /// Pitch adjustment in semitones
    #[serde(default)]
    pub pitch: f64,
}

fn default_voice() -> String {
    "pt-BR-Neural2-A".to_string()
}

fn default_language() -> String {
    "pt-BR".to_string()
}

fn default_speaking_rate() -> f64 {
    1.0
}

/// Avatar presenter settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AvatarSettings {
    /// Avatar identifier
    pub avatar_id: String,
    /// Background preset
    #[serde(default = "default_background")]
    pub background: String,
    /// Corner of the frame the avatar occupies
    #[serde(default)]
    pub placement: AvatarPlacement,
}

fn default_background() -> String {
    "office".to_string()
}

/// Where the avatar overlay sits in the frame.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum AvatarPlacement {
    #[default]
    BottomRight,
    BottomLeft,
    TopRight,
    TopLeft,
}

/// Output encoding settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OutputSettings {
    /// Target resolution
    #[serde(default)]
    pub resolution: Resolution,
    /// Frames per second
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Container format
    #[serde(default)]
    pub format: ContainerFormat,
    /// Quality preset
    #[serde(default)]
    pub quality: Quality,
}

fn default_fps() -> u32 {
    30
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            fps: default_fps(),
            format: ContainerFormat::default(),
            quality: Quality::default(),
        }
    }
}

/// Target resolution.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Hd720,
    #[default]
    FullHd1080,
    Uhd4k,
}

impl Resolution {
    /// Frame dimensions as (width, height).
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Resolution::Hd720 => (1280, 720),
            Resolution::FullHd1080 => (1920, 1080),
            Resolution::Uhd4k => (3840, 2160),
        }
    }
}

/// Quality preset. Maps to the video bitrate used for encoding.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Draft,
    Standard,
    #[default]
    High,
    Ultra,
}

impl Quality {
    /// Video bitrate for this preset.
    pub fn video_bitrate(&self) -> &'static str {
        match self {
            Quality::Draft => "1500k",
            Quality::Standard => "3000k",
            Quality::High => "5000k",
            Quality::Ultra => "8000k",
        }
    }

    /// Audio bitrate (AAC) for all presets.
    pub fn audio_bitrate(&self) -> &'static str {
        "192k"
    }
}

/// Container format.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum ContainerFormat {
    #[default]
    Mp4,
    Webm,
}

impl ContainerFormat {
    /// File extension without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::Webm => "webm",
        }
    }

    /// Video codec for the container.
    pub fn video_codec(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "libx264",
            ContainerFormat::Webm => "libvpx-vp9",
        }
    }

    /// Audio codec for the container.
    pub fn audio_codec(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "aac",
            ContainerFormat::Webm => "libopus",
        }
    }
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_spec() -> RenderSpec {
        RenderSpec::new(
            "proj-1",
            vec![
                SceneSpec {
                    id: "s1".into(),
                    image: "slides/s1.png".into(),
                    title: "Introdução".into(),
                    duration_secs: 5.0,
                    transition: Transition::Fade,
                    transition_duration_secs: 0.5,
                },
                SceneSpec {
                    id: "s2".into(),
                    image: "slides/s2.png".into(),
                    title: "NR-12".into(),
                    duration_secs: 8.0,
                    transition: Transition::Cut,
                    transition_duration_secs: 0.0,
                },
            ],
        )
        .with_narration(vec![NarrationSegment {
            scene_id: "s1".into(),
            text: "Bem-vindo ao treinamento.".into(),
            voice: default_voice(),
            language: default_language(),
            speaking_rate: 1.0,
            pitch: 0.0,
        }])
    }

    #[test]
    fn test_total_duration() {
        let spec = sample_spec();
        assert!((spec.total_duration_secs() - 13.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_narration_lookup() {
        let spec = sample_spec();
        assert!(spec.narration_for_scene("s1").is_some());
        assert!(spec.narration_for_scene("s2").is_none());
    }

    #[test]
    fn test_resolution_dimensions() {
        assert_eq!(Resolution::Hd720.dimensions(), (1280, 720));
        assert_eq!(Resolution::FullHd1080.dimensions(), (1920, 1080));
        assert_eq!(Resolution::Uhd4k.dimensions(), (3840, 2160));
    }

    #[test]
    fn test_quality_bitrates() {
        assert_eq!(Quality::Ultra.video_bitrate(), "8000k");
        assert_eq!(Quality::High.video_bitrate(), "5000k");
        assert_eq!(Quality::Standard.video_bitrate(), "3000k");
    }

    #[test]
    fn test_spec_serde_defaults() {
        let json = r#"{
            "project_id": "p",
            "scenes": [{"id": "a", "image": "a.png", "duration_secs": 3.0}]
        }"#;
        let spec: RenderSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.output.fps, 30);
        assert_eq!(spec.output.resolution, Resolution::FullHd1080);
        assert_eq!(spec.scenes[0].transition, Transition::Fade);
        assert!(spec.narration.is_empty());
    }
}
