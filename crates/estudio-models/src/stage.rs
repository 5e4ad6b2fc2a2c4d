//! Render pipeline stages.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One discrete phase of the render pipeline.
///
/// A full video render runs all five stages in order; narration-only jobs
/// run a subset.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum RenderStage {
    /// Synthesize the narration audio track
    AudioSynthesis,
    /// Derive the viseme timing track for the avatar
    LipSync,
    /// Compose scene segments (slides, avatar overlay, narration spans)
    Composition,
    /// Encode segments to the target codec and concatenate
    Encoding,
    /// Deliver the final artifact
    Upload,
}

impl RenderStage {
    /// All stages of a full render, in execution order.
    pub const ALL: [RenderStage; 5] = [
        RenderStage::AudioSynthesis,
        RenderStage::LipSync,
        RenderStage::Composition,
        RenderStage::Encoding,
        RenderStage::Upload,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RenderStage::AudioSynthesis => "audio_synthesis",
            RenderStage::LipSync => "lip_sync",
            RenderStage::Composition => "composition",
            RenderStage::Encoding => "encoding",
            RenderStage::Upload => "upload",
        }
    }
}

impl fmt::Display for RenderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        assert_eq!(RenderStage::ALL[0], RenderStage::AudioSynthesis);
        assert_eq!(RenderStage::ALL[4], RenderStage::Upload);
    }

    #[test]
    fn test_stage_serde_tag() {
        let json = serde_json::to_string(&RenderStage::LipSync).unwrap();
        assert_eq!(json, "\"lip_sync\"");
    }
}
