//! Lip-sync timing stage.
//!
//! Derives a viseme keyframe track for the avatar renderer from each
//! narration segment's text and its measured audio duration. The mouth
//! shapes follow the vowel sequence at an even syllable rate; the avatar
//! compositor downstream interpolates between keyframes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use estudio_media::probe_media;
use estudio_models::RenderStage;
use estudio_pipeline::{Stage, StageContext, StageError, StageResult};

use crate::stages::{map_media_err, segment_audio_path, VISEME_FILE};

/// Mouth shape for one keyframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Viseme {
    /// Mouth at rest
    Rest,
    /// Open mouth (a-type vowels)
    Open,
    /// Wide mouth (e/i-type vowels)
    Wide,
    /// Rounded mouth (o/u-type vowels)
    Round,
    /// Closed mouth between syllables
    Closed,
}

/// One keyframe on the viseme timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisemeKeyframe {
    /// Offset into the segment, in seconds
    pub at_secs: f64,
    pub viseme: Viseme,
}

/// Viseme timeline for one narration segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentVisemes {
    pub scene_id: String,
    pub duration_secs: f64,
    pub keyframes: Vec<VisemeKeyframe>,
}

/// The full viseme track for a render.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisemeTrack {
    pub segments: Vec<SegmentVisemes>,
}

/// Portuguese-aware vowel classification.
fn viseme_for_vowel(c: char) -> Option<Viseme> {
    // to_ascii_lowercase misses accented vowels; take the full lowercase.
    let c = c.to_lowercase().next().unwrap_or(c);
    match c {
        'a' | 'á' | 'â' | 'ã' | 'à' => Some(Viseme::Open),
        'e' | 'é' | 'ê' | 'i' | 'í' => Some(Viseme::Wide),
        'o' | 'ó' | 'ô' | 'õ' | 'u' | 'ú' => Some(Viseme::Round),
        _ => None,
    }
}

/// Build the keyframe sequence for a segment.
///
/// Vowel groups approximate syllables; each gets a keyframe at an even
/// rate across the audio duration, with a closing shape between syllables
/// and a rest at the end.
pub fn keyframes_for(text: &str, duration_secs: f64) -> Vec<VisemeKeyframe> {
    // Collapse consecutive vowels (diphthongs) into one syllable nucleus.
    let mut nuclei = Vec::new();
    let mut in_vowel_group = false;
    for c in text.chars() {
        match viseme_for_vowel(c) {
            Some(viseme) => {
                if !in_vowel_group {
                    nuclei.push(viseme);
                    in_vowel_group = true;
                }
            }
            None => in_vowel_group = false,
        }
    }

    if nuclei.is_empty() || duration_secs <= 0.0 {
        return vec![VisemeKeyframe {
            at_secs: 0.0,
            viseme: Viseme::Rest,
        }];
    }

    let syllable = duration_secs / nuclei.len() as f64;
    let mut keyframes = Vec::with_capacity(nuclei.len() * 2 + 1);

    for (i, viseme) in nuclei.iter().enumerate() {
        let at = i as f64 * syllable;
        keyframes.push(VisemeKeyframe {
            at_secs: at,
            viseme: *viseme,
        });
        keyframes.push(VisemeKeyframe {
            at_secs: at + syllable * 0.7,
            viseme: Viseme::Closed,
        });
    }

    keyframes.push(VisemeKeyframe {
        at_secs: duration_secs,
        viseme: Viseme::Rest,
    });

    keyframes
}

/// Computes the viseme track from the synthesized narration.
pub struct LipSyncStage;

#[async_trait]
impl Stage for LipSyncStage {
    fn stage(&self) -> RenderStage {
        RenderStage::LipSync
    }

    async fn run(&self, ctx: &StageContext) -> StageResult<()> {
        let segments = &ctx.spec().narration;
        if segments.is_empty() {
            return Ok(());
        }

        let total = segments.len();
        let mut track = VisemeTrack {
            segments: Vec::with_capacity(total),
        };

        for (index, segment) in segments.iter().enumerate() {
            if !ctx.checkpoint().await {
                return Err(StageError::Cancelled);
            }

            let audio_path = segment_audio_path(ctx.work_dir(), index);
            let info = probe_media(&audio_path).await.map_err(map_media_err)?;

            track.segments.push(SegmentVisemes {
                scene_id: segment.scene_id.clone(),
                duration_secs: info.duration,
                keyframes: keyframes_for(&segment.text, info.duration),
            });

            ctx.report((index + 1) as f64 / total as f64);
        }

        let path = ctx.work_dir().join(VISEME_FILE);
        let json = serde_json::to_vec_pretty(&track)
            .map_err(|e| StageError::fatal(format!("viseme serialization: {e}")))?;
        tokio::fs::write(&path, json).await?;

        info!(segments = total, "Viseme track written");
        Ok(())
    }
}
