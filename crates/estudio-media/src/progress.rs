//! FFmpeg progress parsing.

use serde::{Deserialize, Serialize};

/// Progress information parsed from FFmpeg's `-progress` output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncodeProgress {
    /// Current frame number
    pub frame: u64,
    /// Current FPS
    pub fps: f64,
    /// Output time in milliseconds
    pub out_time_ms: i64,
    /// Encoding speed (e.g., 1.5 = 1.5x realtime)
    pub speed: f64,
    /// Whether encoding is complete
    pub is_complete: bool,
}

impl EncodeProgress {
    /// Feed one `key=value` line from `-progress` output.
    ///
    /// Returns a snapshot when a full progress block has been read (the
    /// `progress=` line terminates a block).
    pub fn apply_line(&mut self, line: &str) -> Option<EncodeProgress> {
        let line = line.trim();
        let (key, value) = line.split_once('=')?;

        match key {
            "out_time_us" => {
                if let Ok(us) = value.parse::<i64>() {
                    self.out_time_ms = us / 1000;
                }
            }
            "out_time_ms" => {
                // Despite the name, ffmpeg emits microseconds here.
                if let Ok(us) = value.parse::<i64>() {
                    self.out_time_ms = us / 1000;
                }
            }
            "frame" => {
                if let Ok(frame) = value.parse() {
                    self.frame = frame;
                }
            }
            "fps" => {
                if let Ok(fps) = value.parse() {
                    self.fps = fps;
                }
            }
            "speed" => {
                if value != "N/A" {
                    if let Some(speed_str) = value.strip_suffix('x') {
                        if let Ok(speed) = speed_str.parse() {
                            self.speed = speed;
                        }
                    }
                }
            }
            "progress" => {
                if value == "end" {
                    self.is_complete = true;
                }
                return Some(self.clone());
            }
            _ => {}
        }

        None
    }

    /// Progress percentage given the total duration in milliseconds.
    pub fn percentage(&self, total_duration_ms: i64) -> f64 {
        if total_duration_ms <= 0 {
            return 0.0;
        }
        ((self.out_time_ms as f64 / total_duration_ms as f64) * 100.0).min(100.0)
    }

    /// Fraction complete in `[0, 1]`.
    pub fn fraction(&self, total_duration_ms: i64) -> f64 {
        self.percentage(total_duration_ms) / 100.0
    }

    /// Estimate time remaining in seconds from the encoding speed.
    pub fn eta_seconds(&self, total_duration_ms: i64) -> Option<f64> {
        if self.speed <= 0.0 || self.out_time_ms <= 0 {
            return None;
        }

        let remaining_ms = total_duration_ms - self.out_time_ms;
        if remaining_ms <= 0 {
            return Some(0.0);
        }

        Some((remaining_ms as f64 / 1000.0) / self.speed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_parsing() {
        let mut progress = EncodeProgress::default();

        assert!(progress.apply_line("frame=120").is_none());
        assert!(progress.apply_line("fps=30.5").is_none());
        assert!(progress.apply_line("out_time_us=5000000").is_none());
        assert!(progress.apply_line("speed=1.5x").is_none());

        let snapshot = progress.apply_line("progress=continue").unwrap();
        assert_eq!(snapshot.frame, 120);
        assert_eq!(snapshot.out_time_ms, 5000);
        assert!((snapshot.speed - 1.5).abs() < 0.01);
        assert!(!snapshot.is_complete);

        let end = progress.apply_line("progress=end").unwrap();
        assert!(end.is_complete);
    }

    #[test]
    fn test_speed_na_is_ignored() {
        let mut progress = EncodeProgress::default();
        progress.apply_line("speed=N/A");
        assert_eq!(progress.speed, 0.0);
    }

    #[test]
    fn test_eta_from_speed() {
        let progress = EncodeProgress {
            out_time_ms: 5000,
            speed: 2.0, // 2x realtime
            ..Default::default()
        };

        // 5 seconds remaining at 2x speed = 2.5 seconds
        let eta = progress.eta_seconds(10000).unwrap();
        assert!((eta - 2.5).abs() < 0.01);

        // Unknown speed yields no estimate
        let unknown = EncodeProgress {
            out_time_ms: 5000,
            ..Default::default()
        };
        assert!(unknown.eta_seconds(10000).is_none());
    }

    #[test]
    fn test_percentage() {
        let progress = EncodeProgress {
            out_time_ms: 5000,
            ..Default::default()
        };

        assert!((progress.percentage(10000) - 50.0).abs() < 0.01);
        assert!((progress.percentage(5000) - 100.0).abs() < 0.01);
        assert_eq!(progress.percentage(0), 0.0);
    }
}
