//! ETA estimation from completed-stage timings.

use std::time::Duration;

/// Default per-stage estimate used before any stage has completed.
pub const DEFAULT_STAGE_ESTIMATE: Duration = Duration::from_secs(30);

/// Rough estimate of time remaining for a render.
///
/// The estimate is
/// `(1 - overall_progress) * avg_completed_stage_secs * remaining_stages`,
/// where the average falls back to a configured default while no stage has
/// completed yet. Recorded durations are expected to be net of paused time.
///
/// This is a UI hint, never a contract duration.
#[derive(Debug, Clone)]
pub struct EtaEstimator {
    default_stage_estimate: Duration,
    completed: Vec<Duration>,
}

impl Default for EtaEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_STAGE_ESTIMATE)
    }
}

impl EtaEstimator {
    /// Create an estimator with the given default per-stage estimate.
    pub fn new(default_stage_estimate: Duration) -> Self {
        Self {
            default_stage_estimate,
            completed: Vec::new(),
        }
    }

    /// Record a completed stage's duration (net of paused time).
    pub fn record(&mut self, duration: Duration) {
        self.completed.push(duration);
    }

    /// Number of stages recorded so far.
    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    /// Arithmetic mean of completed stage durations in seconds, or the
    /// default estimate with zero completed stages.
    pub fn average_stage_secs(&self) -> f64 {
        if self.completed.is_empty() {
            return self.default_stage_estimate.as_secs_f64();
        }
        let total: f64 = self.completed.iter().map(|d| d.as_secs_f64()).sum();
        total / self.completed.len() as f64
    }

    /// Estimate time remaining.
    ///
    /// `overall_progress` is the overall fraction complete in `[0, 1]`
    /// (out-of-range and non-finite inputs are clamped), `remaining_stages`
    /// the number of stages not yet completed. The result is always finite
    /// and non-negative.
    pub fn estimate(&self, overall_progress: f64, remaining_stages: usize) -> Duration {
        let progress = if overall_progress.is_finite() {
            overall_progress.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let secs = (1.0 - progress) * self.average_stage_secs() * remaining_stages as f64;
        Duration::from_secs_f64(secs.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_with_no_completed_stages() {
        let eta = EtaEstimator::new(Duration::from_secs(10));
        // 0 progress, 5 stages remaining: 10s * 5
        assert_eq!(eta.estimate(0.0, 5), Duration::from_secs(50));
    }

    #[test]
    fn test_average_of_completed_stages() {
        let mut eta = EtaEstimator::new(Duration::from_secs(10));
        eta.record(Duration::from_secs(4));
        eta.record(Duration::from_secs(8));
        assert!((eta.average_stage_secs() - 6.0).abs() < f64::EPSILON);

        // half done, 2 stages remaining: 0.5 * 6 * 2 = 6s
        assert_eq!(eta.estimate(0.5, 2), Duration::from_secs(6));
    }

    #[test]
    fn test_estimate_is_finite_and_nonnegative() {
        let mut eta = EtaEstimator::default();
        eta.record(Duration::from_secs(3));

        for progress in [-1.0, 0.0, 0.25, 0.999, 1.0, 2.0, f64::NAN, f64::INFINITY] {
            for remaining in [0usize, 1, 5, 100] {
                let d = eta.estimate(progress, remaining);
                let secs = d.as_secs_f64();
                assert!(secs.is_finite(), "progress={progress} remaining={remaining}");
                assert!(secs >= 0.0);
            }
        }
    }

    #[test]
    fn test_zero_remaining_stages_is_zero() {
        let eta = EtaEstimator::default();
        assert_eq!(eta.estimate(0.9, 0), Duration::ZERO);
    }

    #[test]
    fn test_full_progress_is_zero() {
        let mut eta = EtaEstimator::default();
        eta.record(Duration::from_secs(60));
        assert_eq!(eta.estimate(1.0, 3), Duration::ZERO);
    }
}
