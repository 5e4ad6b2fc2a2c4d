//! Shared pipeline control handle.
//!
//! A [`PipelineController`] is the single point of coordination between the
//! stage loop and external actors. The UI side calls `pause`/`resume`/
//! `cancel`; the stage loop calls [`PipelineController::checkpoint`] between
//! units of work and unwinds when it returns `false`.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::state::PipelineState;

/// Default interval at which a paused checkpoint re-reads the shared state.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct ControlState {
    state: PipelineState,
    paused_at: Option<Instant>,
    paused_total: Duration,
}

#[derive(Debug)]
struct ControllerInner {
    control: Mutex<ControlState>,
    cancel_tx: watch::Sender<bool>,
    poll_interval: Duration,
}

/// Cheaply cloneable control handle for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineController {
    inner: Arc<ControllerInner>,
}

impl Default for PipelineController {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineController {
    /// Create a controller in the `Idle` state.
    pub fn new() -> Self {
        Self::with_poll_interval(DEFAULT_POLL_INTERVAL)
    }

    /// Create a controller with a custom paused-poll interval.
    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(ControllerInner {
                control: Mutex::new(ControlState {
                    state: PipelineState::Idle,
                    paused_at: None,
                    paused_total: Duration::ZERO,
                }),
                cancel_tx,
                poll_interval,
            }),
        }
    }

    /// Current state snapshot.
    pub fn state(&self) -> PipelineState {
        self.lock().state
    }

    /// Cumulative time spent paused, including an in-progress pause.
    pub fn paused_duration(&self) -> Duration {
        let guard = self.lock();
        match guard.paused_at {
            Some(at) => guard.paused_total + at.elapsed(),
            None => guard.paused_total,
        }
    }

    /// Receiver that flips to `true` when the pipeline is cancelled.
    ///
    /// Stages hand this to subprocess runners so an in-flight FFmpeg can be
    /// killed instead of running to completion after a cancel.
    pub fn cancel_signal(&self) -> watch::Receiver<bool> {
        self.inner.cancel_tx.subscribe()
    }

    /// Request a pause. Only acts in `Running`; returns whether the state
    /// changed.
    pub fn pause(&self) -> bool {
        let mut guard = self.lock();
        if guard.state != PipelineState::Running {
            return false;
        }
        guard.state = PipelineState::Paused;
        guard.paused_at = Some(Instant::now());
        info!("Pipeline paused");
        true
    }

    /// Request a resume. Only acts in `Paused`; returns whether the state
    /// changed.
    pub fn resume(&self) -> bool {
        let mut guard = self.lock();
        if guard.state != PipelineState::Paused {
            return false;
        }
        if let Some(at) = guard.paused_at.take() {
            guard.paused_total += at.elapsed();
        }
        guard.state = PipelineState::Running;
        info!(paused_total_ms = guard.paused_total.as_millis() as u64, "Pipeline resumed");
        true
    }

    /// Request a cancel. Acts in `Running` or `Paused` (no resume needed
    /// first); returns whether the state changed.
    pub fn cancel(&self) -> bool {
        let mut guard = self.lock();
        if !guard.state.accepts_control() {
            return false;
        }
        // A pause in progress still counts toward paused time.
        if let Some(at) = guard.paused_at.take() {
            guard.paused_total += at.elapsed();
        }
        guard.state = PipelineState::Cancelled;
        drop(guard);
        let _ = self.inner.cancel_tx.send(true);
        warn!("Pipeline cancelled");
        true
    }

    /// Cooperative checkpoint, called by stages between units of work.
    ///
    /// - `Running` (or `Idle`, before the loop starts): `true` immediately.
    /// - `Cancelled`, `Completed`, `Failed`: `false` immediately.
    /// - `Paused`: polls the shared state at a fixed interval until it
    ///   becomes `Running` (`true`) or `Cancelled` (`false`). The state is
    ///   re-read on every tick so control calls made while suspended are
    ///   always observed.
    pub async fn checkpoint(&self) -> bool {
        loop {
            match self.state() {
                PipelineState::Running | PipelineState::Idle => return true,
                PipelineState::Cancelled
                | PipelineState::Completed
                | PipelineState::Failed => return false,
                PipelineState::Paused => {
                    tokio::time::sleep(self.inner.poll_interval).await;
                }
            }
        }
    }

    /// Transition `Idle` → `Running`. Called once by the pipeline executor.
    pub(crate) fn begin(&self) -> PipelineResult<()> {
        let mut guard = self.lock();
        if guard.state != PipelineState::Idle {
            return Err(PipelineError::InvalidStart(guard.state));
        }
        guard.state = PipelineState::Running;
        Ok(())
    }

    /// Mark the run finished. Preserves `Cancelled` if a cancel won the race.
    pub(crate) fn finish(&self, outcome: PipelineState) {
        debug_assert!(matches!(
            outcome,
            PipelineState::Completed | PipelineState::Failed
        ));
        let mut guard = self.lock();
        if guard.state.accepts_control() {
            if let Some(at) = guard.paused_at.take() {
                guard.paused_total += at.elapsed();
            }
            guard.state = outcome;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ControlState> {
        // Control state is plain data; a poisoned lock here means a panic
        // mid-assignment, which cannot leave it inconsistent.
        self.inner
            .control
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
