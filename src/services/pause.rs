//! Cooperative pause/resume/stop controller.
//!
//! State lives in a `watch` channel; waiters park on `changed()` inside a
//! `select!` against the caller's cancellation token, so no helper task
//! is ever spawned and none can leak.

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::{OrchestratorError, OrchestratorResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PauseState {
    paused: bool,
    stopped: bool,
}

/// Shared pause/stop switch for the run loop and its workers.
#[derive(Debug)]
pub struct PauseController {
    tx: watch::Sender<PauseState>,
}

impl PauseController {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(PauseState::default());
        Self { tx }
    }

    /// Pause new work. Idempotent.
    pub fn pause(&self) {
        self.tx.send_if_modified(|state| {
            if state.paused || state.stopped {
                false
            } else {
                state.paused = true;
                true
            }
        });
    }

    /// Resume paused work. Idempotent.
    pub fn resume(&self) {
        self.tx.send_if_modified(|state| {
            if state.paused {
                state.paused = false;
                true
            } else {
                false
            }
        });
    }

    /// Stop permanently. Irreversible; wakes all waiters.
    pub fn stop(&self) {
        self.tx.send_if_modified(|state| {
            if state.stopped {
                false
            } else {
                state.stopped = true;
                true
            }
        });
    }

    pub fn is_paused(&self) -> bool {
        self.tx.borrow().paused
    }

    pub fn is_stopped(&self) -> bool {
        self.tx.borrow().stopped
    }

    /// Block while paused.
    ///
    /// Returns `Ok(())` immediately when not paused, after resume
    /// otherwise. Returns [`OrchestratorError::Stopped`] once stopped and
    /// [`OrchestratorError::Canceled`] when the token fires first.
    pub async fn wait_if_paused(&self, token: &CancellationToken) -> OrchestratorResult<()> {
        let mut rx = self.tx.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            if state.stopped {
                return Err(OrchestratorError::Stopped);
            }
            if !state.paused {
                return Ok(());
            }
            tokio::select! {
                () = token.cancelled() => return Err(OrchestratorError::Canceled),
                changed = rx.changed() => {
                    if changed.is_err() {
                        // Controller dropped while paused; treat as stop.
                        return Err(OrchestratorError::Stopped);
                    }
                }
            }
        }
    }
}

impl Default for PauseController {
    fn default() -> Self {
        Self::new()
    }
}
