//! Lossy bounded event emitter.
//!
//! Emission is non-blocking: when the channel is full the event is
//! dropped and a monotonic counter incremented. Producers are never
//! allowed to stall on observability.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use crate::domain::models::OrchestratorEvent;

/// Minimum channel capacity regardless of configuration.
pub const MIN_EVENT_CAPACITY: usize = 1000;

/// Bounded, non-blocking event channel with a drop counter.
pub struct EventEmitter {
    tx: mpsc::Sender<OrchestratorEvent>,
    rx: Mutex<Option<mpsc::Receiver<OrchestratorEvent>>>,
    dropped: AtomicU64,
}

impl EventEmitter {
    /// Create an emitter with the given capacity (clamped to at least
    /// [`MIN_EVENT_CAPACITY`]).
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(MIN_EVENT_CAPACITY));
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            dropped: AtomicU64::new(0),
        }
    }

    /// Emit an event without blocking. Full channel drops the event and
    /// bumps the counter; a closed channel (consumer gone) counts the
    /// same way.
    pub fn emit(&self, event: OrchestratorEvent) {
        if let Err(err) = self.tx.try_send(event) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!(error = %err, "event dropped");
        }
    }

    /// Take the consumer side. Yields `Some` exactly once.
    pub fn take_receiver(&self) -> Option<mpsc::Receiver<OrchestratorEvent>> {
        self.rx.lock().expect("emitter receiver lock poisoned").take()
    }

    /// Number of events dropped so far.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(MIN_EVENT_CAPACITY)
    }
}
