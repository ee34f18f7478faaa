//! Debounced save slot
//!
//! Holds at most one live delayed write per instance. Every scheduled write
//! carries a generation number; scheduling or cancelling bumps the
//! generation, and a timer that wakes up with an outdated number writes
//! nothing. Writes run under `gate`, so once `cancel` returns no earlier
//! write can still land in storage.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stepwise_core::FlowInstanceState;
use stepwise_store::Persister;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::instance::ErrorReporter;

pub(crate) struct DebouncedSave {
    window: Duration,
    generation: Arc<AtomicU64>,
    gate: Arc<tokio::sync::Mutex<()>>,
    slot: Mutex<Option<JoinHandle<()>>>,
}

impl DebouncedSave {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            generation: Arc::new(AtomicU64::new(0)),
            gate: Arc::new(tokio::sync::Mutex::new(())),
            slot: Mutex::new(None),
        }
    }

    /// Write `state` once the window elapses, superseding any pending write
    pub(crate) fn schedule(
        &self,
        persister: Persister,
        state: FlowInstanceState,
        reporter: ErrorReporter,
    ) {
        let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let generation = self.generation.clone();
        let gate = self.gate.clone();
        let window = self.window;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let _guard = gate.lock().await;
            if generation.load(Ordering::SeqCst) != ticket {
                return;
            }
            if let Err(e) = persister.save_state(&state).await {
                reporter.report(&e);
            }
        });

        if let Some(previous) = self.slot.lock().replace(handle) {
            if !previous.is_finished() {
                debug!("Superseding pending debounced save");
            }
        }
    }

    /// Cancel the pending write and wait out any write already in progress.
    /// Returns `true` if a write had not completed yet.
    pub(crate) async fn cancel(&self) -> bool {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let pending = match self.slot.lock().take() {
            Some(handle) => !handle.is_finished(),
            None => false,
        };
        if pending {
            drop(self.gate.lock().await);
        }
        pending
    }
}
