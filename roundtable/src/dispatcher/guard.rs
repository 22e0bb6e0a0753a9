//! RAII load reservation.

use std::sync::{Arc, Mutex};

use super::{lock_state, DispatchState};
use crate::registry::Epoch;
use crate::types::WorkerId;

/// One reserved concurrency slot on a worker.
///
/// The slot is released exactly once: explicitly through
/// [`LoadGuard::release_locked`] or otherwise on drop, which covers
/// errors, timeouts, panics and cancelled futures alike.
pub struct LoadGuard {
    state: Arc<Mutex<DispatchState>>,
    worker_id: WorkerId,
    epoch: Epoch,
    armed: bool,
}

impl LoadGuard {
    pub(super) fn new(state: Arc<Mutex<DispatchState>>, worker_id: WorkerId, epoch: Epoch) -> Self {
        Self {
            state,
            worker_id,
            epoch,
            armed: true,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Release while the caller already holds the state lock.
    pub(super) fn release_locked(mut self, state: &mut DispatchState) {
        state.registry.release(&self.worker_id, self.epoch);
        self.armed = false;
    }
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        if self.armed {
            lock_state(&self.state)
                .registry
                .release(&self.worker_id, self.epoch);
        }
    }
}
