//! Wakeup signal raised whenever a claim is released or completed.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

struct ClaimWakeupState {
    counter: u64,
}

/// Condvar-backed wakeup used by callers waiting for a busy claim to clear.
pub struct ClaimWakeup {
    state: Mutex<ClaimWakeupState>,
    ready: Condvar,
}

impl Default for ClaimWakeup {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaimWakeup {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ClaimWakeupState { counter: 0 }),
            ready: Condvar::new(),
        }
    }

    /// Wake every waiter.
    pub fn notify(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.counter = state.counter.wrapping_add(1);
        self.ready.notify_all();
    }

    /// Current notification counter; pass it to [`ClaimWakeup::wait_for`].
    pub fn snapshot(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .counter
    }

    /// Wait until notified after `seen` or until the timeout elapses.
    /// Returns true when a notification was observed.
    pub fn wait_for(&self, seen: &mut u64, timeout: Duration) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.counter != *seen {
            *seen = state.counter;
            return true;
        }
        let (state, _timeout) = self
            .ready
            .wait_timeout(state, timeout)
            .unwrap_or_else(PoisonError::into_inner);
        if state.counter != *seen {
            *seen = state.counter;
            return true;
        }
        false
    }
}
