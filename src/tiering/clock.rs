use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use crate::storage::epoch_seconds;

/// Source of "now" for hotness decisions and claim timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;

    fn now_secs(&self) -> i64 {
        epoch_seconds(self.now())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<SystemTime>,
}

impl ManualClock {
    pub fn new(now: SystemTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: SystemTime) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A file is hot while `now - modified <= threshold`. Modification times in
/// the future count as hot.
pub fn is_hot(now: SystemTime, modified: SystemTime, threshold: Duration) -> bool {
    match now.duration_since(modified) {
        Ok(age) => age <= threshold,
        Err(_) => true,
    }
}
