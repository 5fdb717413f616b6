use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::warn;

use super::{Job, PoolError, Priority};

struct QueuedJob {
    priority: Priority,
    seq: u64,
    job: Job,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    // Max-heap: higher priority first, then the earlier submission.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueState {
    heap: BinaryHeap<QueuedJob>,
    next_seq: u64,
    closed: bool,
}

/// Bounded priority queue shared by the pool's workers.
pub(crate) struct JobQueue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl JobQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::with_capacity(capacity),
                next_seq: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn len(&self) -> usize {
        self.lock_state().heap.len()
    }

    /// Enqueue a job. With `block` the caller waits for space; otherwise a
    /// full queue is reported as [`PoolError::Full`].
    pub(crate) fn push(&self, priority: Priority, job: Job, block: bool) -> Result<(), PoolError> {
        let mut state = self.lock_state();
        let mut last_full_log = Instant::now() - Duration::from_secs(1);
        loop {
            if state.closed {
                return Err(PoolError::ShutDown);
            }
            if state.heap.len() < self.capacity {
                break;
            }
            if !block {
                return Err(PoolError::Full);
            }
            if last_full_log.elapsed() >= Duration::from_secs(1) {
                warn!(
                    depth = state.heap.len(),
                    capacity = self.capacity,
                    "Worker queue full; submitter waiting"
                );
                last_full_log = Instant::now();
            }
            state = self.wait(&self.not_full, state);
        }
        let seq = state.next_seq;
        state.next_seq = state.next_seq.wrapping_add(1);
        state.heap.push(QueuedJob { priority, seq, job });
        self.not_empty.notify_one();
        Ok(())
    }

    /// Next job, blocking while the queue is open and empty. Returns `None`
    /// once the queue is closed and drained.
    pub(crate) fn pop(&self) -> Option<Job> {
        let mut state = self.lock_state();
        loop {
            if let Some(queued) = state.heap.pop() {
                self.not_full.notify_one();
                return Some(queued.job);
            }
            if state.closed {
                return None;
            }
            state = self.wait(&self.not_empty, state);
        }
    }

    /// Reject new jobs; queued jobs are still handed out.
    pub(crate) fn close(&self) {
        self.lock_state().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("Worker queue lock poisoned; recovering.");
            poisoned.into_inner()
        })
    }

    fn wait<'a>(
        &self,
        condvar: &Condvar,
        guard: MutexGuard<'a, QueueState>,
    ) -> MutexGuard<'a, QueueState> {
        condvar
            .wait_timeout(guard, Duration::from_millis(50))
            .map(|(guard, _)| guard)
            .unwrap_or_else(|poisoned| {
                warn!("Worker queue condvar poisoned; recovering.");
                poisoned.into_inner().0
            })
    }
}
