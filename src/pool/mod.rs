//! Fixed-size worker pool with a bounded priority queue.
//!
//! The pool is owned by whoever builds it (normally the service) and shared
//! as `Arc<WorkerPool>`. Submitting blocks while the queue is full;
//! [`WorkerPool::try_submit`] is the non-blocking variant.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::WorkerSettings;

mod queue;

use queue::JobQueue;

const IDLE_POLL: Duration = Duration::from_millis(5);

/// Unit of work executed exactly once on one worker thread.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Scheduling class. Higher classes are dequeued first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    Normal,
    High,
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Worker queue is full")]
    Full,
    #[error("Worker pool is shut down")]
    ShutDown,
    #[error("Failed to spawn worker thread: {source}")]
    Spawn { source: std::io::Error },
}

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub workers: usize,
    pub queued: usize,
    pub running: usize,
    pub completed: u64,
    pub panicked: u64,
}

#[derive(Default)]
struct PoolCounters {
    /// Submitted and not yet finished.
    outstanding: AtomicUsize,
    running: AtomicUsize,
    completed: AtomicU64,
    panicked: AtomicU64,
}

pub struct WorkerPool {
    queue: Arc<JobQueue>,
    counters: Arc<PoolCounters>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl WorkerPool {
    /// Spawn `worker_count` workers (at least one) over a queue holding up to
    /// `queue_capacity` jobs.
    pub fn new(worker_count: usize, queue_capacity: usize) -> Result<Self, PoolError> {
        let worker_count = worker_count.max(1);
        let queue = Arc::new(JobQueue::new(queue_capacity));
        let counters = Arc::new(PoolCounters::default());
        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let queue_for_worker = Arc::clone(&queue);
            let counters_for_worker = Arc::clone(&counters);
            let spawned = std::thread::Builder::new()
                .name(format!("tierstore-worker-{index}"))
                .spawn(move || worker_loop(queue_for_worker, counters_for_worker));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(source) => {
                    queue.close();
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(PoolError::Spawn { source });
                }
            }
        }
        info!(
            workers = worker_count,
            capacity = queue.capacity(),
            "Worker pool started"
        );
        Ok(Self {
            queue,
            counters,
            workers: Mutex::new(workers),
            worker_count,
        })
    }

    pub fn from_settings(settings: &WorkerSettings) -> Result<Self, PoolError> {
        Self::new(settings.resolved_count(), settings.queue_capacity)
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Enqueue a job, waiting while the queue is full.
    pub fn submit<F>(&self, priority: Priority, job: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(priority, Box::new(job), true)
    }

    /// Enqueue a job or fail immediately with [`PoolError::Full`].
    pub fn try_submit<F>(&self, priority: Priority, job: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(priority, Box::new(job), false)
    }

    fn enqueue(&self, priority: Priority, job: Job, block: bool) -> Result<(), PoolError> {
        self.counters.outstanding.fetch_add(1, Ordering::SeqCst);
        let result = self.queue.push(priority, job, block);
        if result.is_err() {
            self.counters.outstanding.fetch_sub(1, Ordering::SeqCst);
        }
        result
    }

    /// Wait until every submitted job has finished. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.counters.outstanding.load(Ordering::SeqCst) > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(IDLE_POLL);
        }
        true
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.worker_count,
            queued: self.queue.len(),
            running: self.counters.running.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            panicked: self.counters.panicked.load(Ordering::SeqCst),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.queue.is_closed()
    }

    /// Stop accepting jobs, run everything already queued and join the
    /// workers. Later calls are no-ops.
    pub fn shutdown(&self) {
        self.queue.close();
        let handles = {
            let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *workers)
        };
        if handles.is_empty() {
            return;
        }
        let current = std::thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                warn!("Worker pool shutdown requested from a worker; not joining self");
                continue;
            }
            if handle.join().is_err() {
                error!("Worker thread exited abnormally");
            }
        }
        let stats = self.stats();
        info!(
            completed = stats.completed,
            panicked = stats.panicked,
            "Worker pool stopped"
        );
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(queue: Arc<JobQueue>, counters: Arc<PoolCounters>) {
    while let Some(job) = queue.pop() {
        counters.running.fetch_add(1, Ordering::SeqCst);
        let outcome = catch_unwind(AssertUnwindSafe(job));
        counters.running.fetch_sub(1, Ordering::SeqCst);
        match outcome {
            Ok(()) => {
                counters.completed.fetch_add(1, Ordering::SeqCst);
            }
            Err(payload) => {
                counters.panicked.fetch_add(1, Ordering::SeqCst);
                error!("{}", panic_to_string(payload));
            }
        }
        counters.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
    debug!("Worker exiting");
}

fn panic_to_string(payload: Box<dyn std::any::Any + Send>) -> String {
    let message = if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Unknown panic payload".to_string()
    };
    format!("Tiering job panicked: {message}")
}
