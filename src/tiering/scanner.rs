use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::clock::is_hot;
use super::demotion::run_demotion_job;
use super::recovery::{reconcile, run_recovery_job};
use super::{ReconcileStats, ScanError, ScanStats, TierContext};
use crate::layout::Layout;
use crate::metadata::{ClaimKind, ClaimOutcome, FileRecord};
use crate::pool::{Priority, WorkerPool};
use crate::storage::{EntryKind, is_temp_file_name};

const SLEEP_SLICE: Duration = Duration::from_millis(25);

/// Delay between scan passes: the base interval after a pass that found
/// work, doubling up to `max` while passes stay idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let base = base.max(Duration::from_millis(1));
        Self {
            base,
            max: max.max(base),
            current: base,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Delay to sleep after a pass.
    pub fn next(&mut self, found_work: bool) -> Duration {
        if found_work {
            self.current = self.base;
            return self.current;
        }
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }
}

/// Periodic classifier that claims cold files and queues their demotion.
#[derive(Clone)]
pub struct Scanner {
    ctx: TierContext,
    pool: Arc<WorkerPool>,
    layout: Layout,
    shutdown: Arc<AtomicBool>,
}

/// Running scanner thread.
pub struct ScannerHandle {
    shutdown: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl ScannerHandle {
    /// Ask the scanner to stop after the current pass.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn join(self) {
        if self.thread.join().is_err() {
            warn!("Scanner thread panicked");
        }
    }
}

impl Scanner {
    pub fn new(ctx: TierContext, pool: Arc<WorkerPool>, layout: Layout) -> Self {
        Self {
            ctx,
            pool,
            layout,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn spawn(self) -> Result<ScannerHandle, ScanError> {
        let shutdown = Arc::clone(&self.shutdown);
        let thread = std::thread::Builder::new()
            .name("tierstore-scanner".into())
            .spawn(move || self.run())
            .map_err(|source| ScanError::Spawn { source })?;
        Ok(ScannerHandle { shutdown, thread })
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    fn stopped(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Scanner thread body: wait for the raw root, reconcile once, then scan
    /// until stopped.
    pub fn run(&self) {
        if !self.wait_for_root() {
            return;
        }
        self.reconcile();
        let mut backoff = Backoff::new(
            self.ctx.settings.scan_interval(),
            self.ctx.settings.idle_backoff_max(),
        );
        while !self.stopped() {
            let found_work = match self.scan_pass() {
                Ok(stats) => {
                    if stats.found_work() {
                        info!(
                            files = stats.files_seen,
                            claimed = stats.claimed,
                            reclaimed = stats.reclaimed,
                            "Scan pass queued work"
                        );
                    } else {
                        debug!(files = stats.files_seen, "Scan pass found nothing to do");
                    }
                    stats.found_work()
                }
                Err(err) => {
                    warn!(error = %err, "Scan pass failed");
                    false
                }
            };
            self.sleep(backoff.next(found_work));
        }
        debug!("Scanner stopped");
    }

    /// Startup reconcile of every record, then a sweep of leftover temp files.
    pub fn reconcile(&self) -> ReconcileStats {
        let mut stats = reconcile(&self.ctx);
        stats.temp_removed = self.sweep_temp_files();
        stats
    }

    /// Delete temp files of atomic writes that never reached their rename.
    /// Files younger than the claim lease may belong to a write in flight and
    /// are left alone.
    pub fn sweep_temp_files(&self) -> usize {
        let lease = self.ctx.settings.claim_lease();
        let now = self.ctx.clock.now();
        let mut removed = 0;
        for root in [self.layout.raw_root(), self.layout.compressed_root()] {
            let owners = match self.ctx.storage.list_dir(root) {
                Ok(owners) => owners,
                Err(err) => {
                    debug!(root = %root.display(), error = %err, "Skipping temp sweep");
                    continue;
                }
            };
            for owner in owners.into_iter().filter(|entry| entry.kind == EntryKind::Dir) {
                let files = match self.ctx.storage.list_dir(&owner.path) {
                    Ok(files) => files,
                    Err(err) => {
                        warn!(dir = %owner.path.display(), error = %err, "Failed to list owner directory");
                        continue;
                    }
                };
                for file in files
                    .into_iter()
                    .filter(|entry| entry.kind == EntryKind::File && is_leftover_name(&entry.path))
                {
                    let Ok(stat) = self.ctx.storage.stat(&file.path) else {
                        continue;
                    };
                    if is_hot(now, stat.modified, lease) {
                        continue;
                    }
                    match self.ctx.storage.remove(&file.path) {
                        Ok(()) => {
                            removed += 1;
                            info!(path = %file.path.display(), "Removed leftover temp file");
                        }
                        Err(err) => {
                            warn!(path = %file.path.display(), error = %err, "Failed to remove temp file");
                        }
                    }
                }
            }
        }
        removed
    }

    /// One pass over every owner directory under the raw root.
    pub fn scan_pass(&self) -> Result<ScanStats, ScanError> {
        let root = self.layout.raw_root();
        let mut stats = ScanStats::default();
        let owners = self
            .ctx
            .storage
            .list_dir(root)
            .map_err(|source| ScanError::Io {
                path: root.to_path_buf(),
                source,
            })?;
        for owner in owners.into_iter().filter(|entry| entry.kind == EntryKind::Dir) {
            if self.stopped() {
                break;
            }
            stats.owners += 1;
            let files = match self.ctx.storage.list_dir(&owner.path) {
                Ok(files) => files,
                Err(err) => {
                    warn!(dir = %owner.path.display(), error = %err, "Failed to list owner directory");
                    continue;
                }
            };
            for file in files.into_iter().filter(|entry| entry.kind == EntryKind::File) {
                stats.files_seen += 1;
                self.visit_file(&file.path, &mut stats);
            }
        }
        Ok(stats)
    }

    fn visit_file(&self, path: &Path, stats: &mut ScanStats) {
        let store = &self.ctx.store;
        let Some(record) = store.find_by_path(path) else {
            stats.skipped_unregistered += 1;
            return;
        };
        if record.is_claimed() {
            self.maybe_reclaim(&record, stats);
            return;
        }
        if record.is_compressed {
            stats.skipped_compressed += 1;
            return;
        }
        let modified = match self.ctx.storage.stat(path) {
            Ok(stat) => stat.modified,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "File vanished during scan");
                return;
            }
        };
        if is_hot(self.ctx.clock.now(), modified, self.ctx.settings.hot_threshold()) {
            stats.skipped_hot += 1;
            return;
        }
        let (record, token) =
            match store.try_claim(&record.key, ClaimKind::Demotion, self.ctx.clock.now_secs()) {
                ClaimOutcome::Claimed { record, token } => (record, token),
                ClaimOutcome::Busy(_) | ClaimOutcome::Missing => {
                    stats.skipped_claimed += 1;
                    return;
                }
            };
        let ctx = self.ctx.clone();
        let job_record = record.clone();
        match self.pool.submit(Priority::Normal, move || {
            run_demotion_job(&ctx, &job_record, token)
        }) {
            Ok(()) => stats.claimed += 1,
            Err(err) => {
                stats.submit_failed += 1;
                warn!(key = %record.key, error = %err, "Failed to queue demotion");
                if let Err(err) = store.release_claim(&record.key, token) {
                    warn!(key = %record.key, error = %err, "Failed to release demotion claim");
                }
            }
        }
    }

    fn maybe_reclaim(&self, record: &FileRecord, stats: &mut ScanStats) {
        let store = &self.ctx.store;
        let Some((record, token)) = store.reclaim_stale(
            &record.key,
            self.ctx.settings.claim_lease(),
            self.ctx.clock.now_secs(),
        ) else {
            stats.skipped_claimed += 1;
            return;
        };
        let ctx = self.ctx.clone();
        let job_record = record.clone();
        match self.pool.submit(Priority::Low, move || {
            run_recovery_job(&ctx, &job_record, token)
        }) {
            Ok(()) => stats.reclaimed += 1,
            Err(err) => {
                stats.submit_failed += 1;
                warn!(key = %record.key, error = %err, "Failed to queue stale-claim recovery");
            }
        }
    }

    fn wait_for_root(&self) -> bool {
        let root = self.layout.raw_root();
        let mut logged = false;
        while !self.ctx.storage.exists(root) {
            if self.stopped() {
                return false;
            }
            if !logged {
                info!(root = %root.display(), "Waiting for raw storage root");
                logged = true;
            }
            self.sleep(self.ctx.settings.scan_interval());
        }
        !self.stopped()
    }

    fn sleep(&self, delay: Duration) {
        let deadline = Instant::now() + delay;
        while !self.stopped() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

fn is_leftover_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(is_temp_file_name)
}
