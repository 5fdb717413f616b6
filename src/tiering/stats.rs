/// Summary of one scan pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanStats {
    pub owners: usize,
    pub files_seen: usize,
    pub skipped_unregistered: usize,
    pub skipped_claimed: usize,
    pub skipped_compressed: usize,
    pub skipped_hot: usize,
    /// Cold files claimed and handed to the pool.
    pub claimed: usize,
    /// Stale claims taken over and handed to recovery.
    pub reclaimed: usize,
    pub submit_failed: usize,
}

impl ScanStats {
    /// True when the pass queued any job; resets the idle backoff.
    pub fn found_work(&self) -> bool {
        self.claimed + self.reclaimed > 0
    }
}

/// Summary of the startup reconcile.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileStats {
    pub checked: usize,
    pub skipped_claimed: usize,
    /// Leftover artifacts the flag does not point to.
    pub removed_stale: usize,
    /// Records whose flag was corrected to the only artifact present.
    pub flipped: usize,
    /// Records with neither artifact on disk.
    pub missing: usize,
    pub errors: usize,
    /// Abandoned atomic-write temp files deleted.
    pub temp_removed: usize,
}
