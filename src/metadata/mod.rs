//! Durable map from record key to [`FileRecord`].
//!
//! The table lives in memory behind one `RwLock`. Durable changes are
//! appended to a JSON-lines journal beside the snapshot; once the journal
//! grows past `compact_after` entries the whole table is checkpointed into
//! the snapshot and the journal truncated. Claims are process-local and are
//! never written to disk, so a restart always starts unclaimed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

mod errors;
mod journal;
mod record;
mod snapshot;

pub use errors::StoreError;
pub use record::{Claim, ClaimKind, FileRecord};

use crate::wakeup::ClaimWakeup;
use journal::Journal;

const CLAIM_RETRY_SLICE: Duration = Duration::from_millis(250);

/// Result of [`MetadataStore::try_claim`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Missing,
    /// Someone else holds the claim.
    Busy(Claim),
    Claimed { record: FileRecord, token: u64 },
}

struct StoreState {
    table: HashMap<String, FileRecord>,
    by_path: HashMap<PathBuf, String>,
    journal: Journal,
}

impl StoreState {
    fn put(&mut self, record: FileRecord) {
        if let Some(previous) = self.table.get(&record.key) {
            if previous.raw_path != record.raw_path {
                self.by_path.remove(&previous.raw_path);
            }
        }
        self.by_path
            .insert(record.raw_path.clone(), record.key.clone());
        self.table.insert(record.key.clone(), record);
    }
}

/// Concurrent metadata table with snapshot plus journal persistence.
pub struct MetadataStore {
    snapshot_path: PathBuf,
    compact_after: usize,
    state: RwLock<StoreState>,
    dirty: AtomicBool,
    next_token: AtomicU64,
    wakeup: Arc<ClaimWakeup>,
}

impl MetadataStore {
    /// Load the snapshot, replay the journal and checkpoint whatever was
    /// replayed so the journal starts empty.
    pub fn open(snapshot_path: &Path, compact_after: usize) -> Result<Self, StoreError> {
        if let Some(parent) = snapshot_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
        {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let journal_path = Journal::path_for(snapshot_path);
        let records = read_records(snapshot_path)?;
        let journal = Journal::open(&journal_path)?;
        let mut state = StoreState {
            table: HashMap::with_capacity(records.len()),
            by_path: HashMap::with_capacity(records.len()),
            journal,
        };
        for record in records {
            state.put(record);
        }
        let store = Self {
            snapshot_path: snapshot_path.to_path_buf(),
            compact_after: compact_after.max(1),
            state: RwLock::new(state),
            dirty: AtomicBool::new(false),
            next_token: AtomicU64::new(1),
            wakeup: Arc::new(ClaimWakeup::new()),
        };
        {
            let mut state = store.write_state();
            if !state.journal.is_empty() {
                store.checkpoint(&mut state)?;
            }
            info!(
                snapshot = %store.snapshot_path.display(),
                records = state.table.len(),
                "Metadata store loaded"
            );
        }
        Ok(store)
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Signal raised after every claim release or completion.
    pub fn wakeup(&self) -> Arc<ClaimWakeup> {
        Arc::clone(&self.wakeup)
    }

    pub fn len(&self) -> usize {
        self.read_state().table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True after a persistence failure until the next successful checkpoint.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub fn get(&self, key: &str) -> Option<FileRecord> {
        self.read_state().table.get(key).cloned()
    }

    /// Record whose current raw path is `path`.
    pub fn find_by_path(&self, path: &Path) -> Option<FileRecord> {
        let state = self.read_state();
        state
            .by_path
            .get(path)
            .and_then(|key| state.table.get(key))
            .cloned()
    }

    pub fn list_all(&self) -> Vec<FileRecord> {
        self.read_state().table.values().cloned().collect()
    }

    /// Records of one owner, sorted by key.
    pub fn list_for_owner(&self, owner_id: i64) -> Vec<FileRecord> {
        let mut records: Vec<FileRecord> = self
            .read_state()
            .table
            .values()
            .filter(|record| record.owner_id == owner_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        records
    }

    /// Add a record whose key must not exist yet.
    pub fn insert(&self, mut record: FileRecord) -> Result<(), StoreError> {
        let mut state = self.write_state();
        if state.table.contains_key(&record.key) {
            return Err(StoreError::AlreadyExists(record.key));
        }
        record.claim = None;
        state.put(record.clone());
        self.record_durable(&mut state, &record)
    }

    /// Insert or replace a record. A claim already held on the key survives.
    pub fn upsert(&self, mut record: FileRecord) -> Result<(), StoreError> {
        let mut state = self.write_state();
        record.claim = state
            .table
            .get(&record.key)
            .and_then(|existing| existing.claim);
        state.put(record.clone());
        self.record_durable(&mut state, &record)
    }

    /// Compare-and-set on the claim: succeeds only when the record exists and
    /// is unclaimed.
    pub fn try_claim(&self, key: &str, kind: ClaimKind, now: i64) -> ClaimOutcome {
        let mut state = self.write_state();
        let Some(record) = state.table.get_mut(key) else {
            return ClaimOutcome::Missing;
        };
        if let Some(existing) = record.claim {
            return ClaimOutcome::Busy(existing);
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        record.claim = Some(Claim {
            kind,
            token,
            claimed_at: now,
        });
        debug!(key, kind = kind.as_str(), token, "Claimed record");
        ClaimOutcome::Claimed {
            record: record.clone(),
            token,
        }
    }

    /// [`MetadataStore::try_claim`], retrying on `Busy` whenever a claim is
    /// released until `wait` elapses. `now` supplies the claim timestamp.
    pub fn claim_with_wait(
        &self,
        key: &str,
        kind: ClaimKind,
        wait: Duration,
        now: impl Fn() -> i64,
    ) -> ClaimOutcome {
        let deadline = Instant::now() + wait;
        loop {
            let mut seen = self.wakeup.snapshot();
            let outcome = self.try_claim(key, kind, now());
            if !matches!(outcome, ClaimOutcome::Busy(_)) {
                return outcome;
            }
            let current = Instant::now();
            if current >= deadline {
                return outcome;
            }
            self.wakeup
                .wait_for(&mut seen, (deadline - current).min(CLAIM_RETRY_SLICE));
        }
    }

    /// Apply `mutate`, clear the claim and persist, in one critical section.
    ///
    /// A persistence failure is returned but the in-memory change and the
    /// cleared claim are kept; the store is marked dirty.
    pub fn complete_claim(
        &self,
        key: &str,
        token: u64,
        mutate: impl FnOnce(&mut FileRecord),
    ) -> Result<FileRecord, StoreError> {
        let result = {
            let mut state = self.write_state();
            let mut record = held_record(&state, key, token)?;
            mutate(&mut record);
            record.key = key.to_string();
            record.claim = None;
            state.put(record.clone());
            self.record_durable(&mut state, &record).map(|()| record)
        };
        self.wakeup.notify();
        result
    }

    /// Drop the claim without durable changes.
    pub fn release_claim(&self, key: &str, token: u64) -> Result<(), StoreError> {
        {
            let mut state = self.write_state();
            held_record(&state, key, token)?;
            if let Some(record) = state.table.get_mut(key) {
                record.claim = None;
            }
        }
        debug!(key, token, "Released claim");
        self.wakeup.notify();
        Ok(())
    }

    /// Run `f` only while `token` still holds the claim on `key`.
    ///
    /// Claims change hands under the write lock, so holding the read lock for
    /// the duration of `f` keeps a takeover from interleaving with it. Every
    /// filesystem mutation a claim holder makes goes through here; `f` must
    /// not call back into the store.
    pub fn with_held_claim<T>(
        &self,
        key: &str,
        token: u64,
        f: impl FnOnce(&FileRecord) -> T,
    ) -> Result<T, StoreError> {
        let state = self.read_state();
        let record = held_record(&state, key, token)?;
        Ok(f(&record))
    }

    /// Take over a claim held for longer than `lease`, keeping its kind.
    /// Returns the record and the fresh token.
    pub fn reclaim_stale(
        &self,
        key: &str,
        lease: Duration,
        now: i64,
    ) -> Option<(FileRecord, u64)> {
        let mut state = self.write_state();
        let record = state.table.get_mut(key)?;
        let claim = record.claim?;
        let lease_secs = i64::try_from(lease.as_secs()).unwrap_or(i64::MAX);
        if now.saturating_sub(claim.claimed_at) <= lease_secs {
            return None;
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        record.claim = Some(Claim {
            kind: claim.kind,
            token,
            claimed_at: now,
        });
        warn!(
            key,
            kind = claim.kind.as_str(),
            stale_token = claim.token,
            token,
            "Reclaimed stale claim"
        );
        Some((record.clone(), token))
    }

    /// Write a full checkpoint and truncate the journal.
    pub fn persist(&self) -> Result<(), StoreError> {
        let mut state = self.write_state();
        self.checkpoint(&mut state)
    }

    fn record_durable(
        &self,
        state: &mut StoreState,
        record: &FileRecord,
    ) -> Result<(), StoreError> {
        let result = if self.is_dirty() || state.journal.entries() + 1 >= self.compact_after {
            self.checkpoint(state)
        } else {
            state.journal.append(record)
        };
        if let Err(err) = &result {
            self.dirty.store(true, Ordering::SeqCst);
            warn!(key = %record.key, error = %err, "Failed to persist record change");
        }
        result
    }

    fn checkpoint(&self, state: &mut StoreState) -> Result<(), StoreError> {
        let result = snapshot::write_snapshot(&self.snapshot_path, state.table.values())
            .and_then(|()| state.journal.reset());
        match &result {
            Ok(()) => {
                self.dirty.store(false, Ordering::SeqCst);
                debug!(
                    snapshot = %self.snapshot_path.display(),
                    journal = %state.journal.path().display(),
                    records = state.table.len(),
                    "Checkpointed metadata"
                );
            }
            Err(_) => self.dirty.store(true, Ordering::SeqCst),
        }
        result
    }

    fn read_state(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(|poisoned| {
            warn!("Metadata lock poisoned; recovering");
            poisoned.into_inner()
        })
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(|poisoned| {
            warn!("Metadata lock poisoned; recovering");
            poisoned.into_inner()
        })
    }
}

fn held_record(state: &StoreState, key: &str, token: u64) -> Result<FileRecord, StoreError> {
    let record = state
        .table
        .get(key)
        .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
    match record.claim {
        Some(claim) if claim.token == token => Ok(record.clone()),
        _ => Err(StoreError::ClaimLost(key.to_string())),
    }
}

/// Read the snapshot and replay its journal without opening the store for
/// writing. Later entries replace earlier ones with the same key.
pub fn read_records(snapshot_path: &Path) -> Result<Vec<FileRecord>, StoreError> {
    let mut records = snapshot::read_snapshot(snapshot_path)?;
    let replay = journal::replay(&Journal::path_for(snapshot_path))?;
    if replay.torn_tail {
        warn!(
            snapshot = %snapshot_path.display(),
            "Journal ended with a partial entry"
        );
    }
    records.extend(replay.records);
    let mut by_key: HashMap<String, FileRecord> = HashMap::with_capacity(records.len());
    for record in records {
        by_key.insert(record.key.clone(), record);
    }
    let mut records: Vec<FileRecord> = by_key.into_values().collect();
    records.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(records)
}
