//! Entry point used by the serving layer: owns the store, pool, scanner and
//! promoter built from one [`TierConfig`].

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::codec::{Codec, ZipCodec};
use crate::config::TierConfig;
use crate::layout::{Layout, LayoutError};
use crate::metadata::{ClaimKind, ClaimOutcome, FileRecord, MetadataStore, StoreError};
use crate::pool::{PoolError, PoolStats, WorkerPool};
use crate::promotion::{PromoteError, Promoter};
use crate::storage::{LocalStorage, Storage, epoch_seconds};
use crate::tiering::{
    Clock, ReconcileStats, ScanError, ScanStats, Scanner, ScannerHandle, SystemClock,
    TierContext,
};

const INGEST_ATTEMPTS: usize = 3;
const READ_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Storage operation failed for {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Promote(#[from] PromoteError),
    #[error("{key} is busy with a {kind} job")]
    Busy { key: String, kind: &'static str },
    #[error("Scanner is already running")]
    AlreadyStarted,
}

pub struct TierService {
    config: TierConfig,
    layout: Layout,
    ctx: TierContext,
    pool: Arc<WorkerPool>,
    scanner: Scanner,
    promoter: Promoter,
    scanner_handle: Mutex<Option<ScannerHandle>>,
}

impl TierService {
    /// Open with local-disk storage, the zip codec and the system clock.
    pub fn open(config: &TierConfig) -> Result<Self, ServiceError> {
        let codec = ZipCodec::new(config.codec.max_unpacked_bytes);
        Self::open_with(
            config,
            Arc::new(LocalStorage::new()),
            Arc::new(codec),
            Arc::new(SystemClock),
        )
    }

    pub fn open_with(
        config: &TierConfig,
        storage: Arc<dyn Storage>,
        codec: Arc<dyn Codec>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ServiceError> {
        let config = config.clone().normalized();
        let layout = Layout::from_settings(&config.storage);
        for root in [layout.raw_root(), layout.compressed_root()] {
            storage.create_dir_all(root).map_err(|source| ServiceError::Io {
                path: root.to_path_buf(),
                source,
            })?;
        }
        let store = Arc::new(MetadataStore::open(
            &config.storage.metadata_file,
            config.persistence.compact_after,
        )?);
        let pool = Arc::new(WorkerPool::from_settings(&config.workers)?);
        let ctx = TierContext {
            store,
            storage,
            codec,
            clock,
            settings: config.tiering.clone(),
        };
        let scanner = Scanner::new(ctx.clone(), Arc::clone(&pool), layout.clone());
        let promoter = Promoter::new(ctx.clone());
        info!(
            raw = %layout.raw_root().display(),
            compressed = %layout.compressed_root().display(),
            metadata = %ctx.store.snapshot_path().display(),
            records = ctx.store.len(),
            "Tier service opened"
        );
        Ok(Self {
            config,
            layout,
            ctx,
            pool,
            scanner,
            promoter,
            scanner_handle: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &TierConfig {
        &self.config
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn store(&self) -> &Arc<MetadataStore> {
        &self.ctx.store
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Start the background scanner thread.
    pub fn start(&self) -> Result<(), ServiceError> {
        let mut handle = self.lock_handle();
        if handle.is_some() {
            return Err(ServiceError::AlreadyStarted);
        }
        *handle = Some(self.scanner.clone().spawn()?);
        Ok(())
    }

    /// Block until the scanner thread exits.
    pub fn join(&self) {
        let handle = self.lock_handle().take();
        if let Some(handle) = handle {
            handle.join();
        }
    }

    /// Run one scan pass on the calling thread.
    pub fn scan_once(&self) -> Result<ScanStats, ServiceError> {
        Ok(self.scanner.scan_pass()?)
    }

    pub fn reconcile(&self) -> ReconcileStats {
        self.scanner.reconcile()
    }

    /// Wait for every queued tiering job to finish.
    pub fn wait_for_jobs(&self, timeout: Duration) -> bool {
        self.pool.wait_idle(timeout)
    }

    /// Stop the scanner, drain the pool and checkpoint the store.
    pub fn shutdown(&self) -> Result<(), ServiceError> {
        self.stop_scanner();
        self.pool.shutdown();
        self.ctx.store.persist()?;
        info!("Tier service stopped");
        Ok(())
    }

    /// Create the owner's raw and compressed directories.
    pub fn ensure_owner_dirs(&self, owner_id: i64) -> Result<(), ServiceError> {
        for dir in [
            self.layout.owner_raw_dir(owner_id),
            self.layout.owner_compressed_dir(owner_id),
        ] {
            self.ctx
                .storage
                .create_dir_all(&dir)
                .map_err(|source| ServiceError::Io { path: dir, source })?;
        }
        Ok(())
    }

    /// Store `bytes` as the raw copy of `file_name` for `owner_id` and
    /// register (or refresh) its record.
    pub fn ingest(
        &self,
        owner_id: i64,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<FileRecord, ServiceError> {
        let raw_path = self.layout.raw_path_for(owner_id, file_name)?;
        let key = self.layout.key_for(&raw_path)?;
        let store = &self.ctx.store;
        let clock = &self.ctx.clock;
        for _ in 0..INGEST_ATTEMPTS {
            match store.claim_with_wait(
                &key,
                ClaimKind::Ingest,
                self.ctx.settings.promotion_wait(),
                || clock.now_secs(),
            ) {
                ClaimOutcome::Claimed { record, token } => {
                    return self.replace_existing(&record, token, bytes);
                }
                ClaimOutcome::Busy(claim) => {
                    return Err(ServiceError::Busy {
                        key,
                        kind: claim.kind.as_str(),
                    });
                }
                ClaimOutcome::Missing => {
                    self.write(&raw_path, bytes)?;
                    let stat = self.stat(&raw_path)?;
                    let record = self.layout.record_for(&raw_path, owner_id, &stat)?;
                    self.remove_if_exists(&record.compressed_path)?;
                    match store.insert(record.clone()) {
                        Ok(()) => {
                            info!(key = %record.key, size = record.size, "Ingested file");
                            return Ok(record);
                        }
                        // Lost a race with a concurrent ingest; take the claim path.
                        Err(StoreError::AlreadyExists(_)) => continue,
                        Err(err) => return Err(err.into()),
                    }
                }
            }
        }
        let kind = store
            .get(&key)
            .and_then(|record| record.claim)
            .map(|claim| claim.kind.as_str())
            .unwrap_or(ClaimKind::Ingest.as_str());
        Err(ServiceError::Busy { key, kind })
    }

    fn replace_existing(
        &self,
        record: &FileRecord,
        token: u64,
        bytes: &[u8],
    ) -> Result<FileRecord, ServiceError> {
        let store = &self.ctx.store;
        let written = store.with_held_claim(&record.key, token, |_| {
            self.write(&record.raw_path, bytes)
        })?;
        if let Err(err) = written {
            if let Err(release_err) = store.release_claim(&record.key, token) {
                warn!(key = %record.key, error = %release_err, "Failed to release ingest claim");
            }
            return Err(err);
        }
        // From here on the claim stays held on failure; stale-claim recovery
        // sees the new raw copy and finishes the ingest.
        let stat = self.stat(&record.raw_path)?;
        store.with_held_claim(&record.key, token, |_| {
            self.remove_if_exists(&record.compressed_path)
        })??;
        let updated = store.complete_claim(&record.key, token, |current| {
            current.is_compressed = false;
            current.size = stat.size;
            current.last_modified_time = epoch_seconds(stat.modified);
            current.last_access_time = epoch_seconds(stat.accessed);
        })?;
        info!(key = %updated.key, size = updated.size, "Replaced file content");
        Ok(updated)
    }

    /// Make sure the content of `key` sits uncompressed at its raw path.
    pub fn open_for_read(&self, key: &str) -> Result<FileRecord, ServiceError> {
        Ok(self.promoter.ensure_hot(key)?)
    }

    /// Read the full content of `key`, promoting it first when cold.
    ///
    /// A raw copy is served directly, even while a demotion holds the claim:
    /// it is only removed after the compressed artifact is durable. A read
    /// that loses that race retries through the promotion path, which waits
    /// for the claim.
    pub fn read(&self, key: &str) -> Result<Vec<u8>, ServiceError> {
        let mut last_err = None;
        for attempt in 0..READ_ATTEMPTS {
            let record = match self.ctx.store.get(key) {
                None => return Err(PromoteError::NotFound(key.to_string()).into()),
                Some(record) if attempt == 0 && !record.is_compressed => record,
                Some(_) => self.open_for_read(key)?,
            };
            match self.ctx.storage.read(&record.raw_path) {
                Ok(data) => return Ok(data),
                Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                    debug!(key, attempt, "Raw copy moved during read; retrying");
                    last_err = Some(ServiceError::Io {
                        path: record.raw_path,
                        source,
                    });
                }
                Err(source) => {
                    return Err(ServiceError::Io {
                        path: record.raw_path,
                        source,
                    });
                }
            }
        }
        Err(last_err.unwrap_or_else(|| ServiceError::Busy {
            key: key.to_string(),
            kind: ClaimKind::Demotion.as_str(),
        }))
    }

    pub fn get(&self, key: &str) -> Option<FileRecord> {
        self.ctx.store.get(key)
    }

    pub fn list_for_owner(&self, owner_id: i64) -> Vec<FileRecord> {
        self.ctx.store.list_for_owner(owner_id)
    }

    fn write(&self, path: &std::path::Path, bytes: &[u8]) -> Result<(), ServiceError> {
        self.ctx
            .storage
            .write(path, bytes)
            .map_err(|source| ServiceError::Io {
                path: path.to_path_buf(),
                source,
            })
    }

    fn stat(&self, path: &std::path::Path) -> Result<crate::storage::FileStat, ServiceError> {
        self.ctx.storage.stat(path).map_err(|source| ServiceError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn remove_if_exists(&self, path: &std::path::Path) -> Result<(), ServiceError> {
        if !self.ctx.storage.exists(path) {
            return Ok(());
        }
        self.ctx
            .storage
            .remove(path)
            .map_err(|source| ServiceError::Io {
                path: path.to_path_buf(),
                source,
            })
    }

    fn stop_scanner(&self) {
        let handle = self.lock_handle().take();
        self.scanner.stop();
        if let Some(handle) = handle {
            handle.stop();
            handle.join();
        }
    }

    fn lock_handle(&self) -> std::sync::MutexGuard<'_, Option<ScannerHandle>> {
        self.scanner_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for TierService {
    fn drop(&mut self) {
        self.stop_scanner();
    }
}
