//! Synchronous decompression of cold files on read access.

use std::path::PathBuf;

use thiserror::Error;
use tracing::{info, warn};

use crate::codec::CodecError;
use crate::metadata::{ClaimKind, ClaimOutcome, FileRecord, StoreError};
use crate::tiering::TierContext;

#[derive(Debug, Error)]
pub enum PromoteError {
    #[error("No record for {0}")]
    NotFound(String),
    /// Another transformation held the claim for the whole wait.
    #[error("{key} is busy with a {kind} job")]
    Busy { key: String, kind: &'static str },
    #[error("Storage operation failed for {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to decompress {path}: {source}")]
    Codec { path: PathBuf, source: CodecError },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Brings compressed files back to the raw tier for readers.
#[derive(Clone)]
pub struct Promoter {
    ctx: TierContext,
}

impl Promoter {
    pub fn new(ctx: TierContext) -> Self {
        Self { ctx }
    }

    /// Return the record for `key` with its content at `raw_path`,
    /// decompressing it first when needed. Waits up to the configured
    /// promotion wait for a concurrent job on the same key to finish.
    pub fn ensure_hot(&self, key: &str) -> Result<FileRecord, PromoteError> {
        let (record, token) = self.claim(key)?;
        if !record.is_compressed {
            self.ctx.store.release_claim(key, token)?;
            return Ok(record);
        }
        self.promote(&record, token)
    }

    fn claim(&self, key: &str) -> Result<(FileRecord, u64), PromoteError> {
        let clock = &self.ctx.clock;
        match self.ctx.store.claim_with_wait(
            key,
            ClaimKind::Promotion,
            self.ctx.settings.promotion_wait(),
            || clock.now_secs(),
        ) {
            ClaimOutcome::Claimed { record, token } => Ok((record, token)),
            ClaimOutcome::Missing => Err(PromoteError::NotFound(key.to_string())),
            ClaimOutcome::Busy(claim) => Err(PromoteError::Busy {
                key: key.to_string(),
                kind: claim.kind.as_str(),
            }),
        }
    }

    fn promote(&self, record: &FileRecord, token: u64) -> Result<FileRecord, PromoteError> {
        let store = &self.ctx.store;
        let storage = &self.ctx.storage;
        let compressed = &record.compressed_path;

        let restored = storage
            .read(compressed)
            .map_err(|source| PromoteError::Io {
                path: compressed.clone(),
                source,
            })
            .and_then(|packed| {
                self.ctx
                    .codec
                    .unpack(&packed)
                    .map_err(|source| PromoteError::Codec {
                        path: compressed.clone(),
                        source,
                    })
            })
            .and_then(|data| -> Result<usize, PromoteError> {
                store
                    .with_held_claim(&record.key, token, |_| {
                        storage.write(&record.raw_path, &data)
                    })?
                    .map(|()| data.len())
                    .map_err(|source| PromoteError::Io {
                        path: record.raw_path.clone(),
                        source,
                    })
            });
        let restored_bytes = match restored {
            Ok(bytes) => bytes,
            Err(err @ PromoteError::Store(_)) => return Err(err),
            Err(err) => {
                if let Err(release_err) = store.release_claim(&record.key, token) {
                    warn!(key = %record.key, error = %release_err, "Failed to release promotion claim");
                }
                return Err(err);
            }
        };

        // The claim stays held on failure; stale-claim recovery sees the raw
        // copy and finishes the promotion.
        store
            .with_held_claim(&record.key, token, |_| storage.remove(compressed))?
            .map_err(|source| PromoteError::Io {
                path: compressed.clone(),
                source,
            })?;

        // Content is unchanged, so the recorded mtime (and the etag) stays.
        let accessed = self.ctx.clock.now_secs();
        let updated = store.complete_claim(&record.key, token, |current| {
            current.is_compressed = false;
            current.last_access_time = accessed;
        })?;
        info!(key = %updated.key, bytes = restored_bytes, "Promoted file");
        Ok(updated)
    }
}
