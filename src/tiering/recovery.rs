use std::path::Path;

use tracing::{error, info, warn};

use super::demotion::{DemotionOutcome, demote};
use super::{DemotionError, ReconcileStats, TierContext};
use crate::metadata::{ClaimKind, ClaimOutcome, FileRecord, StoreError};
use crate::storage::epoch_seconds;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// The record now points at its compressed artifact.
    Compressed,
    /// The record now points at its raw file.
    Raw,
    /// The claim was released without durable changes.
    Released,
    /// Neither artifact exists.
    DataLost,
}

/// Finish the transition a stale claim was in the middle of. `record` and
/// `token` come from [`crate::metadata::MetadataStore::reclaim_stale`].
pub fn recover_stale(
    ctx: &TierContext,
    record: &FileRecord,
    token: u64,
) -> Result<RecoveryOutcome, DemotionError> {
    let kind = record.claim.map(|claim| claim.kind).unwrap_or(ClaimKind::Demotion);
    let raw_exists = ctx.storage.exists(&record.raw_path);
    let compressed_exists = ctx.storage.exists(&record.compressed_path);
    info!(
        key = %record.key,
        kind = kind.as_str(),
        raw_exists,
        compressed_exists,
        "Recovering stale claim"
    );
    match kind {
        ClaimKind::Demotion => {
            if compressed_exists {
                if raw_exists {
                    remove(ctx, record, token, &record.raw_path)?;
                }
                ctx.store
                    .complete_claim(&record.key, token, |current| current.is_compressed = true)?;
                Ok(RecoveryOutcome::Compressed)
            } else if raw_exists {
                match demote(ctx, record, token)? {
                    DemotionOutcome::Compressed(_) => Ok(RecoveryOutcome::Compressed),
                    DemotionOutcome::RawMissing => Ok(RecoveryOutcome::Released),
                }
            } else {
                data_lost(ctx, record, token)
            }
        }
        ClaimKind::Promotion | ClaimKind::Ingest => {
            if raw_exists {
                if compressed_exists {
                    remove(ctx, record, token, &record.compressed_path)?;
                }
                // A promoted copy keeps the recorded mtime; an ingested one is new content.
                let stat = match kind {
                    ClaimKind::Ingest => ctx.storage.stat(&record.raw_path).ok(),
                    _ => None,
                };
                ctx.store.complete_claim(&record.key, token, |current| {
                    current.is_compressed = false;
                    if let Some(stat) = stat {
                        current.size = stat.size;
                        current.last_modified_time = epoch_seconds(stat.modified);
                        current.last_access_time = epoch_seconds(stat.accessed);
                    }
                })?;
                Ok(RecoveryOutcome::Raw)
            } else if compressed_exists {
                if record.is_compressed {
                    ctx.store.release_claim(&record.key, token)?;
                    Ok(RecoveryOutcome::Released)
                } else {
                    ctx.store.complete_claim(&record.key, token, |current| {
                        current.is_compressed = true;
                    })?;
                    Ok(RecoveryOutcome::Compressed)
                }
            } else {
                data_lost(ctx, record, token)
            }
        }
    }
}

pub(crate) fn run_recovery_job(ctx: &TierContext, record: &FileRecord, token: u64) {
    match recover_stale(ctx, record, token) {
        Ok(outcome) => info!(key = %record.key, ?outcome, "Stale claim recovered"),
        Err(DemotionError::Store(StoreError::ClaimLost(key))) => {
            warn!(key, "Recovery lost its claim to a newer holder");
        }
        Err(err) => error!(key = %record.key, error = %err, "Stale claim recovery failed"),
    }
}

/// Align the filesystem with every unclaimed record: remove the artifact the
/// flag does not point to, or flip the flag when only the other artifact
/// exists. Runs once at startup before the first scan pass.
pub fn reconcile(ctx: &TierContext) -> ReconcileStats {
    let mut stats = ReconcileStats::default();
    for record in ctx.store.list_all() {
        stats.checked += 1;
        // Claim in the direction the flag points so an interrupted reconcile
        // recovers toward the same state.
        let kind = if record.is_compressed {
            ClaimKind::Demotion
        } else {
            ClaimKind::Promotion
        };
        let (record, token) = match ctx.store.try_claim(&record.key, kind, ctx.clock.now_secs()) {
            ClaimOutcome::Claimed { record, token } => (record, token),
            ClaimOutcome::Busy(_) | ClaimOutcome::Missing => {
                stats.skipped_claimed += 1;
                continue;
            }
        };
        if let Err(err) = reconcile_record(ctx, &record, token, &mut stats) {
            stats.errors += 1;
            error!(key = %record.key, error = %err, "Reconcile failed");
            match ctx.store.release_claim(&record.key, token) {
                Ok(()) | Err(StoreError::ClaimLost(_)) => {}
                Err(err) => {
                    warn!(key = %record.key, error = %err, "Failed to release reconcile claim");
                }
            }
        }
    }
    info!(
        checked = stats.checked,
        removed_stale = stats.removed_stale,
        flipped = stats.flipped,
        missing = stats.missing,
        errors = stats.errors,
        "Startup reconcile finished"
    );
    stats
}

fn reconcile_record(
    ctx: &TierContext,
    record: &FileRecord,
    token: u64,
    stats: &mut ReconcileStats,
) -> Result<(), DemotionError> {
    let raw_exists = ctx.storage.exists(&record.raw_path);
    let compressed_exists = ctx.storage.exists(&record.compressed_path);
    let (current_exists, other_exists, other_path) = if record.is_compressed {
        (compressed_exists, raw_exists, &record.raw_path)
    } else {
        (raw_exists, compressed_exists, &record.compressed_path)
    };
    match (current_exists, other_exists) {
        (true, false) => {
            ctx.store.release_claim(&record.key, token)?;
        }
        (true, true) => {
            remove(ctx, record, token, other_path)?;
            stats.removed_stale += 1;
            info!(key = %record.key, path = %other_path.display(), "Removed stale artifact");
            ctx.store.release_claim(&record.key, token)?;
        }
        (false, true) => {
            let is_compressed = !record.is_compressed;
            stats.flipped += 1;
            ctx.store.complete_claim(&record.key, token, |current| {
                current.is_compressed = is_compressed;
            })?;
            warn!(key = %record.key, is_compressed, "Corrected compression flag");
        }
        (false, false) => {
            stats.missing += 1;
            error!(
                key = %record.key,
                raw = %record.raw_path.display(),
                compressed = %record.compressed_path.display(),
                "No artifact on disk for record"
            );
            ctx.store.release_claim(&record.key, token)?;
        }
    }
    Ok(())
}

fn data_lost(
    ctx: &TierContext,
    record: &FileRecord,
    token: u64,
) -> Result<RecoveryOutcome, DemotionError> {
    error!(
        key = %record.key,
        raw = %record.raw_path.display(),
        compressed = %record.compressed_path.display(),
        "Neither raw nor compressed copy exists"
    );
    ctx.store.release_claim(&record.key, token)?;
    Ok(RecoveryOutcome::DataLost)
}

/// Delete `path` only while `token` still holds the claim on `record`.
fn remove(
    ctx: &TierContext,
    record: &FileRecord,
    token: u64,
    path: &Path,
) -> Result<(), DemotionError> {
    ctx.store
        .with_held_claim(&record.key, token, |_| ctx.storage.remove(path))?
        .map_err(|source| DemotionError::Io {
            path: path.to_path_buf(),
            source,
        })
}
