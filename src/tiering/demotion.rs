use std::path::Path;

use tracing::{debug, error, info, warn};

use super::{DemotionError, TierContext};
use crate::metadata::{FileRecord, StoreError};
use crate::storage::epoch_seconds;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DemotionOutcome {
    Compressed(FileRecord),
    /// The raw file was gone; the claim was released untouched.
    RawMissing,
}

/// Compress a claimed raw file and flip the record to compressed.
///
/// Order: write the compressed artifact, delete the raw file, then complete
/// the claim. Both filesystem steps run under
/// [`MetadataStore::with_held_claim`](crate::metadata::MetadataStore::with_held_claim),
/// so a job whose claim was taken over returns `ClaimLost` without touching
/// either artifact. Failures before anything durable changed release the
/// claim; codec and deletion failures keep it so the lease-based recovery
/// finishes the transition.
pub fn demote(
    ctx: &TierContext,
    record: &FileRecord,
    token: u64,
) -> Result<DemotionOutcome, DemotionError> {
    let raw = &record.raw_path;
    if !ctx.storage.exists(raw) {
        warn!(key = %record.key, path = %raw.display(), "Raw file missing; skipping demotion");
        ctx.store.release_claim(&record.key, token)?;
        return Ok(DemotionOutcome::RawMissing);
    }

    let stat = match ctx.storage.stat(raw) {
        Ok(stat) => stat,
        Err(source) => return Err(release_after_io(ctx, record, token, raw, source)),
    };
    let data = match ctx.storage.read(raw) {
        Ok(data) => data,
        Err(source) => return Err(release_after_io(ctx, record, token, raw, source)),
    };
    let packed = ctx
        .codec
        .pack(&data)
        .map_err(|source| DemotionError::Codec {
            path: raw.clone(),
            source,
        })?;
    let written = ctx.store.with_held_claim(&record.key, token, |_| {
        ctx.storage.write(&record.compressed_path, &packed)
    })?;
    if let Err(source) = written {
        return Err(release_after_io(
            ctx,
            record,
            token,
            &record.compressed_path,
            source,
        ));
    }
    ctx.store
        .with_held_claim(&record.key, token, |_| ctx.storage.remove(raw))?
        .map_err(|source| DemotionError::Io {
            path: raw.clone(),
            source,
        })?;

    let updated = ctx.store.complete_claim(&record.key, token, |current| {
        current.is_compressed = true;
        current.size = stat.size;
        current.last_modified_time = epoch_seconds(stat.modified);
        current.last_access_time = epoch_seconds(stat.accessed);
    })?;
    info!(
        key = %updated.key,
        raw_bytes = data.len(),
        packed_bytes = packed.len(),
        "Demoted file"
    );
    Ok(DemotionOutcome::Compressed(updated))
}

/// Pool entry point: run [`demote`] and log the result.
pub(crate) fn run_demotion_job(ctx: &TierContext, record: &FileRecord, token: u64) {
    match demote(ctx, record, token) {
        Ok(DemotionOutcome::Compressed(_)) => {}
        Ok(DemotionOutcome::RawMissing) => {
            debug!(key = %record.key, "Demotion aborted; raw file missing");
        }
        Err(DemotionError::Store(StoreError::ClaimLost(key))) => {
            warn!(key, "Demotion finished after its claim was reclaimed; recovery owns the record");
        }
        Err(err) => {
            error!(key = %record.key, error = %err, "Demotion failed");
        }
    }
}

fn release_after_io(
    ctx: &TierContext,
    record: &FileRecord,
    token: u64,
    path: &Path,
    source: std::io::Error,
) -> DemotionError {
    if let Err(err) = ctx.store.release_claim(&record.key, token) {
        warn!(key = %record.key, error = %err, "Failed to release claim after IO error");
    }
    DemotionError::Io {
        path: path.to_path_buf(),
        source,
    }
}
