use std::io;
use std::path::Path;

use super::{FileRecord, StoreError};
use crate::storage::atomic_write;

/// Read the checkpoint snapshot. A missing or blank file is an empty table.
pub(crate) fn read_snapshot(path: &Path) -> Result<Vec<FileRecord>, StoreError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    serde_json::from_slice(&bytes).map_err(|source| StoreError::CorruptSnapshot {
        path: path.to_path_buf(),
        source,
    })
}

/// Atomically replace the snapshot with `records`, sorted by key.
pub(crate) fn write_snapshot<'a>(
    path: &Path,
    records: impl Iterator<Item = &'a FileRecord>,
) -> Result<(), StoreError> {
    let mut records: Vec<&FileRecord> = records.collect();
    records.sort_by(|a, b| a.key.cmp(&b.key));
    let bytes = serde_json::to_vec(&records)?;
    atomic_write(path, &bytes).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}
