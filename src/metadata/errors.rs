use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the metadata store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing a persistence file failed.
    #[error("Metadata IO failed for {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The checkpoint snapshot could not be parsed; startup must abort.
    #[error("Metadata snapshot {path} is corrupt: {source}")]
    CorruptSnapshot {
        path: PathBuf,
        source: serde_json::Error,
    },
    /// A journal line other than the final one could not be parsed.
    #[error("Metadata journal {path} is corrupt at line {line}: {source}")]
    CorruptJournal {
        path: PathBuf,
        line: usize,
        source: serde_json::Error,
    },
    #[error("Record already exists: {0}")]
    AlreadyExists(String),
    #[error("Record not found: {0}")]
    NotFound(String),
    /// The caller's claim token no longer matches the record's claim.
    #[error("Claim on {0} is no longer held by this caller")]
    ClaimLost(String),
    #[error("Failed to serialize metadata: {0}")]
    Serialize(#[from] serde_json::Error),
}
