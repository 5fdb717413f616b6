//! Background classification of stored files into hot and cold tiers.
//!
//! The [`Scanner`] walks the raw root, claims cold files through the metadata
//! store and hands demotion jobs to the worker pool. Every transformation of
//! a file happens under a claim, and a job only flips `is_compressed` after
//! the new artifact is durable and the old one removed. Claims left behind by
//! failed or crashed jobs are taken over once their lease expires and
//! finished by a recovery job.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::codec::{Codec, CodecError};
use crate::config::TieringSettings;
use crate::metadata::{MetadataStore, StoreError};
use crate::storage::Storage;

mod clock;
mod demotion;
mod recovery;
mod scanner;
mod stats;

pub use clock::{Clock, ManualClock, SystemClock, is_hot};
pub use demotion::{DemotionOutcome, demote};
pub use recovery::{RecoveryOutcome, reconcile, recover_stale};
pub use scanner::{Backoff, Scanner, ScannerHandle};
pub use stats::{ReconcileStats, ScanStats};

/// Collaborators shared by scan passes, tiering jobs and the promotion path.
#[derive(Clone)]
pub struct TierContext {
    pub store: Arc<MetadataStore>,
    pub storage: Arc<dyn Storage>,
    pub codec: Arc<dyn Codec>,
    pub clock: Arc<dyn Clock>,
    pub settings: TieringSettings,
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Failed to list {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to spawn scanner thread: {source}")]
    Spawn { source: std::io::Error },
}

/// Failures of a demotion or recovery job.
#[derive(Debug, Error)]
pub enum DemotionError {
    #[error("Storage operation failed for {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to compress {path}: {source}")]
    Codec { path: PathBuf, source: CodecError },
    #[error(transparent)]
    Store(#[from] StoreError),
}
