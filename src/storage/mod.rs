//! Filesystem capability consumed by the tiering engine.
//!
//! The engine never touches `std::fs` for tiered content directly; it goes
//! through [`Storage`] so the serving layer can supply its own backend and
//! tests can inject failures. All calls are synchronous and surface errors
//! without retrying.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

mod atomic;
mod local;

pub use atomic::{atomic_write, is_temp_file_name};
pub use local::LocalStorage;

/// Size and timestamps observed for a stored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub modified: SystemTime,
    pub accessed: SystemTime,
}

/// Kind of a directory entry returned by [`Storage::list_dir`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Other,
}

/// One directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
}

/// Raw filesystem primitives required by the metadata store's collaborators.
pub trait Storage: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    fn stat(&self, path: &Path) -> io::Result<FileStat>;

    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Replace `path` with `data`. Readers observe either the previous content
    /// or the full new content, never a partial write. Parent directories are
    /// created as needed.
    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    fn remove(&self, path: &Path) -> io::Result<()>;

    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Immediate children of `path`; symlinks are reported as `Other`.
    fn list_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>>;
}

/// Convert a timestamp to whole seconds since the Unix epoch, saturating
/// pre-epoch values to zero.
pub fn epoch_seconds(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs()
        .min(i64::MAX as u64) as i64
}
