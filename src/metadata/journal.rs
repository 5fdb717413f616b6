use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use super::{FileRecord, StoreError};

const JOURNAL_SUFFIX: &str = ".journal";

/// Records recovered from the journal.
#[derive(Debug, Default)]
pub(crate) struct Replay {
    pub(crate) records: Vec<FileRecord>,
    /// A partially written final line was discarded.
    pub(crate) torn_tail: bool,
}

/// Append-only JSON-lines log of record changes since the last checkpoint.
pub(crate) struct Journal {
    path: PathBuf,
    file: File,
    len: u64,
    entries: usize,
}

impl Journal {
    /// Journal path kept beside the snapshot: `<snapshot>.journal`.
    pub(crate) fn path_for(snapshot_path: &Path) -> PathBuf {
        let mut name = OsString::from(snapshot_path.as_os_str());
        name.push(JOURNAL_SUFFIX);
        PathBuf::from(name)
    }

    pub(crate) fn open(path: &Path) -> Result<Self, StoreError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| io_error(path, source))?;
        let len = file
            .metadata()
            .map_err(|source| io_error(path, source))?
            .len();
        Ok(Self {
            path: path.to_path_buf(),
            file,
            len,
            entries: 0,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Entries appended since the last reset.
    pub(crate) fn entries(&self) -> usize {
        self.entries
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append one record and sync it. A failed append is rolled back to the
    /// previous length so later lines never follow a torn one.
    pub(crate) fn append(&mut self, record: &FileRecord) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        if let Err(source) = self
            .file
            .write_all(&line)
            .and_then(|_| self.file.sync_data())
        {
            if let Err(err) = self.file.set_len(self.len) {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "Failed to roll back partial journal append"
                );
            }
            return Err(io_error(&self.path, source));
        }
        self.len += line.len() as u64;
        self.entries += 1;
        Ok(())
    }

    /// Truncate after a successful checkpoint.
    pub(crate) fn reset(&mut self) -> Result<(), StoreError> {
        self.file
            .set_len(0)
            .and_then(|_| self.file.sync_data())
            .map_err(|source| io_error(&self.path, source))?;
        self.len = 0;
        self.entries = 0;
        Ok(())
    }
}

/// Parse every journal line in order. Only the final line may be corrupt;
/// it is treated as a crash mid-append and dropped.
pub(crate) fn replay(path: &Path) -> Result<Replay, StoreError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
        Err(source) => return Err(io_error(path, source)),
    };
    let lines: Vec<(usize, &[u8])> = bytes
        .split(|byte| *byte == b'\n')
        .enumerate()
        .filter(|(_, line)| !line.iter().all(u8::is_ascii_whitespace))
        .collect();
    let mut replay = Replay::default();
    for (position, (index, line)) in lines.iter().enumerate() {
        match serde_json::from_slice::<FileRecord>(line) {
            Ok(record) => replay.records.push(record),
            Err(source) if position + 1 == lines.len() => {
                warn!(
                    path = %path.display(),
                    line = index + 1,
                    error = %source,
                    "Discarding torn journal tail"
                );
                replay.torn_tail = true;
            }
            Err(source) => {
                return Err(StoreError::CorruptJournal {
                    path: path.to_path_buf(),
                    line: index + 1,
                    source,
                });
            }
        }
    }
    Ok(replay)
}

fn io_error(path: &Path, source: io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}
