use std::fs;
use std::io;
use std::path::Path;

use tracing::warn;

use super::{DirEntry, EntryKind, FileStat, Storage, atomic_write};

/// [`Storage`] backed by the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalStorage;

impl LocalStorage {
    pub fn new() -> Self {
        Self
    }
}

impl Storage for LocalStorage {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        let meta = fs::metadata(path)?;
        let modified = meta.modified()?;
        // Some filesystems are mounted without atime; fall back to mtime.
        let accessed = meta.accessed().unwrap_or(modified);
        Ok(FileStat {
            size: meta.len(),
            modified,
            accessed,
        })
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        atomic_write(path, data)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry_result in fs::read_dir(path)? {
            let entry = match entry_result {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(
                        dir = %path.display(),
                        error = %err,
                        "Failed to read directory entry"
                    );
                    continue;
                }
            };
            let entry_path = entry.path();
            let kind = match entry.file_type() {
                Ok(file_type) if file_type.is_symlink() => EntryKind::Other,
                Ok(file_type) if file_type.is_dir() => EntryKind::Dir,
                Ok(file_type) if file_type.is_file() => EntryKind::File,
                Ok(_) => EntryKind::Other,
                Err(err) => {
                    warn!(
                        path = %entry_path.display(),
                        error = %err,
                        "Failed to read file type"
                    );
                    continue;
                }
            };
            entries.push(DirEntry {
                path: entry_path,
                kind,
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_creates_parents_and_stat_reports_size() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new();
        let path = dir.path().join("7").join("report.txt");

        storage.write(&path, b"hello").unwrap();

        assert!(storage.exists(&path));
        assert_eq!(storage.read(&path).unwrap(), b"hello");
        assert_eq!(storage.stat(&path).unwrap().size, 5);
        storage.remove(&path).unwrap();
        assert!(!storage.exists(&path));
    }

    #[test]
    fn list_dir_classifies_entries() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new();
        storage.create_dir_all(&dir.path().join("owner")).unwrap();
        std::fs::write(dir.path().join("file.bin"), b"x").unwrap();

        let mut entries = storage.list_dir(dir.path()).unwrap();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, EntryKind::File);
        assert_eq!(entries[1].kind, EntryKind::Dir);
    }

    #[cfg(unix)]
    #[test]
    fn list_dir_reports_symlinks_as_other() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("target");
        std::fs::create_dir_all(&target).unwrap();
        std::os::unix::fs::symlink(&target, dir.path().join("link")).unwrap();

        let entries = LocalStorage::new().list_dir(dir.path()).unwrap();
        let link = entries
            .iter()
            .find(|entry| entry.path.ends_with("link"))
            .unwrap();
        assert_eq!(link.kind, EntryKind::Other);
    }
}
