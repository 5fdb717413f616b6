//! Deterministic mapping between raw paths, compressed paths and record keys.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

use crate::config::StorageSettings;
use crate::metadata::FileRecord;
use crate::storage::FileStat;
use crate::storage::{epoch_seconds, is_temp_file_name};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("Path {path} is not inside the raw storage root {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },
    #[error("Invalid file name: {0:?}")]
    InvalidFileName(String),
}

/// Raw and compressed roots plus the key naming scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    raw_root: PathBuf,
    compressed_root: PathBuf,
    compressed_suffix: String,
    url_prefix: String,
}

impl Layout {
    pub fn new(
        raw_root: impl Into<PathBuf>,
        compressed_root: impl Into<PathBuf>,
        compressed_suffix: impl Into<String>,
        url_prefix: impl Into<String>,
    ) -> Self {
        Self {
            raw_root: raw_root.into(),
            compressed_root: compressed_root.into(),
            compressed_suffix: compressed_suffix.into(),
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_settings(settings: &StorageSettings) -> Self {
        Self::new(
            &settings.raw_dir,
            &settings.compressed_dir,
            &settings.compressed_suffix,
            &settings.url_prefix,
        )
    }

    pub fn raw_root(&self) -> &Path {
        &self.raw_root
    }

    pub fn compressed_root(&self) -> &Path {
        &self.compressed_root
    }

    /// Directory name used for an owner under both roots.
    pub fn owner_dir_name(owner_id: i64) -> String {
        owner_id.to_string()
    }

    pub fn owner_raw_dir(&self, owner_id: i64) -> PathBuf {
        self.raw_root.join(Self::owner_dir_name(owner_id))
    }

    pub fn owner_compressed_dir(&self, owner_id: i64) -> PathBuf {
        self.compressed_root.join(Self::owner_dir_name(owner_id))
    }

    /// Raw path for an uploaded file; the name must be a single plain component.
    pub fn raw_path_for(&self, owner_id: i64, file_name: &str) -> Result<PathBuf, LayoutError> {
        validate_file_name(file_name)?;
        Ok(self.owner_raw_dir(owner_id).join(file_name))
    }

    /// Compressed artifact path mirroring `raw_path`.
    pub fn compressed_path_for(&self, raw_path: &Path) -> Result<PathBuf, LayoutError> {
        let relative = self.relative(raw_path)?;
        let mut name = self.compressed_root.join(relative).into_os_string();
        name.push(&self.compressed_suffix);
        Ok(PathBuf::from(name))
    }

    /// Record key: the URL prefix followed by the root-relative path using `/`.
    pub fn key_for(&self, raw_path: &Path) -> Result<String, LayoutError> {
        let relative = self.relative(raw_path)?;
        let mut key = self.url_prefix.clone();
        for component in relative.components() {
            key.push('/');
            key.push_str(&component.as_os_str().to_string_lossy());
        }
        Ok(key)
    }

    /// Build a fresh raw record for a file that has just been written.
    pub fn record_for(
        &self,
        raw_path: &Path,
        owner_id: i64,
        stat: &FileStat,
    ) -> Result<FileRecord, LayoutError> {
        Ok(FileRecord {
            key: self.key_for(raw_path)?,
            owner_id,
            raw_path: raw_path.to_path_buf(),
            compressed_path: self.compressed_path_for(raw_path)?,
            size: stat.size,
            last_access_time: epoch_seconds(stat.accessed),
            last_modified_time: epoch_seconds(stat.modified),
            is_compressed: false,
            claim: None,
        })
    }

    fn relative<'a>(&self, raw_path: &'a Path) -> Result<&'a Path, LayoutError> {
        let relative = raw_path
            .strip_prefix(&self.raw_root)
            .map_err(|_| LayoutError::OutsideRoot {
                path: raw_path.to_path_buf(),
                root: self.raw_root.clone(),
            })?;
        let clean = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if relative.as_os_str().is_empty() || !clean {
            return Err(LayoutError::OutsideRoot {
                path: raw_path.to_path_buf(),
                root: self.raw_root.clone(),
            });
        }
        Ok(relative)
    }
}

fn validate_file_name(file_name: &str) -> Result<(), LayoutError> {
    let mut components = Path::new(file_name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None)
            if !file_name.contains(['/', '\\']) && !is_temp_file_name(file_name) =>
        {
            Ok(())
        }
        _ => Err(LayoutError::InvalidFileName(file_name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    fn layout() -> Layout {
        Layout::new("/srv/backup", "/srv/pack", ".zip", "/download/")
    }

    #[test]
    fn derives_paths_and_key_from_raw_path() {
        let layout = layout();
        let raw = layout.raw_path_for(3, "notes.txt").unwrap();
        assert_eq!(raw, PathBuf::from("/srv/backup/3/notes.txt"));
        assert_eq!(
            layout.compressed_path_for(&raw).unwrap(),
            PathBuf::from("/srv/pack/3/notes.txt.zip")
        );
        assert_eq!(layout.key_for(&raw).unwrap(), "/download/3/notes.txt");
    }

    #[test]
    fn record_starts_raw_and_unclaimed() {
        let layout = layout();
        let raw = PathBuf::from("/srv/backup/9/a.bin");
        let stat = FileStat {
            size: 12,
            modified: UNIX_EPOCH + Duration::from_secs(1_000),
            accessed: UNIX_EPOCH + Duration::from_secs(2_000),
        };
        let record = layout.record_for(&raw, 9, &stat).unwrap();
        assert_eq!(record.key, "/download/9/a.bin");
        assert_eq!(record.size, 12);
        assert_eq!(record.last_modified_time, 1_000);
        assert_eq!(record.last_access_time, 2_000);
        assert!(!record.is_compressed);
        assert!(!record.is_claimed());
    }

    #[test]
    fn rejects_paths_outside_root_and_unsafe_names() {
        let layout = layout();
        assert!(matches!(
            layout.key_for(Path::new("/elsewhere/1/a")),
            Err(LayoutError::OutsideRoot { .. })
        ));
        assert!(layout.key_for(Path::new("/srv/backup")).is_err());
        for name in ["", "..", "../x", "a/b", "a\\b", ".", "a.txt.tmp-0a1b2c3d4e5f"] {
            assert!(layout.raw_path_for(1, name).is_err(), "accepted {name:?}");
        }
    }
}
