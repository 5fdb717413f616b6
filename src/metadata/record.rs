use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Reason a record is currently claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClaimKind {
    /// Raw content is being compressed.
    Demotion,
    /// Compressed content is being restored for a reader.
    Promotion,
    /// A new version of the file is being written.
    Ingest,
}

impl ClaimKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ClaimKind::Demotion => "demotion",
            ClaimKind::Promotion => "promotion",
            ClaimKind::Ingest => "ingest",
        }
    }
}

/// In-flight transformation marker. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    pub kind: ClaimKind,
    /// Identifies the holder; only the matching token may complete or release.
    pub token: u64,
    /// Epoch seconds when the claim was taken.
    pub claimed_at: i64,
}

/// Tiering state of one stored file.
///
/// Field names on disk follow the snapshot format shared with older
/// deployments, so the serde names differ from the Rust ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    #[serde(rename = "url")]
    pub key: String,
    #[serde(rename = "userID")]
    pub owner_id: i64,
    #[serde(rename = "real_path")]
    pub raw_path: PathBuf,
    #[serde(rename = "pack_path")]
    pub compressed_path: PathBuf,
    #[serde(rename = "fsize")]
    pub size: u64,
    #[serde(rename = "atime")]
    pub last_access_time: i64,
    #[serde(rename = "mtime")]
    pub last_modified_time: i64,
    #[serde(rename = "pack_flag")]
    pub is_compressed: bool,
    #[serde(skip)]
    pub claim: Option<Claim>,
}

impl FileRecord {
    pub fn is_claimed(&self) -> bool {
        self.claim.is_some()
    }

    /// Path currently holding the durable copy.
    pub fn current_path(&self) -> &PathBuf {
        if self.is_compressed {
            &self.compressed_path
        } else {
            &self.raw_path
        }
    }

    pub fn file_name(&self) -> String {
        self.raw_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Cache validator in the `<name>-<size>-<mtime>` form served to clients.
    pub fn etag(&self) -> String {
        format!(
            "{}-{}-{}",
            self.file_name(),
            self.size,
            self.last_modified_time
        )
    }
}
