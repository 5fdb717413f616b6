//! Daemon configuration persisted as TOML in the application directory.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

mod defaults;
mod errors;
mod io;

#[cfg(test)]
mod tests;

pub use errors::ConfigError;
pub use io::{CONFIG_FILE_NAME, config_path, load_from, load_or_default, save, save_to_path};

use defaults::*;

/// Top-level settings for the tiering engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TierConfig {
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub tiering: TieringSettings,
    #[serde(default)]
    pub workers: WorkerSettings,
    #[serde(default)]
    pub persistence: PersistenceSettings,
    #[serde(default)]
    pub codec: CodecSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Where raw files, compressed artifacts and metadata live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageSettings {
    /// Root of uncompressed (hot) storage, one subdirectory per owner.
    #[serde(default = "default_raw_dir")]
    pub raw_dir: PathBuf,
    /// Root of compressed (cold) storage, mirroring `raw_dir`.
    #[serde(default = "default_compressed_dir")]
    pub compressed_dir: PathBuf,
    /// Extension appended to compressed artifacts.
    #[serde(default = "default_compressed_suffix")]
    pub compressed_suffix: String,
    /// Prefix joined with the owner-relative path to form record keys.
    #[serde(default = "default_url_prefix")]
    pub url_prefix: String,
    /// Metadata snapshot; the journal lives beside it.
    #[serde(default = "default_metadata_file")]
    pub metadata_file: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            raw_dir: default_raw_dir(),
            compressed_dir: default_compressed_dir(),
            compressed_suffix: default_compressed_suffix(),
            url_prefix: default_url_prefix(),
            metadata_file: default_metadata_file(),
        }
    }
}

/// Hot/cold classification and scan scheduling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TieringSettings {
    /// Files modified within this many seconds are hot.
    #[serde(default = "default_hot_threshold_secs")]
    pub hot_threshold_secs: u64,
    /// Delay between scan passes that found work.
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,
    /// Upper bound for the idle backoff delay.
    #[serde(default = "default_idle_backoff_max_ms")]
    pub idle_backoff_max_ms: u64,
    /// Age after which an in-flight claim is considered abandoned (at least
    /// 30 seconds).
    #[serde(default = "default_claim_lease_secs")]
    pub claim_lease_secs: u64,
    /// How long a reader waits for a concurrent transformation to finish.
    #[serde(default = "default_promotion_wait_ms")]
    pub promotion_wait_ms: u64,
}

impl Default for TieringSettings {
    fn default() -> Self {
        Self {
            hot_threshold_secs: default_hot_threshold_secs(),
            scan_interval_ms: default_scan_interval_ms(),
            idle_backoff_max_ms: default_idle_backoff_max_ms(),
            claim_lease_secs: default_claim_lease_secs(),
            promotion_wait_ms: default_promotion_wait_ms(),
        }
    }
}

impl TieringSettings {
    pub fn hot_threshold(&self) -> Duration {
        Duration::from_secs(self.hot_threshold_secs)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms.max(1))
    }

    pub fn idle_backoff_max(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_max_ms.max(self.scan_interval_ms.max(1)))
    }

    pub fn claim_lease(&self) -> Duration {
        Duration::from_secs(self.claim_lease_secs)
    }

    pub fn promotion_wait(&self) -> Duration {
        Duration::from_millis(self.promotion_wait_ms)
    }
}

/// Worker pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerSettings {
    /// Worker thread count (0 = auto).
    #[serde(default)]
    pub count: u32,
    /// Queued jobs allowed before `submit` blocks.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            count: 0,
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl WorkerSettings {
    /// Resolve the effective worker count, honoring the auto setting.
    pub fn resolved_count(&self) -> usize {
        let count = clamp_worker_count(self.count);
        if count >= 1 {
            return count as usize;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .saturating_sub(1)
            .max(1)
    }
}

/// Journal compaction policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistenceSettings {
    /// Journal entries appended before the store writes a full checkpoint.
    #[serde(default = "default_compact_after")]
    pub compact_after: usize,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            compact_after: default_compact_after(),
        }
    }
}

/// Limits applied by the compression codec.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodecSettings {
    /// Largest payload `unpack` will produce.
    #[serde(default = "default_max_unpacked_bytes")]
    pub max_unpacked_bytes: u64,
}

impl Default for CodecSettings {
    fn default() -> Self {
        Self {
            max_unpacked_bytes: default_max_unpacked_bytes(),
        }
    }
}

/// Optional override for the log directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LoggingSettings {
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl TierConfig {
    /// Clamp out-of-range values loaded from disk.
    pub fn normalized(mut self) -> Self {
        self.workers.count = clamp_worker_count(self.workers.count);
        self.workers.queue_capacity = self.workers.queue_capacity.max(1);
        self.tiering.claim_lease_secs = self.tiering.claim_lease_secs.max(MIN_CLAIM_LEASE_SECS);
        self.persistence.compact_after = self.persistence.compact_after.max(1);
        if !self.storage.compressed_suffix.is_empty()
            && !self.storage.compressed_suffix.starts_with('.')
        {
            self.storage.compressed_suffix = format!(".{}", self.storage.compressed_suffix);
        }
        self
    }
}
