use std::path::PathBuf;

pub(super) const MAX_WORKER_COUNT: u32 = 64;
/// Shortest lease accepted; a shorter one would hand live jobs to recovery.
pub(super) const MIN_CLAIM_LEASE_SECS: u64 = 30;

pub(super) fn clamp_worker_count(value: u32) -> u32 {
    value.min(MAX_WORKER_COUNT)
}

pub(super) fn default_raw_dir() -> PathBuf {
    PathBuf::from("./backup")
}

pub(super) fn default_compressed_dir() -> PathBuf {
    PathBuf::from("./pack")
}

pub(super) fn default_compressed_suffix() -> String {
    ".zip".to_string()
}

pub(super) fn default_url_prefix() -> String {
    "/download".to_string()
}

pub(super) fn default_metadata_file() -> PathBuf {
    PathBuf::from("./metadata.json")
}

pub(super) fn default_hot_threshold_secs() -> u64 {
    30
}

pub(super) fn default_scan_interval_ms() -> u64 {
    1_000
}

pub(super) fn default_idle_backoff_max_ms() -> u64 {
    30_000
}

pub(super) fn default_claim_lease_secs() -> u64 {
    10 * 60
}

pub(super) fn default_promotion_wait_ms() -> u64 {
    30_000
}

pub(super) fn default_queue_capacity() -> usize {
    256
}

pub(super) fn default_compact_after() -> usize {
    128
}

pub(super) fn default_max_unpacked_bytes() -> u64 {
    4 * 1024 * 1024 * 1024
}
