use super::*;
use tempfile::tempdir;

#[test]
fn missing_file_yields_defaults() {
    let dir = tempdir().unwrap();
    let config = load_from(&dir.path().join(CONFIG_FILE_NAME)).unwrap();
    assert_eq!(config, TierConfig::default());
    assert_eq!(config.storage.compressed_suffix, ".zip");
    assert_eq!(config.tiering.hot_threshold(), Duration::from_secs(30));
}

#[test]
fn partial_file_fills_missing_fields_with_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(
        &path,
        "[tiering]\nhot_threshold_secs = 86400\n\n[workers]\ncount = 3\n",
    )
    .unwrap();

    let config = load_from(&path).unwrap();
    assert_eq!(config.tiering.hot_threshold_secs, 86_400);
    assert_eq!(
        config.tiering.scan_interval_ms,
        TieringSettings::default().scan_interval_ms
    );
    assert_eq!(config.workers.count, 3);
    assert_eq!(config.workers.resolved_count(), 3);
    assert_eq!(config.storage, StorageSettings::default());
}

#[test]
fn save_then_load_preserves_settings() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join(CONFIG_FILE_NAME);
    let mut config = TierConfig::default();
    config.storage.raw_dir = PathBuf::from("/srv/tier/raw");
    config.storage.url_prefix = "/files".into();
    config.tiering.claim_lease_secs = 42;
    config.logging.directory = Some(PathBuf::from("/var/log/tierstore"));

    save_to_path(&config, &path).unwrap();
    let loaded = load_from(&path).unwrap();
    assert_eq!(loaded, config);

    let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().contains(".tmp-"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn out_of_range_values_are_clamped() {
    let dir = tempdir().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(
        &path,
        "[workers]\ncount = 1000\nqueue_capacity = 0\n\n[persistence]\ncompact_after = 0\n\n[storage]\ncompressed_suffix = \"lz\"\n\n[tiering]\nclaim_lease_secs = 0\n",
    )
    .unwrap();

    let config = load_from(&path).unwrap();
    assert_eq!(config.workers.count, defaults::MAX_WORKER_COUNT);
    assert_eq!(config.workers.queue_capacity, 1);
    assert_eq!(config.persistence.compact_after, 1);
    assert_eq!(config.storage.compressed_suffix, ".lz");
    assert_eq!(config.tiering.claim_lease_secs, defaults::MIN_CLAIM_LEASE_SECS);
}

#[test]
fn invalid_toml_reports_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(&path, "[tiering\nhot_threshold_secs = ").unwrap();
    let err = load_from(&path).unwrap_err();
    match err {
        ConfigError::ParseToml { path: reported, .. } => assert_eq!(reported, path),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn idle_backoff_never_drops_below_scan_interval() {
    let settings = TieringSettings {
        scan_interval_ms: 500,
        idle_backoff_max_ms: 10,
        ..TieringSettings::default()
    };
    assert_eq!(settings.idle_backoff_max(), Duration::from_millis(500));
}
