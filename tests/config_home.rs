mod support;

use support::home::TierstoreHome;

use tierstore::app_dirs;
use tierstore::config::{self, CONFIG_FILE_NAME, TierConfig};

#[test]
fn app_dirs_resolve_under_home() {
    let home = TierstoreHome::new();

    let root = app_dirs::app_root_dir().unwrap();
    assert_eq!(root, home.app_dir());
    assert!(root.is_dir());

    let logs = app_dirs::logs_dir().unwrap();
    assert_eq!(logs, home.app_dir().join("logs"));
    assert!(logs.is_dir());
    // Resolving again reuses the existing directories.
    assert_eq!(app_dirs::logs_dir().unwrap(), logs);
}

#[test]
fn missing_config_loads_defaults_from_home() {
    let home = TierstoreHome::new();

    let loaded = config::load_or_default().unwrap();
    assert_eq!(loaded, TierConfig::default().normalized());
    assert!(home.app_dir().is_dir());
    assert!(!home.app_dir().join(CONFIG_FILE_NAME).exists());
}

#[test]
fn saved_config_round_trips_through_home() {
    let home = TierstoreHome::new();

    let mut settings = TierConfig::default();
    settings.tiering.hot_threshold_secs = 86_400;
    settings.workers.count = 3;
    settings.storage.url_prefix = "/files".into();
    config::save(&settings).unwrap();

    let path = config::config_path().unwrap();
    assert_eq!(path, home.app_dir().join(CONFIG_FILE_NAME));
    assert!(path.starts_with(home.path()));
    assert!(path.is_file());
    let loaded = config::load_or_default().unwrap();
    assert_eq!(loaded.tiering.hot_threshold_secs, 86_400);
    assert_eq!(loaded.workers.count, 3);
    assert_eq!(loaded.storage.url_prefix, "/files");
}
