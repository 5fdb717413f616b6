//! Where tierstore keeps its own files: `config.toml` and `logs/` inside a
//! `.tierstore` directory.
//!
//! The directory sits under `$TIERSTORE_HOME` when that is set to a
//! non-empty value, else under the OS config directory. Storage roots and
//! the metadata file are configured separately and never resolved here.

use std::path::PathBuf;

use directories::BaseDirs;
use thiserror::Error;

pub const APP_DIR_NAME: &str = ".tierstore";
/// Environment variable naming the directory that holds `.tierstore`.
pub const HOME_ENV_VAR: &str = "TIERSTORE_HOME";
const LOGS_DIR_NAME: &str = "logs";

#[derive(Debug, Error)]
pub enum AppDirError {
    #[error("Neither TIERSTORE_HOME nor an OS config directory is available")]
    NoBaseDir,
    #[error("Failed to create application directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// The `.tierstore` directory, created on first use.
pub fn app_root_dir() -> Result<PathBuf, AppDirError> {
    let base = home_base().ok_or(AppDirError::NoBaseDir)?;
    ensure_dir(base.join(APP_DIR_NAME))
}

/// Default directory for daemon log files, created on first use.
pub fn logs_dir() -> Result<PathBuf, AppDirError> {
    ensure_dir(app_root_dir()?.join(LOGS_DIR_NAME))
}

fn home_base() -> Option<PathBuf> {
    match std::env::var_os(HOME_ENV_VAR) {
        Some(home) if !home.is_empty() => Some(PathBuf::from(home)),
        _ => BaseDirs::new().map(|dirs| dirs.config_dir().to_path_buf()),
    }
}

fn ensure_dir(path: PathBuf) -> Result<PathBuf, AppDirError> {
    if !path.is_dir() {
        std::fs::create_dir_all(&path).map_err(|source| AppDirError::CreateDir {
            path: path.clone(),
            source,
        })?;
    }
    Ok(path)
}
