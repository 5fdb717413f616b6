//! Points `TIERSTORE_HOME` at a throwaway directory for the life of a test.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tempfile::TempDir;
use tierstore::app_dirs::{APP_DIR_NAME, HOME_ENV_VAR};

/// Process environment is shared by every test thread.
static HOME_LOCK: Mutex<()> = Mutex::new(());

pub struct TierstoreHome {
    dir: TempDir,
    saved: Option<OsString>,
    _serial: MutexGuard<'static, ()>,
}

impl TierstoreHome {
    pub fn new() -> Self {
        let serial = HOME_LOCK.lock().unwrap_or_else(|err| err.into_inner());
        let dir = tempfile::tempdir().expect("create home tempdir");
        let saved = std::env::var_os(HOME_ENV_VAR);
        // SAFETY: every writer of HOME_ENV_VAR in this test binary holds HOME_LOCK.
        unsafe {
            std::env::set_var(HOME_ENV_VAR, dir.path());
        }
        Self {
            dir,
            saved,
            _serial: serial,
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Expected location of the `.tierstore` directory.
    pub fn app_dir(&self) -> PathBuf {
        self.dir.path().join(APP_DIR_NAME)
    }
}

impl Drop for TierstoreHome {
    fn drop(&mut self) {
        // SAFETY: HOME_LOCK is still held; `_serial` drops after this body.
        unsafe {
            match self.saved.take() {
                Some(value) => std::env::set_var(HOME_ENV_VAR, value),
                None => std::env::remove_var(HOME_ENV_VAR),
            }
        }
    }
}
