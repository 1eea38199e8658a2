use directories::BaseDirs;
use std::path::PathBuf;

use crate::error::{Error, Result, storage_err};
use crate::storage::{CERTIFICATE_FILE, DESCRIPTOR_FILE};

/// Environment variable that overrides the default profiles directory
pub const PROFILES_DIR_ENV: &str = "PROFMGR_PROFILES_DIR";

/// All computed paths used by profmgr
#[derive(Debug, Clone)]
pub struct Paths {
    /// <data dir>/profmgr/profiles, or the configured override
    pub profiles_dir: PathBuf,
    /// <profiles_dir>/.lock
    pub lock_file: PathBuf,
}

impl Paths {
    /// Paths rooted at the default per-user data location
    pub fn new() -> Result<Self> {
        let base_dirs = BaseDirs::new().ok_or(Error::NoDataDir)?;
        Ok(Self::with_root(base_dirs.data_dir().join("profmgr").join("profiles")))
    }

    /// Paths rooted at an explicit profiles directory
    pub fn with_root(profiles_dir: impl Into<PathBuf>) -> Self {
        let profiles_dir = profiles_dir.into();
        let lock_file = profiles_dir.join(".lock");
        Self {
            profiles_dir,
            lock_file,
        }
    }

    /// Use the override when one was configured, the default location otherwise
    pub fn resolve(profiles_dir: Option<PathBuf>) -> Result<Self> {
        match profiles_dir {
            Some(dir) => Ok(Self::with_root(dir)),
            None => Self::new(),
        }
    }

    /// Get the path to a specific profile directory
    pub fn profile_dir(&self, name: &str) -> PathBuf {
        self.profiles_dir.join(name)
    }

    /// Get the path to a specific profile's descriptor
    pub fn profile_descriptor(&self, name: &str) -> PathBuf {
        self.profile_dir(name).join(DESCRIPTOR_FILE)
    }

    /// Get the path to a specific profile's certificate
    pub fn profile_certificate(&self, name: &str) -> PathBuf {
        self.profile_dir(name).join(CERTIFICATE_FILE)
    }

    /// Ensure the profiles directory exists, private to the current user
    pub fn ensure_dirs(&self) -> Result<()> {
        if self.profiles_dir.is_dir() {
            return Ok(());
        }
        std::fs::create_dir_all(&self.profiles_dir).map_err(storage_err(&self.profiles_dir))?;
        crate::fs_utils::restrict_dir(&self.profiles_dir).map_err(storage_err(&self.profiles_dir))
    }
}
