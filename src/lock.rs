use fs2::FileExt;
use log::debug;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Result, storage_err};

/// Advisory lock over the whole profile store.
///
/// Mutating operations hold it exclusively so that two invocations never
/// interleave their journal steps. Readers hold it shared, which keeps them from
/// seeing a profile directory swapped out between two of their file reads.
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

fn open_lock_file(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
}

impl StoreLock {
    /// Open and lock the lock file for exclusive access (blocks until available)
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = open_lock_file(path).map_err(storage_err(path))?;

        file.lock_exclusive().map_err(storage_err(path))?;
        debug!("Acquired store lock {}", path.display());

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Take the lock shared for reading (blocks while a mutation holds it).
    ///
    /// A store the caller cannot write to has no writers to wait for, so a lock
    /// file that cannot be created yields `None` instead of an error.
    pub fn acquire_shared(path: &Path) -> Result<Option<Self>> {
        let file = match open_lock_file(path).or_else(|_| File::open(path)) {
            Ok(file) => file,
            Err(e) => {
                debug!("Reading without store lock {}: {}", path.display(), e);
                return Ok(None);
            }
        };

        FileExt::lock_shared(&file).map_err(storage_err(path))?;
        Ok(Some(Self {
            file,
            path: path.to_path_buf(),
        }))
    }

    /// Try to take the lock without waiting; `None` if another process holds it
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        let file = open_lock_file(path).map_err(storage_err(path))?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self {
                file,
                path: path.to_path_buf(),
            })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(storage_err(path)(e)),
        }
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        // Release the lock (ignore errors during drop)
        let _ = FileExt::unlock(&self.file);
        debug!("Released store lock {}", self.path.display());
    }
}
