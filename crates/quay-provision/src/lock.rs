//! Exclusive lock on an installation.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use fs4::FileExt;
use tracing::debug;

use crate::error::{io_err, ProvisionError, Result};

/// Lock file name inside the metadata directory.
pub const LOCK_FILE: &str = "install.lock";

/// Held for the lifetime of an [`Installation`](crate::Installation) handle.
/// Released when dropped.
#[derive(Debug)]
pub struct InstallLock {
    path: PathBuf,
    file: File,
}

impl InstallLock {
    /// Take the lock in `metadata_dir` without blocking.
    pub fn acquire(metadata_dir: &Path) -> Result<Self> {
        let path = metadata_dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                return Err(ProvisionError::Locked { path })
            }
            Err(e) => return Err(io_err(&path, e)),
        }
        debug!(path = %path.display(), "acquired installation lock");
        Ok(InstallLock { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!(path = %self.path.display(), error = %e, "failed to release installation lock");
        }
    }
}
