//! Atomic state-file writes.

use std::io::Write;
use std::path::Path;

use crate::error::{CoreError, Result};

/// Replace `path` with `data` via a temporary file in the same directory.
///
/// Readers see either the previous contents or the new ones, never a
/// partial write.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let write_err = |detail: String| CoreError::Write {
        path: path.to_path_buf(),
        detail,
    };

    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| write_err(format!("creating directory: {e}")))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| write_err(format!("creating temp file: {e}")))?;
    tmp.write_all(data)
        .map_err(|e| write_err(format!("writing temp file: {e}")))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| write_err(format!("syncing temp file: {e}")))?;
    tmp.persist(path)
        .map_err(|e| write_err(format!("renaming into place: {}", e.error)))?;
    Ok(())
}
