//! The artifact cache handle.
//!
//! Layout:
//! ```text
//! <install>/.installation/.cache/
//!   artifacts.txt                      index
//!   <namespace segments>/<name>/<version>/
//!     <name>-<version>[-<qualifier>].<type>
//!     <name>-<version>[-<qualifier>].<type>.sig
//! ```
//!
//! Index entries may also point at files elsewhere in the installation
//! (an artifact the provisioning engine laid out directly), which avoids
//! storing the same bytes twice.

use std::path::{Component, Path, PathBuf};

use parking_lot::RwLock;
use quay_core::{fs::write_atomic, ContentHash, Coordinate, METADATA_DIR};
use tracing::{debug, info};

use crate::error::{CacheError, Result};
use crate::index::{self, CachedEntry, Index, Provenance};

/// Cache directory name inside the metadata directory.
pub const CACHE_DIR: &str = ".cache";

/// Index file name inside the cache directory.
pub const INDEX_FILE: &str = "artifacts.txt";

const SIGNATURE_SUFFIX: &str = ".sig";

/// A local artifact cache bound to one installation.
///
/// Lookups share a read lock; index mutation holds the write lock until the
/// index has been persisted and reloaded.
#[derive(Debug)]
pub struct ArtifactCache {
    root: PathBuf,
    cache_dir: PathBuf,
    index_path: PathBuf,
    index: RwLock<Index>,
}

impl ArtifactCache {
    /// Open the cache of the installation at `install_dir`.
    ///
    /// A missing index is an empty cache; an unparsable one is an error and
    /// is left untouched on disk.
    pub fn open(install_dir: &Path) -> Result<Self> {
        let root = install_dir
            .canonicalize()
            .map_err(|e| io_err(install_dir, "resolving installation", e))?;
        let cache_dir = root.join(METADATA_DIR).join(CACHE_DIR);
        let index_path = cache_dir.join(INDEX_FILE);
        let index = read_index(&index_path)?;
        debug!(path = %index_path.display(), entries = index.len(), "opened artifact cache");
        Ok(ArtifactCache {
            root,
            cache_dir,
            index_path,
            index: RwLock::new(index),
        })
    }

    /// Installation root this cache belongs to.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory managed by the cache.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Return the cached file for `coordinate` if it still matches its hash.
    pub fn lookup(&self, coordinate: &Coordinate) -> Option<PathBuf> {
        self.lookup_entry(coordinate)
            .map(|entry| entry.resolve(&self.root))
    }

    /// Like [`lookup`](Self::lookup), returning the whole index entry.
    pub fn lookup_entry(&self, coordinate: &Coordinate) -> Option<CachedEntry> {
        let index = self.index.read();
        let entry = index.get(coordinate)?;
        let path = entry.resolve(&self.root);
        if entry.hash.matches_file(&path) {
            Some(entry.clone())
        } else {
            debug!(%coordinate, path = %path.display(), "cached file missing or modified, treating as miss");
            None
        }
    }

    /// Record that `path` holds the bytes of `coordinate`.
    ///
    /// Replaces any earlier entry for the same coordinate.
    pub fn record(
        &self,
        coordinate: &Coordinate,
        path: &Path,
        provenance: Provenance,
    ) -> Result<()> {
        let mut index = self.index.write();
        self.record_locked(&mut index, coordinate, path, provenance)
    }

    /// Copy `source` into the managed cache directory and record it.
    pub fn cache(
        &self,
        coordinate: &Coordinate,
        source: &Path,
        provenance: Provenance,
    ) -> Result<PathBuf> {
        let data = std::fs::read(source).map_err(|e| io_err(source, "reading artifact", e))?;
        self.cache_bytes(coordinate, &data, provenance)
    }

    /// Write fetched bytes into the managed cache directory and record them.
    pub fn cache_bytes(
        &self,
        coordinate: &Coordinate,
        data: &[u8],
        provenance: Provenance,
    ) -> Result<PathBuf> {
        check_coordinate(coordinate)?;
        let mut index = self.index.write();
        let target = self.artifact_path(coordinate);
        write_atomic(&target, data)?;
        self.record_locked(&mut index, coordinate, &target, provenance)?;
        Ok(target)
    }

    /// Change how an existing entry is marked. Returns false when nothing
    /// was recorded for `coordinate`.
    pub fn set_provenance(&self, coordinate: &Coordinate, provenance: Provenance) -> Result<bool> {
        let mut index = self.index.write();
        let Some(entry) = index.get(coordinate) else {
            return Ok(false);
        };
        if entry.provenance == provenance {
            return Ok(true);
        }
        let mut updated = index.clone();
        if let Some(entry) = updated.get_mut(coordinate) {
            entry.provenance = provenance;
        }
        self.persist_locked(&mut index, updated)?;
        debug!(%coordinate, %provenance, "updated cache entry provenance");
        Ok(true)
    }

    /// Store a detached signature next to the cached artifact.
    pub fn cache_signature(&self, coordinate: &Coordinate, signature: &[u8]) -> Result<()> {
        let _guard = self.index.write();
        write_atomic(&self.signature_path(coordinate), signature)?;
        Ok(())
    }

    /// Detached signature stored for `coordinate`, if any.
    pub fn lookup_signature(&self, coordinate: &Coordinate) -> Option<Vec<u8>> {
        let _guard = self.index.read();
        std::fs::read(self.signature_path(coordinate)).ok()
    }

    /// Forget `coordinate`, deleting any copy owned by the cache directory.
    ///
    /// Returns false when nothing was recorded.
    pub fn remove(&self, coordinate: &Coordinate) -> Result<bool> {
        let mut index = self.index.write();
        let Some(entry) = index.get(coordinate).cloned() else {
            return Ok(false);
        };

        let mut updated = index.clone();
        updated.shift_remove(coordinate);
        self.persist_locked(&mut index, updated)?;

        let path = entry.resolve(&self.root);
        if path.starts_with(&self.cache_dir) {
            remove_if_present(&path)?;
        }
        remove_if_present(&self.signature_path(coordinate))?;
        info!(%coordinate, "removed cache entry");
        Ok(true)
    }

    /// Snapshot of every entry, in index order.
    pub fn entries(&self) -> Vec<CachedEntry> {
        self.index.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    fn record_locked(
        &self,
        index: &mut Index,
        coordinate: &Coordinate,
        path: &Path,
        provenance: Provenance,
    ) -> Result<()> {
        check_coordinate(coordinate)?;
        let relative = self.relative_path(path)?;
        let absolute = self.root.join(&relative);
        let hash =
            ContentHash::of_file(&absolute).map_err(|e| io_err(&absolute, "hashing artifact", e))?;

        let entry = CachedEntry {
            coordinate: coordinate.clone(),
            hash,
            provenance,
            path: to_index_path(&relative),
        };

        let mut updated = index.clone();
        if let Some(previous) = updated.shift_remove(coordinate) {
            if previous.hash != entry.hash {
                debug!(%coordinate, old = %previous.hash, new = %entry.hash, "replacing cache entry with different content");
            }
        }
        updated.insert(coordinate.clone(), entry);

        self.persist_locked(index, updated)?;
        info!(%coordinate, %provenance, path = %absolute.display(), "recorded cache entry");
        Ok(())
    }

    /// Replace the index file with `updated`, then reload it.
    ///
    /// The new text must parse back to exactly `updated`; otherwise the file
    /// on disk is not touched.
    fn persist_locked(&self, index: &mut Index, updated: Index) -> Result<()> {
        let text = index::format(&updated);
        match index::parse(&text) {
            Ok(reparsed) if reparsed == updated => {}
            Ok(_) => {
                return Err(CacheError::InvalidEntry {
                    coordinate: self.index_path.display().to_string(),
                    detail: "index does not read back as written".to_string(),
                })
            }
            Err((line, detail)) => {
                let coordinate = text
                    .lines()
                    .nth(line.saturating_sub(1))
                    .unwrap_or_default()
                    .to_string();
                return Err(CacheError::InvalidEntry { coordinate, detail });
            }
        }
        write_atomic(&self.index_path, text.as_bytes())?;
        *index = read_index(&self.index_path)?;
        Ok(())
    }

    fn relative_path(&self, path: &Path) -> Result<PathBuf> {
        let absolute = if path.is_absolute() {
            path.canonicalize()
                .map_err(|e| io_err(path, "resolving artifact", e))?
        } else {
            self.root.join(path)
        };
        let relative = absolute
            .strip_prefix(&self.root)
            .map_err(|_| CacheError::OutsideInstallation {
                path: path.to_path_buf(),
            })?;
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(CacheError::OutsideInstallation {
                path: path.to_path_buf(),
            });
        }
        Ok(relative.to_path_buf())
    }

    fn artifact_path(&self, coordinate: &Coordinate) -> PathBuf {
        coordinate
            .path_segments()
            .into_iter()
            .fold(self.cache_dir.clone(), |p, s| p.join(s))
            .join(coordinate.file_name())
    }

    fn signature_path(&self, coordinate: &Coordinate) -> PathBuf {
        let mut path = self.artifact_path(coordinate).into_os_string();
        path.push(SIGNATURE_SUFFIX);
        PathBuf::from(path)
    }
}

fn check_coordinate(coordinate: &Coordinate) -> Result<()> {
    coordinate
        .validate()
        .map_err(|e| CacheError::InvalidEntry {
            coordinate: coordinate.to_string(),
            detail: e.to_string(),
        })
}

fn read_index(path: &Path) -> Result<Index> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Index::new()),
        Err(e) => return Err(io_err(path, "reading index", e)),
    };
    index::parse(&text).map_err(|(line, detail)| CacheError::CorruptIndex {
        path: path.to_path_buf(),
        line,
        detail,
    })
}

fn to_index_path(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err(path, "removing file", e)),
    }
}

fn io_err(path: &Path, action: &str, e: std::io::Error) -> CacheError {
    CacheError::Io {
        path: path.to_path_buf(),
        detail: format!("{action}: {e}"),
    }
}
