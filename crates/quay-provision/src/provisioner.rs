//! Provisioning engine seam.

use std::path::{Path, PathBuf};

use quay_core::{fs::write_atomic, ContentHash, Coordinate};
use tracing::debug;

use crate::config::TrackedFile;
use crate::error::{io_err, Result};

/// A verified artifact ready to be laid out, backed by its cached copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedArtifact {
    pub coordinate: Coordinate,
    /// Absolute path of the cached bytes.
    pub path: PathBuf,
}

/// Lays out artifacts inside an installation.
pub trait Provisioner {
    /// Place `artifacts` under `root` and report every file written.
    fn provision(&self, root: &Path, artifacts: &[ProvisionedArtifact]) -> Result<Vec<TrackedFile>>;
}

/// Copies each artifact into one directory under its stored file name.
#[derive(Debug, Clone)]
pub struct CopyProvisioner {
    target: String,
}

impl CopyProvisioner {
    /// `target` is relative to the installation root, `/` separated.
    pub fn new(target: impl Into<String>) -> Self {
        CopyProvisioner {
            target: target.into(),
        }
    }
}

impl Default for CopyProvisioner {
    fn default() -> Self {
        CopyProvisioner::new("modules")
    }
}

impl Provisioner for CopyProvisioner {
    fn provision(&self, root: &Path, artifacts: &[ProvisionedArtifact]) -> Result<Vec<TrackedFile>> {
        let mut tracked = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let relative = format!("{}/{}", self.target, artifact.coordinate.file_name());
            let target = root.join(&relative);
            let data = std::fs::read(&artifact.path).map_err(|e| io_err(&artifact.path, e))?;
            write_atomic(&target, &data)?;
            debug!(coordinate = %artifact.coordinate, path = %relative, "provisioned artifact");
            tracked.push(TrackedFile {
                path: relative,
                hash: ContentHash::compute(&data),
                coordinate: Some(artifact.coordinate.clone()),
            });
        }
        Ok(tracked)
    }
}
