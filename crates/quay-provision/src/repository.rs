//! Repository client seam and the local filesystem implementation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use quay_core::{fs::write_atomic, version, Coordinate, Repository};
use tracing::debug;

use crate::error::{io_err, ProvisionError, Result};

const SIGNATURE_SUFFIX: &str = ".sig";

/// An artifact fetched from a repository.
#[derive(Debug, Clone)]
pub struct ResolvedArtifact {
    pub data: Vec<u8>,
    /// Detached signature published next to the artifact, if any.
    pub signature: Option<Vec<u8>>,
    /// Repository that supplied the artifact.
    pub repository: Repository,
}

/// Abstract repository client.
///
/// Implementations perform whatever I/O is needed; a missing artifact is
/// `Ok(None)`, an `Err` means the client itself failed.
pub trait ArtifactResolver {
    /// Fetch `coordinate` from the first of `repositories` that has it.
    fn resolve(
        &self,
        coordinate: &Coordinate,
        repositories: &[Repository],
    ) -> Result<Option<ResolvedArtifact>>;

    /// Highest version of `artifact` across `repositories`; the version
    /// field of `artifact` is ignored.
    fn latest_version(
        &self,
        artifact: &Coordinate,
        repositories: &[Repository],
    ) -> Result<Option<String>>;

    /// Fetch the document at `url`.
    fn fetch_url(&self, url: &str) -> Result<Option<Vec<u8>>>;
}

/// Repositories backed by local directories, keyed by repository id.
///
/// Layout:
/// ```text
/// <root>/
///   <namespace segments>/<name>/<version>/
///     <name>-<version>[-<qualifier>].<type>
///     <name>-<version>[-<qualifier>].<type>.sig
/// ```
#[derive(Debug, Clone, Default)]
pub struct LocalRepository {
    roots: BTreeMap<String, PathBuf>,
}

impl LocalRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: serve repository `id` from `root`.
    pub fn with_root(mut self, id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        self.roots.insert(id.into(), root.into());
        self
    }

    pub fn root(&self, id: &str) -> Option<&Path> {
        self.roots.get(id).map(PathBuf::as_path)
    }

    fn stream_dir(root: &Path, coordinate: &Coordinate) -> PathBuf {
        coordinate
            .namespace
            .split('.')
            .fold(root.to_path_buf(), |p, s| p.join(s))
            .join(&coordinate.name)
    }

    fn artifact_dir(root: &Path, coordinate: &Coordinate) -> PathBuf {
        Self::stream_dir(root, coordinate).join(&coordinate.version)
    }

    fn artifact_path(root: &Path, coordinate: &Coordinate) -> PathBuf {
        Self::artifact_dir(root, coordinate).join(coordinate.file_name())
    }

    /// Publish an artifact (and optional signature) into repository `id`.
    pub fn publish(
        &self,
        id: &str,
        coordinate: &Coordinate,
        data: &[u8],
        signature: Option<&[u8]>,
    ) -> Result<PathBuf> {
        let root = self.roots.get(id).ok_or_else(|| ProvisionError::Repository {
            detail: format!("unknown repository '{id}'"),
        })?;
        let path = Self::artifact_path(root, coordinate);
        write_atomic(&path, data)?;
        if let Some(signature) = signature {
            write_atomic(&signature_path(&path), signature)?;
        }
        Ok(path)
    }

    /// Remove an artifact from repository `id`. Returns false if absent.
    pub fn withdraw(&self, id: &str, coordinate: &Coordinate) -> Result<bool> {
        let Some(root) = self.roots.get(id) else {
            return Ok(false);
        };
        let dir = Self::artifact_dir(root, coordinate);
        if !dir.is_dir() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        Ok(true)
    }
}

fn signature_path(path: &Path) -> PathBuf {
    let mut p = path.as_os_str().to_owned();
    p.push(SIGNATURE_SUFFIX);
    PathBuf::from(p)
}

impl ArtifactResolver for LocalRepository {
    fn resolve(
        &self,
        coordinate: &Coordinate,
        repositories: &[Repository],
    ) -> Result<Option<ResolvedArtifact>> {
        for repository in repositories {
            let Some(root) = self.roots.get(&repository.id) else {
                continue;
            };
            let path = Self::artifact_path(root, coordinate);
            if !path.is_file() {
                continue;
            }
            let data = std::fs::read(&path).map_err(|e| io_err(&path, e))?;
            let signature = std::fs::read(signature_path(&path)).ok();
            debug!(%coordinate, repository = %repository.id, "resolved artifact");
            return Ok(Some(ResolvedArtifact {
                data,
                signature,
                repository: repository.clone(),
            }));
        }
        debug!(%coordinate, "artifact not found in any repository");
        Ok(None)
    }

    fn latest_version(
        &self,
        artifact: &Coordinate,
        repositories: &[Repository],
    ) -> Result<Option<String>> {
        let mut versions = Vec::new();
        for repository in repositories {
            let Some(root) = self.roots.get(&repository.id) else {
                continue;
            };
            let stream_dir = Self::stream_dir(root, artifact);
            let Ok(entries) = std::fs::read_dir(&stream_dir) else {
                continue;
            };
            for entry in entries {
                let entry = entry.map_err(|e| io_err(&stream_dir, e))?;
                let Some(version) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                let candidate = artifact.with_version(&version);
                if Self::artifact_path(root, &candidate).is_file() {
                    versions.push(version);
                }
            }
        }
        Ok(version::latest(versions.iter().map(String::as_str)).map(str::to_string))
    }

    fn fetch_url(&self, url: &str) -> Result<Option<Vec<u8>>> {
        let Some(path) = url
            .strip_prefix("file://")
            .or_else(|| url.strip_prefix("file:"))
        else {
            debug!(url, "only file: URLs are served locally");
            return Ok(None);
        };
        match std::fs::read(path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(Path::new(path), e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coord(version: &str) -> Coordinate {
        Coordinate::new("org.example", "core", "jar", version)
    }

    #[test]
    fn publish_resolve_withdraw() {
        let dir = tempfile::tempdir().unwrap();
        let repo = LocalRepository::new().with_root("central", dir.path());
        let repos = [Repository::new("central", "https://repo.example.org")];

        repo.publish("central", &coord("1.0.0"), b"jar", Some(b"sig"))
            .unwrap();
        let found = repo.resolve(&coord("1.0.0"), &repos).unwrap().unwrap();
        assert_eq!(found.data, b"jar");
        assert_eq!(found.signature.as_deref(), Some(&b"sig"[..]));
        assert_eq!(found.repository.id, "central");

        assert!(repo.withdraw("central", &coord("1.0.0")).unwrap());
        assert!(repo.resolve(&coord("1.0.0"), &repos).unwrap().is_none());
        assert!(!repo.withdraw("central", &coord("1.0.0")).unwrap());
    }

    #[test]
    fn first_repository_wins() {
        let (a, b) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
        let repo = LocalRepository::new()
            .with_root("a", a.path())
            .with_root("b", b.path());
        repo.publish("b", &coord("1.0.0"), b"from b", None).unwrap();
        let repos = [Repository::new("a", "file:/a"), Repository::new("b", "file:/b")];
        let found = repo.resolve(&coord("1.0.0"), &repos).unwrap().unwrap();
        assert_eq!(found.repository.id, "b");
        assert!(found.signature.is_none());

        repo.publish("a", &coord("1.0.0"), b"from a", None).unwrap();
        let found = repo.resolve(&coord("1.0.0"), &repos).unwrap().unwrap();
        assert_eq!(found.data, b"from a");
    }

    #[test]
    fn latest_version_across_repositories() {
        let (a, b) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
        let repo = LocalRepository::new()
            .with_root("a", a.path())
            .with_root("b", b.path());
        let repos = [Repository::new("a", "file:/a"), Repository::new("b", "file:/b")];
        assert_eq!(repo.latest_version(&coord(""), &repos).unwrap(), None);

        repo.publish("a", &coord("1.0.9"), b"x", None).unwrap();
        repo.publish("b", &coord("1.0.10"), b"x", None).unwrap();
        repo.publish("a", &coord("1.0.0.Beta1"), b"x", None).unwrap();
        assert_eq!(
            repo.latest_version(&coord(""), &repos).unwrap().as_deref(),
            Some("1.0.10")
        );
    }

    #[test]
    fn fetch_file_urls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.toml");
        std::fs::write(&path, b"doc").unwrap();
        let repo = LocalRepository::new();
        let url = format!("file:{}", path.display());
        assert_eq!(repo.fetch_url(&url).unwrap().as_deref(), Some(&b"doc"[..]));
        assert_eq!(repo.fetch_url("https://example.org/m.toml").unwrap(), None);
        let missing = format!("file:{}", dir.path().join("nope").display());
        assert_eq!(repo.fetch_url(&missing).unwrap(), None);
    }
}
