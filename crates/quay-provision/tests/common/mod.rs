//! Shared fixture: an installation directory next to a signed repository
//! served from disk under a remote-looking URL.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use quay_core::channel::MANIFEST_KIND;
use quay_core::{Channel, Coordinate, Manifest, ManifestRef, Repository, Stream};
use quay_provision::{InstallationConfig, LocalRepository};
use quay_trust::{CryptoBackend, Ed25519Backend, KeyPair};
use walkdir::WalkDir;

pub const NAMESPACE: &str = "org.example";
pub const REPOSITORY: &str = "central";
/// Second repository root, configured with a `file:` URL where needed.
pub const MIRROR: &str = "mirror";
pub const CHANNEL: &str = "base";

pub struct World {
    _dir: tempfile::TempDir,
    pub install_root: PathBuf,
    pub repo: LocalRepository,
    pub signer: KeyPair,
    pub certificate_url: String,
}

impl World {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let install_root = dir.path().join("install");
        std::fs::create_dir_all(&install_root).expect("install root");
        let repo = LocalRepository::new()
            .with_root(REPOSITORY, dir.path().join("repo"))
            .with_root(MIRROR, dir.path().join("mirror"));

        let signer = KeyPair::from_seed(&[1; 32], "Release <release@example.org>");
        let certificate = dir.path().join("release.cert");
        std::fs::write(&certificate, signer.certificate()).expect("write certificate");

        World {
            certificate_url: format!("file:{}", certificate.display()),
            _dir: dir,
            install_root,
            repo,
            signer,
        }
    }

    pub fn backend(&self) -> Arc<dyn CryptoBackend> {
        Arc::new(Ed25519Backend)
    }

    /// One channel following the latest manifest, signatures required.
    pub fn config(&self) -> InstallationConfig {
        let channel = Channel::new(
            CHANNEL,
            ManifestRef::Coordinate {
                namespace: NAMESPACE.into(),
                name: CHANNEL.into(),
                version: None,
            },
        )
        .with_repository(Repository::new(REPOSITORY, "https://repo.example.org/releases"))
        .with_gpg_check(vec![self.certificate_url.clone()]);
        InstallationConfig::new(vec![channel])
    }

    pub fn component(name: &str, version: &str) -> Coordinate {
        Coordinate::new(NAMESPACE, name, "jar", version)
    }

    pub fn manifest(version: &str) -> Coordinate {
        Coordinate::new(NAMESPACE, CHANNEL, MANIFEST_KIND, version)
    }

    pub fn publish_component(&self, name: &str, version: &str, signer: &KeyPair) -> Coordinate {
        let coordinate = Self::component(name, version);
        let data = format!("{name} {version}\0").into_bytes();
        self.repo
            .publish(REPOSITORY, &coordinate, &data, Some(&signer.sign(&data)))
            .expect("publish component");
        coordinate
    }

    /// Publish manifest `version` listing `components` as (name, version).
    pub fn publish_manifest(&self, version: &str, components: &[(&str, &str)]) -> Coordinate {
        let manifest = components.iter().fold(
            Manifest::new(CHANNEL).with_logical_version(version),
            |m, (name, v)| m.with_stream(Stream::new(NAMESPACE, *name, *v)),
        );
        let data = manifest.to_toml().expect("manifest toml").into_bytes();
        let coordinate = Self::manifest(version);
        self.repo
            .publish(REPOSITORY, &coordinate, &data, Some(&self.signer.sign(&data)))
            .expect("publish manifest");
        coordinate
    }

    /// Publish every component with the release key, then the manifest.
    pub fn release(&self, version: &str, components: &[(&str, &str)]) {
        for (name, v) in components {
            self.publish_component(name, v, &self.signer);
        }
        self.publish_manifest(version, components);
    }

    pub fn installed(&self, relative: &str) -> bool {
        self.install_root.join(relative).is_file()
    }
}

/// Every file under `root` with its contents.
pub fn tree(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    WalkDir::new(root)
        .into_iter()
        .map(|e| e.expect("walk"))
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let relative = e.path().strip_prefix(root).expect("prefix").to_path_buf();
            (relative, std::fs::read(e.path()).expect("read"))
        })
        .collect()
}
