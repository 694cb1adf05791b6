//! Installation handle and the staged install/update/rollback pipeline.
//!
//! Every mutating operation runs in two phases. Staging resolves channel
//! versions, manifests and artifacts (cache first, then repositories) and
//! verifies every signature. Nothing is written until staging succeeded and
//! the downgrade veto passed; the write phase then fills the cache,
//! provisions files, persists the state files, imports accepted certificates
//! and appends exactly one revision.
//!
//! The write phase is not transactional. If it fails part way, cached
//! artifacts and provisioned files may already be in place without a
//! matching revision, and the next update or rollback reconciles them. The
//! trust store is only changed once every other write succeeded.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use quay_cache::{ArtifactCache, Provenance};
use quay_core::{
    Channel, ChannelVersion, ChannelVersionChange, Coordinate, Manifest, METADATA_DIR,
};
use quay_history::{compare, Revision, RevisionDiff, RevisionKind, RevisionLog, Snapshot, HISTORY_DIR};
use quay_trust::{
    CertificateAcceptor, CertificateSource, CryptoBackend, FileCertificateSource, PendingImports,
    TrustPolicy, TrustStore, VerificationItem, VerificationSession, KEYRING_FILE,
};
use tracing::{debug, info, warn};

use crate::config::{
    self, InstallationConfig, TrackedFile, CONFIG_FILE, INSTALLED_FILE, MANIFESTS_FILE,
    VERSIONS_FILE,
};
use crate::error::{io_err, ProvisionError, Result};
use crate::lock::InstallLock;
use crate::origin::{self, VerificationReport};
use crate::provisioner::{ProvisionedArtifact, Provisioner};
use crate::reconcile;
use crate::repository::ArtifactResolver;

/// External collaborators used by mutating operations.
#[derive(Clone, Copy)]
pub struct Services<'a> {
    pub resolver: &'a dyn ArtifactResolver,
    pub provisioner: &'a dyn Provisioner,
    /// Asked about signers seen for the first time.
    pub acceptor: &'a dyn CertificateAcceptor,
    /// Where candidate certificates are fetched from.
    pub certificates: &'a dyn CertificateSource,
}

impl<'a> Services<'a> {
    /// Collaborators with certificates read from `file:` locations.
    pub fn new(
        resolver: &'a dyn ArtifactResolver,
        provisioner: &'a dyn Provisioner,
        acceptor: &'a dyn CertificateAcceptor,
    ) -> Self {
        Services {
            resolver,
            provisioner,
            acceptor,
            certificates: &FileCertificateSource,
        }
    }

    pub fn with_certificate_source(mut self, certificates: &'a dyn CertificateSource) -> Self {
        self.certificates = certificates;
        self
    }
}

/// Options for committing an update.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    /// Accept channel versions older than the installed ones.
    pub allow_downgrade: bool,
}

#[derive(Debug, Clone)]
struct StagedArtifact {
    item: VerificationItem,
    /// Verified cached copy; `None` for bytes fetched from a repository.
    cached: Option<PathBuf>,
    provenance: Provenance,
    is_manifest: bool,
}

/// A fully resolved and verified change, not yet written.
#[derive(Debug)]
pub struct StagedUpdate {
    kind: RevisionKind,
    changes: Vec<ChannelVersionChange>,
    config: InstallationConfig,
    versions: BTreeMap<String, ChannelVersion>,
    manifests: BTreeMap<String, Manifest>,
    artifacts: Vec<StagedArtifact>,
    imports: PendingImports,
}

impl StagedUpdate {
    /// Channel version changes relative to the installed state.
    pub fn changes(&self) -> &[ChannelVersionChange] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn downgrades(&self) -> impl Iterator<Item = &ChannelVersionChange> {
        self.changes.iter().filter(|c| c.is_downgrade())
    }

    pub fn is_downgrade(&self) -> bool {
        self.downgrades().next().is_some()
    }

    /// Channel versions the installation would move to.
    pub fn channel_versions(&self) -> &BTreeMap<String, ChannelVersion> {
        &self.versions
    }

    pub fn manifests(&self) -> &BTreeMap<String, Manifest> {
        &self.manifests
    }

    /// Coordinates of every staged artifact, manifests included.
    pub fn artifacts(&self) -> impl Iterator<Item = &Coordinate> {
        self.artifacts.iter().map(|a| &a.item.coordinate)
    }

    /// Certificates that will be imported on commit.
    pub fn pending_imports(&self) -> usize {
        self.imports.len()
    }
}

enum Target<'s> {
    /// Move every channel to what its manifest source offers now.
    Discover,
    /// Restore the channel versions and manifests of a snapshot.
    Recorded(&'s Snapshot),
}

/// An open installation. Holds the installation lock until dropped.
#[derive(Debug)]
pub struct Installation {
    root: PathBuf,
    metadata_dir: PathBuf,
    config: InstallationConfig,
    versions: BTreeMap<String, ChannelVersion>,
    manifests: BTreeMap<String, Manifest>,
    installed: Vec<TrackedFile>,
    cache: ArtifactCache,
    trust: TrustStore,
    history: RevisionLog,
    _lock: InstallLock,
}

impl Installation {
    /// Provision a new installation at `root` from `config`.
    pub fn install(
        root: &Path,
        config: InstallationConfig,
        backend: Arc<dyn CryptoBackend>,
        services: Services<'_>,
    ) -> Result<Installation> {
        config.validate()?;
        let metadata_dir = root.join(METADATA_DIR);
        std::fs::create_dir_all(&metadata_dir).map_err(|e| io_err(&metadata_dir, e))?;
        let root = root.canonicalize().map_err(|e| io_err(root, e))?;
        let metadata_dir = root.join(METADATA_DIR);

        let lock = InstallLock::acquire(&metadata_dir)?;
        let history = RevisionLog::open(&metadata_dir.join(HISTORY_DIR))?;
        if history.latest().is_some() {
            return Err(ProvisionError::AlreadyInstalled { path: root });
        }
        let mut installation = Installation {
            cache: ArtifactCache::open(&root)?,
            trust: TrustStore::open(&metadata_dir.join(KEYRING_FILE), backend)?,
            root,
            metadata_dir,
            config: config.clone(),
            versions: BTreeMap::new(),
            manifests: BTreeMap::new(),
            installed: Vec::new(),
            history,
            _lock: lock,
        };

        let staged = installation.stage(RevisionKind::Install, config, Target::Discover, services)?;
        installation.commit(staged, services, UpdateOptions::default())?;
        Ok(installation)
    }

    /// Open an existing installation, taking its lock.
    pub fn open(root: &Path, backend: Arc<dyn CryptoBackend>) -> Result<Installation> {
        let not_installed = || ProvisionError::NotInstalled {
            path: root.to_path_buf(),
        };
        let root = root.canonicalize().map_err(|_| not_installed())?;
        let metadata_dir = root.join(METADATA_DIR);
        if !metadata_dir.is_dir() {
            return Err(not_installed());
        }

        let lock = InstallLock::acquire(&metadata_dir)?;
        let history = RevisionLog::open(&metadata_dir.join(HISTORY_DIR))?;
        if history.latest().is_none() {
            return Err(not_installed());
        }
        let installation = Installation {
            config: InstallationConfig::load(&metadata_dir.join(CONFIG_FILE))?,
            versions: config::read_versions(&metadata_dir.join(VERSIONS_FILE))?,
            manifests: config::read_manifests(&metadata_dir.join(MANIFESTS_FILE))?,
            installed: config::read_installed(&metadata_dir.join(INSTALLED_FILE))?,
            cache: ArtifactCache::open(&root)?,
            trust: TrustStore::open(&metadata_dir.join(KEYRING_FILE), backend)?,
            history,
            root,
            metadata_dir,
            _lock: lock,
        };
        debug!(root = %installation.root.display(), "opened installation");
        Ok(installation)
    }

    /// Resolve and verify an update without writing anything.
    pub fn prepare_update(&self, services: Services<'_>) -> Result<StagedUpdate> {
        self.stage(RevisionKind::Update, self.config.clone(), Target::Discover, services)
    }

    /// Write a staged change and record its revision.
    ///
    /// An update that downgrades a channel is refused unless
    /// `options.allow_downgrade` is set; rollbacks are never refused.
    pub fn commit(
        &mut self,
        staged: StagedUpdate,
        services: Services<'_>,
        options: UpdateOptions,
    ) -> Result<Revision> {
        if staged.kind == RevisionKind::Update && staged.is_downgrade() && !options.allow_downgrade {
            let changes: Vec<_> = staged.downgrades().cloned().collect();
            warn!(channels = changes.len(), "refusing to downgrade");
            return Err(ProvisionError::Downgrade { changes });
        }

        let mut provisioned = Vec::new();
        for artifact in &staged.artifacts {
            let coordinate = &artifact.item.coordinate;
            let path = match &artifact.cached {
                Some(path) => {
                    self.cache.set_provenance(coordinate, artifact.provenance)?;
                    path.clone()
                }
                None => {
                    let data = &artifact.item.data;
                    let path = self.cache.cache_bytes(coordinate, data, artifact.provenance)?;
                    if let Some(signature) = &artifact.item.signature {
                        self.cache.cache_signature(coordinate, signature)?;
                    }
                    path
                }
            };
            if !artifact.is_manifest {
                provisioned.push(ProvisionedArtifact {
                    coordinate: coordinate.clone(),
                    path,
                });
            }
        }

        let tracked = services.provisioner.provision(&self.root, &provisioned)?;
        let installed = self.merge_tracked(tracked)?;

        config::write_state(&self.metadata_dir.join(CONFIG_FILE), &staged.config)?;
        config::write_state(&self.metadata_dir.join(MANIFESTS_FILE), &staged.manifests)?;
        config::write_state(&self.metadata_dir.join(VERSIONS_FILE), &staged.versions)?;
        config::write_installed(&self.metadata_dir.join(INSTALLED_FILE), &installed)?;

        let imported = staged.imports.commit(&mut self.trust)?;
        for info in &imported {
            info!(key_id = %info.key_id, "trusted new signer");
        }

        let snapshot = Snapshot {
            channels: staged.config.channels.clone(),
            channel_versions: staged.versions.clone(),
            manifests: staged.manifests.clone(),
            config_hash: Some(staged.config.hash()?),
        };
        let revision = self.history.append(staged.kind, &snapshot)?;

        self.config = staged.config;
        self.versions = staged.versions;
        self.manifests = staged.manifests;
        self.installed = installed;
        info!(
            kind = %revision.kind,
            id = %revision.short_id(),
            changes = staged.changes.len(),
            artifacts = provisioned.len(),
            "committed installation change"
        );
        Ok(revision)
    }

    /// Stage and commit an update. `None` when every channel is current.
    pub fn update(
        &mut self,
        services: Services<'_>,
        options: UpdateOptions,
    ) -> Result<Option<Revision>> {
        let staged = self.prepare_update(services)?;
        if staged.is_empty() {
            info!("installation is up to date");
            return Ok(None);
        }
        self.commit(staged, services, options).map(Some)
    }

    /// Restore the channels, channel versions and manifests of an earlier
    /// revision, re-resolving everything from the cache or repositories.
    pub fn rollback(&mut self, revision_id: &str, services: Services<'_>) -> Result<Revision> {
        let revision = self.history.revision(revision_id)?.clone();
        let snapshot = self.history.snapshot(&revision)?;
        let config = InstallationConfig {
            channels: snapshot.channels.clone(),
            settings: self.config.settings.clone(),
        };
        info!(target_revision = %revision.short_id(), "rolling back");
        let staged = self.stage(
            RevisionKind::Rollback,
            config,
            Target::Recorded(&snapshot),
            services,
        )?;
        self.commit(staged, services, UpdateOptions::default())
    }

    /// Replace the channel configuration and record it.
    ///
    /// Channel versions are not re-resolved until the next update.
    pub fn change_config(&mut self, config: InstallationConfig) -> Result<Revision> {
        config.validate()?;
        let snapshot = Snapshot {
            channels: config.channels.clone(),
            channel_versions: self.versions.clone(),
            manifests: self.manifests.clone(),
            config_hash: Some(config.hash()?),
        };
        config::write_state(&self.metadata_dir.join(CONFIG_FILE), &config)?;
        let revision = self.history.append(RevisionKind::ConfigChange, &snapshot)?;
        self.config = config;
        info!(id = %revision.short_id(), "configuration changed");
        Ok(revision)
    }

    /// All revisions, oldest first.
    pub fn revisions(&self) -> &[Revision] {
        self.history.revisions()
    }

    /// Differences between `revision_id` and the current state.
    pub fn compare(&self, revision_id: &str) -> Result<RevisionDiff> {
        let revision = self.history.revision(revision_id)?;
        let old = self.history.snapshot(revision)?;
        Ok(compare(&old, &self.current_snapshot()))
    }

    /// Audit installed files against the cache, the tracked file list and
    /// the trust store.
    pub fn verify_origin(&self) -> Result<VerificationReport> {
        origin::verify_origin(
            &self.root,
            &self.cache,
            &self.trust,
            &self.installed,
            &self.config.settings,
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &InstallationConfig {
        &self.config
    }

    pub fn channel_versions(&self) -> &BTreeMap<String, ChannelVersion> {
        &self.versions
    }

    pub fn manifests(&self) -> &BTreeMap<String, Manifest> {
        &self.manifests
    }

    pub fn tracked_files(&self) -> &[TrackedFile] {
        &self.installed
    }

    pub fn trust(&self) -> &TrustStore {
        &self.trust
    }

    pub fn trust_mut(&mut self) -> &mut TrustStore {
        &mut self.trust
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Release the installation lock.
    pub fn close(self) {
        debug!(root = %self.root.display(), "closed installation");
    }

    fn current_snapshot(&self) -> Snapshot {
        Snapshot {
            channels: self.config.channels.clone(),
            channel_versions: self.versions.clone(),
            manifests: self.manifests.clone(),
            config_hash: self.config.hash().ok(),
        }
    }

    fn stage(
        &self,
        kind: RevisionKind,
        config: InstallationConfig,
        target: Target<'_>,
        services: Services<'_>,
    ) -> Result<StagedUpdate> {
        let mut versions = BTreeMap::new();
        let mut manifests = BTreeMap::new();
        let mut artifacts: Vec<StagedArtifact> = Vec::new();
        let mut seen = BTreeSet::new();
        let mut missing = BTreeSet::new();

        for channel in &config.channels {
            let policy = TrustPolicy::for_channel(channel);
            let unavailable = |detail: &str| ProvisionError::ChannelUnavailable {
                channel: channel.name.clone(),
                detail: detail.to_string(),
            };

            let (version, fetched) = match &target {
                Target::Discover => {
                    let discovered = reconcile::discover(channel, services.resolver)?;
                    (discovered.version, discovered.manifest_bytes)
                }
                Target::Recorded(snapshot) => {
                    let version = snapshot
                        .channel_versions
                        .get(&channel.name)
                        .cloned()
                        .ok_or_else(|| unavailable("no recorded version"))?;
                    (version, None)
                }
            };

            let manifest = if let Some(coordinate) = version.manifest_coordinate() {
                match self.fetch(&coordinate, channel, policy, services)? {
                    Some(mut artifact) => {
                        let manifest = Manifest::from_bytes(&artifact.item.data)?;
                        if seen.insert(coordinate) {
                            artifact.is_manifest = true;
                            artifacts.push(artifact);
                        }
                        manifest
                    }
                    None => {
                        missing.insert(coordinate);
                        continue;
                    }
                }
            } else if matches!(version, ChannelVersion::Url { .. }) {
                match (fetched, &target) {
                    (Some(bytes), _) => Manifest::from_bytes(&bytes)?,
                    (None, Target::Recorded(snapshot)) => snapshot
                        .manifests
                        .get(&channel.name)
                        .cloned()
                        .ok_or_else(|| unavailable("no recorded manifest"))?,
                    (None, Target::Discover) => return Err(unavailable("manifest not fetched")),
                }
            } else {
                versions.insert(channel.name.clone(), version);
                continue;
            };

            for stream in &manifest.streams {
                let coordinate = stream.coordinate();
                coordinate.validate()?;
                if !seen.insert(coordinate.clone()) {
                    continue;
                }
                match self.fetch(&coordinate, channel, policy, services)? {
                    Some(artifact) => artifacts.push(artifact),
                    None => {
                        missing.insert(coordinate);
                    }
                }
            }
            versions.insert(channel.name.clone(), reconcile::with_logical(version, &manifest));
            manifests.insert(channel.name.clone(), manifest);
        }

        if !missing.is_empty() {
            let missing: Vec<Coordinate> = missing.into_iter().collect();
            warn!(count = missing.len(), "unresolved metadata");
            return Err(ProvisionError::UnresolvedMetadata { missing });
        }

        let items: Vec<VerificationItem> = artifacts.iter().map(|a| a.item.clone()).collect();
        let mut session = VerificationSession::new(&self.trust, services.certificates)
            .with_acceptor(services.acceptor);
        let checks = session.verify_all(&items, config.settings.verify_threads)?;
        for (item, check) in items.iter().zip(checks) {
            check.into_result(&item.coordinate)?;
        }
        let imports = session.finish();

        let changes = reconcile::reconcile(&self.versions, &versions);
        debug!(
            kind = %kind,
            changes = changes.len(),
            artifacts = artifacts.len(),
            "staged installation change"
        );
        Ok(StagedUpdate {
            kind,
            changes,
            config,
            versions,
            manifests,
            artifacts,
            imports,
        })
    }

    /// Cached copy first, then the channel's repositories.
    fn fetch(
        &self,
        coordinate: &Coordinate,
        channel: &Channel,
        policy: TrustPolicy,
        services: Services<'_>,
    ) -> Result<Option<StagedArtifact>> {
        let item = |data: Vec<u8>, signature: Option<Vec<u8>>, policy: TrustPolicy| {
            VerificationItem {
                coordinate: coordinate.clone(),
                data,
                signature,
                policy,
                gpg_urls: channel.gpg_urls.clone(),
            }
        };

        if let Some(entry) = self.cache.lookup_entry(coordinate) {
            let path = entry.resolve(self.cache.root());
            let data = std::fs::read(&path).map_err(|e| io_err(&path, e))?;
            // Artifacts copied from a local repository were never signed.
            let (policy, provenance) = match (entry.provenance, policy) {
                (Provenance::Local, _) => (TrustPolicy::Unchecked, Provenance::Local),
                (_, TrustPolicy::Required) => (policy, Provenance::Signed),
                (recorded, _) => (policy, recorded),
            };
            debug!(%coordinate, %provenance, "using cached artifact");
            return Ok(Some(StagedArtifact {
                item: item(data, self.cache.lookup_signature(coordinate), policy),
                cached: Some(path),
                provenance,
                is_manifest: false,
            }));
        }

        let Some(resolved) = services.resolver.resolve(coordinate, &channel.repositories)? else {
            return Ok(None);
        };
        let (policy, provenance) = if resolved.repository.is_local() {
            (TrustPolicy::Unchecked, Provenance::Local)
        } else if policy == TrustPolicy::Required {
            (policy, Provenance::Signed)
        } else {
            (policy, Provenance::Unverified)
        };
        Ok(Some(StagedArtifact {
            item: item(resolved.data, resolved.signature, policy),
            cached: None,
            provenance,
            is_manifest: false,
        }))
    }

    /// New tracked set: freshly provisioned files plus previously tracked
    /// plain files. Artifact files no longer provisioned are deleted unless
    /// they were modified after provisioning.
    fn merge_tracked(&self, tracked: Vec<TrackedFile>) -> Result<Vec<TrackedFile>> {
        let paths: BTreeSet<&str> = tracked.iter().map(|f| f.path.as_str()).collect();
        let mut kept = Vec::new();
        for old in &self.installed {
            if paths.contains(old.path.as_str()) {
                continue;
            }
            if old.coordinate.is_none() {
                kept.push(old.clone());
                continue;
            }
            let path = self.root.join(&old.path);
            if old.hash.matches_file(&path) {
                std::fs::remove_file(&path).map_err(|e| io_err(&path, e))?;
                debug!(path = %old.path, "removed superseded artifact");
            } else if path.exists() {
                warn!(path = %old.path, "superseded artifact was modified, leaving it in place");
            }
        }
        kept.extend(tracked);
        kept.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(kept)
    }
}
