//! Origin audit of an installed tree.
//!
//! The expected file set is everything the provisioning engine tracked plus
//! every cache entry. Expected files that are gone are skipped. Files nobody
//! expects are flagged: binaries as unsigned, anything else as modified.
//! Tracked plain files that were edited are reported as modified only.
//! Artifacts that entered the cache without a signature check (local
//! repositories, channels without `gpg-check`) are held to their recorded
//! hash instead of a signature.

use std::collections::{BTreeSet, HashMap};
use std::io::Read;
use std::path::{Path, PathBuf};

use quay_cache::{ArtifactCache, Provenance};
use quay_core::{ContentHash, Coordinate, METADATA_DIR};
use quay_trust::{
    FileCertificateSource, SignatureCheckResult, TrustPolicy, TrustStore, VerificationItem,
    VerificationSession,
};
use serde::Serialize;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::{Settings, TrackedFile};
use crate::error::{io_err, ProvisionError, Result};

/// Bytes inspected when sniffing for binary content.
const SNIFF_LEN: usize = 8000;

/// A binary that failed signature verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidBinary {
    /// Path relative to the installation root.
    pub path: PathBuf,
    /// `None` for binaries the installation does not know about.
    pub coordinate: Option<Coordinate>,
    pub result: SignatureCheckResult,
    pub key_id: Option<String>,
}

/// Outcome of an origin audit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub invalid_binaries: Vec<InvalidBinary>,
    /// Non-binary files that differ from what was provisioned, or were added.
    pub modified_files: Vec<PathBuf>,
}

impl VerificationReport {
    pub fn is_clean(&self) -> bool {
        self.invalid_binaries.is_empty() && self.modified_files.is_empty()
    }
}

struct Candidate {
    path: PathBuf,
    coordinate: Option<Coordinate>,
    item: VerificationItem,
}

/// Audit the installation at `root`.
pub fn verify_origin(
    root: &Path,
    cache: &ArtifactCache,
    trust: &TrustStore,
    tracked: &[TrackedFile],
    settings: &Settings,
) -> Result<VerificationReport> {
    let mut expected = BTreeSet::new();
    let mut candidates = Vec::new();
    let mut report = VerificationReport::default();

    let entries = cache.entries();
    let provenance: HashMap<&Coordinate, Provenance> = entries
        .iter()
        .map(|e| (&e.coordinate, e.provenance))
        .collect();

    for entry in &entries {
        let absolute = entry.resolve(cache.root());
        let relative = PathBuf::from(&entry.path);
        expected.insert(relative.clone());
        let Some(data) = read_if_present(&absolute)? else {
            debug!(path = %relative.display(), "cached file missing, skipped");
            continue;
        };
        let audit = Audit {
            path: relative,
            coordinate: &entry.coordinate,
            provenance: entry.provenance,
            hash: &entry.hash,
            data,
        };
        audit.push(cache, &mut candidates, &mut report);
    }

    for file in tracked {
        let relative = PathBuf::from(&file.path);
        let first_seen = expected.insert(relative.clone());
        let Some(data) = read_if_present(&root.join(&relative))? else {
            debug!(path = %relative.display(), "tracked file missing, skipped");
            continue;
        };
        match &file.coordinate {
            // Same bytes already audited as a cache entry.
            Some(_) if !first_seen => {}
            Some(coordinate) => {
                let audit = Audit {
                    path: relative,
                    coordinate,
                    provenance: provenance
                        .get(coordinate)
                        .copied()
                        .unwrap_or(Provenance::Signed),
                    hash: &file.hash,
                    data,
                };
                audit.push(cache, &mut candidates, &mut report);
            }
            None if file.hash.verify(&data) => {}
            None if is_binary(&relative, &data, settings) => {
                report.invalid_binaries.push(unsigned(relative));
            }
            None => report.modified_files.push(relative),
        }
    }

    let metadata_dir = root.join(METADATA_DIR);
    for entry in WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.path() != metadata_dir)
    {
        let entry = entry.map_err(|e| ProvisionError::Io {
            path: e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf()),
            detail: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        if expected.contains(relative) {
            continue;
        }
        let relative = relative.to_path_buf();
        if is_binary(&relative, &sniff(entry.path())?, settings) {
            debug!(path = %relative.display(), "unmanaged binary");
            report.invalid_binaries.push(unsigned(relative));
        } else {
            report.modified_files.push(relative);
        }
    }

    let items: Vec<VerificationItem> = candidates.iter().map(|c| c.item.clone()).collect();
    let source = FileCertificateSource;
    let mut session = VerificationSession::new(trust, &source);
    let checks = session.verify_all(&items, settings.verify_threads)?;
    for (candidate, check) in candidates.into_iter().zip(checks) {
        if !check.is_ok() {
            report.invalid_binaries.push(InvalidBinary {
                path: candidate.path,
                coordinate: candidate.coordinate,
                result: check.result,
                key_id: check.key_id,
            });
        }
    }

    report.invalid_binaries.sort_by(|a, b| a.path.cmp(&b.path));
    report.invalid_binaries.dedup_by(|a, b| a.path == b.path);
    report.modified_files.sort();
    info!(
        invalid = report.invalid_binaries.len(),
        modified = report.modified_files.len(),
        "origin verification finished"
    );
    Ok(report)
}

/// One file that belongs to a known coordinate.
struct Audit<'a> {
    path: PathBuf,
    coordinate: &'a Coordinate,
    provenance: Provenance,
    hash: &'a ContentHash,
    data: Vec<u8>,
}

impl Audit<'_> {
    /// Queue a signature check, or compare against the recorded hash when
    /// the artifact was never signature checked.
    fn push(
        self,
        cache: &ArtifactCache,
        candidates: &mut Vec<Candidate>,
        report: &mut VerificationReport,
    ) {
        if self.provenance != Provenance::Signed {
            if !self.hash.verify(&self.data) {
                report.invalid_binaries.push(InvalidBinary {
                    path: self.path,
                    coordinate: Some(self.coordinate.clone()),
                    result: SignatureCheckResult::Invalid,
                    key_id: None,
                });
            }
            return;
        }
        candidates.push(Candidate {
            path: self.path,
            coordinate: Some(self.coordinate.clone()),
            item: VerificationItem {
                coordinate: self.coordinate.clone(),
                signature: cache.lookup_signature(self.coordinate),
                data: self.data,
                policy: TrustPolicy::Required,
                gpg_urls: Vec::new(),
            },
        });
    }
}

fn unsigned(path: PathBuf) -> InvalidBinary {
    InvalidBinary {
        path,
        coordinate: None,
        result: SignatureCheckResult::NoSignature,
        key_id: None,
    }
}

fn read_if_present(path: &Path) -> Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_err(path, e)),
    }
}

fn sniff(path: &Path) -> Result<Vec<u8>> {
    let file = std::fs::File::open(path).map_err(|e| io_err(path, e))?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    file.take(SNIFF_LEN as u64)
        .read_to_end(&mut head)
        .map_err(|e| io_err(path, e))?;
    Ok(head)
}

/// Binary by configured extension, or by a NUL byte near the start.
fn is_binary(path: &Path, head: &[u8], settings: &Settings) -> bool {
    let by_extension = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            settings
                .binary_extensions
                .iter()
                .any(|b| b.eq_ignore_ascii_case(ext))
        });
    by_extension || head.iter().take(SNIFF_LEN).any(|&b| b == 0)
}

/// Reference hash helper used when recording plain tracked files.
pub fn track_file(root: &Path, relative: &str) -> Result<TrackedFile> {
    let path = root.join(relative);
    let hash = ContentHash::of_file(&path).map_err(|e| io_err(&path, e))?;
    Ok(TrackedFile {
        path: relative.to_string(),
        hash,
        coordinate: None,
    })
}
