//! The on-disk revision log.
//!
//! Layout:
//! ```text
//! <install>/.installation/history/
//!   revisions.log            one JSON revision per line, oldest first
//!   snapshots/<sha256>.json  content-addressed snapshots
//! ```
//!
//! A snapshot is written before the log line that references it, so a log
//! line never points at a missing snapshot unless files were removed.

use std::path::{Path, PathBuf};

use chrono::Utc;
use quay_core::{fs::write_atomic, ContentHash};
use tracing::{debug, info};

use crate::error::{HistoryError, Result};
use crate::revision::{Revision, RevisionKind, Snapshot};

/// History directory name inside the metadata directory.
pub const HISTORY_DIR: &str = "history";

/// Log file name inside the history directory.
pub const LOG_FILE: &str = "revisions.log";

/// Snapshot directory name inside the history directory.
pub const SNAPSHOTS_DIR: &str = "snapshots";

/// Append-only list of revisions of one installation.
#[derive(Debug)]
pub struct RevisionLog {
    log_path: PathBuf,
    snapshots_dir: PathBuf,
    revisions: Vec<Revision>,
}

impl RevisionLog {
    /// Open the history stored in `dir`. A missing log is an empty history.
    pub fn open(dir: &Path) -> Result<Self> {
        let log_path = dir.join(LOG_FILE);
        let snapshots_dir = dir.join(SNAPSHOTS_DIR);
        let revisions = match std::fs::read_to_string(&log_path) {
            Ok(text) => parse_log(&log_path, &text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(HistoryError::Io {
                    path: log_path,
                    detail: e.to_string(),
                })
            }
        };
        debug!(path = %log_path.display(), revisions = revisions.len(), "opened revision log");
        Ok(RevisionLog {
            log_path,
            snapshots_dir,
            revisions,
        })
    }

    /// Record a new revision for `snapshot`.
    ///
    /// The first revision must be [`RevisionKind::Install`]; an install on a
    /// non-empty history is rejected.
    pub fn append(&mut self, kind: RevisionKind, snapshot: &Snapshot) -> Result<Revision> {
        match (self.revisions.is_empty(), kind) {
            (true, RevisionKind::Install) => {}
            (true, other) => {
                return Err(HistoryError::InvalidTransition {
                    detail: format!("history must start with INSTALL, not {other}"),
                })
            }
            (false, RevisionKind::Install) => {
                return Err(HistoryError::InvalidTransition {
                    detail: "installation already has an INSTALL revision".into(),
                })
            }
            (false, _) => {}
        }

        let bytes = snapshot.to_bytes()?;
        let hash = ContentHash::compute(&bytes);
        let snapshot_path = self.snapshot_path(&hash);
        if !hash.matches_file(&snapshot_path) {
            write_atomic(&snapshot_path, &bytes)?;
        }

        let parent = self.latest().map(|r| r.id.clone());
        let revision = Revision::new(parent, Utc::now(), kind, hash);

        let mut text = String::new();
        for r in self.revisions.iter().chain(std::iter::once(&revision)) {
            text.push_str(&serde_json::to_string(r)?);
            text.push('\n');
        }
        write_atomic(&self.log_path, text.as_bytes())?;
        self.revisions.push(revision.clone());
        info!(id = %revision.id, kind = %revision.kind, "recorded revision");
        Ok(revision)
    }

    /// All revisions, oldest first.
    pub fn revisions(&self) -> &[Revision] {
        &self.revisions
    }

    pub fn latest(&self) -> Option<&Revision> {
        self.revisions.last()
    }

    /// Look up a revision by full id or unique prefix.
    pub fn revision(&self, id: &str) -> Result<&Revision> {
        let unknown = || HistoryError::UnknownRevision { id: id.to_string() };
        if id.is_empty() {
            return Err(unknown());
        }
        let id_lower = id.to_ascii_lowercase();
        let mut matches = self.revisions.iter().filter(|r| r.id.starts_with(&id_lower));
        let found = matches.next().ok_or_else(unknown)?;
        if found.id != id_lower && matches.next().is_some() {
            return Err(HistoryError::AmbiguousRevision { id: id.to_string() });
        }
        Ok(found)
    }

    /// Load the snapshot recorded with `revision`.
    pub fn snapshot(&self, revision: &Revision) -> Result<Snapshot> {
        let path = self.snapshot_path(&revision.snapshot);
        let corrupt = |detail: String| HistoryError::Corrupt {
            path: path.clone(),
            detail,
        };
        let bytes = std::fs::read(&path).map_err(|e| corrupt(format!("reading snapshot: {e}")))?;
        if !revision.snapshot.verify(&bytes) {
            return Err(corrupt("snapshot content does not match its hash".into()));
        }
        serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))
    }

    fn snapshot_path(&self, hash: &ContentHash) -> PathBuf {
        self.snapshots_dir.join(format!("{}.json", hash.as_str()))
    }
}

fn parse_log(path: &Path, text: &str) -> Result<Vec<Revision>> {
    let mut revisions: Vec<Revision> = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let corrupt = |detail: String| HistoryError::Corrupt {
            path: path.to_path_buf(),
            detail: format!("line {}: {detail}", i + 1),
        };
        let revision: Revision = serde_json::from_str(line).map_err(|e| corrupt(e.to_string()))?;
        let expected_parent = revisions.last().map(|r| r.id.as_str());
        if revision.parent.as_deref() != expected_parent {
            return Err(corrupt("parent does not match the previous revision".into()));
        }
        if (revisions.is_empty()) != (revision.kind == RevisionKind::Install) {
            return Err(corrupt(format!("unexpected {} revision", revision.kind)));
        }
        let id = Revision::compute_id(
            revision.parent.as_deref(),
            revision.timestamp,
            revision.kind,
            &revision.snapshot,
        );
        if id != revision.id {
            return Err(corrupt("revision id does not match its contents".into()));
        }
        revisions.push(revision);
    }
    Ok(revisions)
}
