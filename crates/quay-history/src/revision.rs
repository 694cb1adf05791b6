//! Revisions and the snapshots they point at.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use quay_core::{Channel, ChannelVersion, ContentHash, Manifest};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// What kind of operation produced a revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RevisionKind {
    Install,
    Update,
    Rollback,
    ConfigChange,
}

impl fmt::Display for RevisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RevisionKind::Install => "INSTALL",
            RevisionKind::Update => "UPDATE",
            RevisionKind::Rollback => "ROLLBACK",
            RevisionKind::ConfigChange => "CONFIG_CHANGE",
        };
        f.write_str(s)
    }
}

/// One entry of the revision log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    /// Opaque identifier, hex SHA-256.
    pub id: String,
    /// Previous revision; `None` only for the install revision.
    pub parent: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub kind: RevisionKind,
    /// Hash of the snapshot file recorded with this revision.
    pub snapshot: ContentHash,
}

impl Revision {
    pub(crate) fn new(
        parent: Option<String>,
        timestamp: DateTime<Utc>,
        kind: RevisionKind,
        snapshot: ContentHash,
    ) -> Self {
        let id = Self::compute_id(parent.as_deref(), timestamp, kind, &snapshot);
        Revision {
            id,
            parent,
            timestamp,
            kind,
            snapshot,
        }
    }

    pub(crate) fn compute_id(
        parent: Option<&str>,
        timestamp: DateTime<Utc>,
        kind: RevisionKind,
        snapshot: &ContentHash,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(parent.unwrap_or_default());
        hasher.update(b"\n");
        hasher.update(kind.to_string());
        hasher.update(b"\n");
        hasher.update(timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true));
        hasher.update(b"\n");
        hasher.update(snapshot.as_str());
        hex::encode(hasher.finalize())
    }

    /// First 12 digits of the id, for display.
    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(12)]
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.short_id(),
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.kind
        )
    }
}

/// State of an installation's metadata after a revision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Configured channels, in configuration order.
    pub channels: Vec<Channel>,
    /// Resolved version per channel name.
    #[serde(default)]
    pub channel_versions: BTreeMap<String, ChannelVersion>,
    /// Manifest in effect per channel name (open channels have none).
    #[serde(default)]
    pub manifests: BTreeMap<String, Manifest>,
    /// Hash of the channel configuration file, when one was recorded.
    #[serde(default)]
    pub config_hash: Option<ContentHash>,
}

impl Snapshot {
    /// Canonical encoding, also the input of the snapshot hash.
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }
}
