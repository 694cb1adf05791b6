//! Differences between two snapshots.

use quay_core::{ArtifactChange, ChannelChange, Stream};
use serde::Serialize;

use crate::revision::Snapshot;

/// Artifact and channel level differences between two states.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RevisionDiff {
    pub artifacts: Vec<ArtifactChange>,
    pub channels: Vec<ChannelChange>,
}

impl RevisionDiff {
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty() && self.channels.is_empty()
    }

    /// Indented text rendering, channels first.
    pub fn render(&self) -> String {
        self.channels
            .iter()
            .map(|c| c.diff().render())
            .chain(self.artifacts.iter().map(|a| a.diff().render()))
            .collect()
    }
}

/// Compare `old` against `new` by stream key and channel name.
pub fn compare(old: &Snapshot, new: &Snapshot) -> RevisionDiff {
    RevisionDiff {
        artifacts: ArtifactChange::between(&streams(old), &streams(new)),
        channels: ChannelChange::between(&old.channels, &new.channels),
    }
}

fn streams(snapshot: &Snapshot) -> Vec<Stream> {
    snapshot
        .manifests
        .values()
        .flat_map(|m| m.streams.iter().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quay_core::{Channel, DiffStatus, Manifest, ManifestRef, Repository};

    fn snapshot(pins: &[(&str, &str)], repo: &str) -> Snapshot {
        let mut manifest = Manifest::new("base");
        for (name, version) in pins {
            manifest = manifest.with_stream(Stream::new("org.example", *name, *version));
        }
        let channel = Channel::new(
            "base",
            ManifestRef::Coordinate {
                namespace: "org.example".into(),
                name: "base".into(),
                version: None,
            },
        )
        .with_repository(Repository::new("central", repo));
        let mut s = Snapshot {
            channels: vec![channel],
            ..Snapshot::default()
        };
        s.manifests.insert("base".into(), manifest);
        s
    }

    #[test]
    fn identical_snapshots() {
        let s = snapshot(&[("core", "1.0.0")], "https://a");
        assert!(compare(&s, &s).is_empty());
    }

    #[test]
    fn artifact_changes() {
        let old = snapshot(&[("core", "1.0.0"), ("legacy", "0.9")], "https://a");
        let new = snapshot(&[("core", "1.0.1"), ("extra", "2.0")], "https://a");
        let diff = compare(&old, &new);
        assert!(diff.channels.is_empty());

        let summary: Vec<_> = diff
            .artifacts
            .iter()
            .map(|a| (a.name(), a.status(), a.old_version(), a.new_version()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("org.example:core", DiffStatus::Modified, Some("1.0.0"), Some("1.0.1")),
                ("org.example:extra", DiffStatus::Added, None, Some("2.0")),
                ("org.example:legacy", DiffStatus::Removed, Some("0.9"), None),
            ]
        );
    }

    #[test]
    fn channel_changes() {
        let old = snapshot(&[("core", "1.0.0")], "https://a");
        let new = snapshot(&[("core", "1.0.0")], "https://b");
        let diff = compare(&old, &new);
        assert!(diff.artifacts.is_empty());
        assert_eq!(diff.channels.len(), 1);
        assert_eq!(diff.channels[0].name(), "base");
        assert!(diff.render().contains("https://b"));
    }
}
