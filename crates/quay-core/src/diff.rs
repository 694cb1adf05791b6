//! Generic diff tree and its typed instances.
//!
//! Every difference between two installation states is a tree of named
//! nodes. Leaves hold an old/new value pair; groups hold children and an
//! aggregate status. [`ArtifactChange`], [`ChannelChange`] and
//! [`ChannelVersionChange`] are typed views over the same tree.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::channel::{Channel, ChannelVersion};
use crate::manifest::Stream;
use crate::version;

/// Whether a node was added, removed or modified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffStatus {
    Added,
    Removed,
    Modified,
}

impl DiffStatus {
    fn of<T>(old: Option<T>, new: Option<T>) -> DiffStatus {
        match (old, new) {
            (None, Some(_)) => DiffStatus::Added,
            (Some(_), None) => DiffStatus::Removed,
            _ => DiffStatus::Modified,
        }
    }
}

impl fmt::Display for DiffStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffStatus::Added => write!(f, "added"),
            DiffStatus::Removed => write!(f, "removed"),
            DiffStatus::Modified => write!(f, "modified"),
        }
    }
}

/// A node of the diff tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "lowercase")]
pub enum Diff {
    Leaf {
        name: String,
        old: Option<String>,
        new: Option<String>,
    },
    Group {
        name: String,
        status: DiffStatus,
        children: Vec<Diff>,
    },
}

impl Diff {
    /// A leaf, or `None` when both sides are equal.
    pub fn leaf(name: impl Into<String>, old: Option<String>, new: Option<String>) -> Option<Diff> {
        if old == new {
            return None;
        }
        Some(Diff::Leaf {
            name: name.into(),
            old,
            new,
        })
    }

    /// A group, or `None` when no child differs.
    pub fn group(name: impl Into<String>, status: DiffStatus, children: Vec<Diff>) -> Option<Diff> {
        if children.is_empty() && status == DiffStatus::Modified {
            return None;
        }
        Some(Diff::Group {
            name: name.into(),
            status,
            children,
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Diff::Leaf { name, .. } | Diff::Group { name, .. } => name,
        }
    }

    pub fn status(&self) -> DiffStatus {
        match self {
            Diff::Leaf { old, new, .. } => DiffStatus::of(old.as_ref(), new.as_ref()),
            Diff::Group { status, .. } => *status,
        }
    }

    pub fn children(&self) -> &[Diff] {
        match self {
            Diff::Leaf { .. } => &[],
            Diff::Group { children, .. } => children,
        }
    }

    /// Find a direct child by name.
    pub fn child(&self, name: &str) -> Option<&Diff> {
        self.children().iter().find(|c| c.name() == name)
    }

    /// Old/new values of a leaf.
    pub fn values(&self) -> Option<(Option<&str>, Option<&str>)> {
        match self {
            Diff::Leaf { old, new, .. } => Some((old.as_deref(), new.as_deref())),
            Diff::Group { .. } => None,
        }
    }

    /// Render the tree as indented text.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        match self {
            Diff::Leaf { name, old, new } => {
                out.push_str(&format!(
                    "{indent}{name}: {} -> {}\n",
                    old.as_deref().unwrap_or("[]"),
                    new.as_deref().unwrap_or("[]")
                ));
            }
            Diff::Group {
                name,
                status,
                children,
            } => {
                out.push_str(&format!("{indent}{name} ({status})\n"));
                for child in children {
                    child.render_into(out, depth + 1);
                }
            }
        }
    }
}

/// A component whose pinned version differs between two states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactChange(Diff);

impl ArtifactChange {
    /// Compare two optional pins of the same stream.
    pub fn compute(old: Option<&Stream>, new: Option<&Stream>) -> Option<ArtifactChange> {
        let name = old.or(new)?.key().to_string();
        let version = Diff::leaf(
            "version",
            old.map(|s| s.version.clone()),
            new.map(|s| s.version.clone()),
        );
        let status = DiffStatus::of(old, new);
        Diff::group(name, status, version.into_iter().collect()).map(ArtifactChange)
    }

    /// Compare two stream sets by key.
    pub fn between(old: &[Stream], new: &[Stream]) -> Vec<ArtifactChange> {
        let mut paired: BTreeMap<_, (Option<&Stream>, Option<&Stream>)> = BTreeMap::new();
        for s in old {
            paired.entry(s.key()).or_default().0 = Some(s);
        }
        for s in new {
            paired.entry(s.key()).or_default().1 = Some(s);
        }
        paired
            .into_values()
            .filter_map(|(o, n)| ArtifactChange::compute(o, n))
            .collect()
    }

    /// `namespace:name` of the component.
    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn status(&self) -> DiffStatus {
        self.0.status()
    }

    pub fn old_version(&self) -> Option<&str> {
        self.version_values().0
    }

    pub fn new_version(&self) -> Option<&str> {
        self.version_values().1
    }

    fn version_values(&self) -> (Option<&str>, Option<&str>) {
        self.0
            .child("version")
            .and_then(Diff::values)
            .unwrap_or((None, None))
    }

    pub fn diff(&self) -> &Diff {
        &self.0
    }
}

/// A channel whose definition differs between two states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelChange(Diff);

impl ChannelChange {
    /// Compare two optional definitions of the same channel.
    pub fn compute(old: Option<&Channel>, new: Option<&Channel>) -> Option<ChannelChange> {
        let name = old.or(new)?.name.clone();
        let mut children = Vec::new();

        children.extend(Diff::leaf(
            "manifest",
            old.map(|c| c.manifest.to_string()),
            new.map(|c| c.manifest.to_string()),
        ));

        let mut repos: BTreeMap<&str, (Option<String>, Option<String>)> = BTreeMap::new();
        for r in old.into_iter().flat_map(|c| c.repositories.iter()) {
            repos.entry(r.id.as_str()).or_default().0 = Some(r.url.clone());
        }
        for r in new.into_iter().flat_map(|c| c.repositories.iter()) {
            repos.entry(r.id.as_str()).or_default().1 = Some(r.url.clone());
        }
        let repo_leaves: Vec<Diff> = repos
            .into_iter()
            .filter_map(|(id, (o, n))| Diff::leaf(id, o, n))
            .collect();
        if !repo_leaves.is_empty() {
            children.extend(Diff::group(
                "repositories",
                DiffStatus::Modified,
                repo_leaves,
            ));
        }

        children.extend(Diff::leaf(
            "gpg-check",
            old.map(|c| c.gpg_check.to_string()),
            new.map(|c| c.gpg_check.to_string()),
        ));
        children.extend(Diff::leaf(
            "gpg-urls",
            old.map(|c| c.gpg_urls.join(",")).filter(|s| !s.is_empty()),
            new.map(|c| c.gpg_urls.join(",")).filter(|s| !s.is_empty()),
        ));

        Diff::group(name, DiffStatus::of(old, new), children).map(ChannelChange)
    }

    /// Compare two channel lists by name.
    pub fn between(old: &[Channel], new: &[Channel]) -> Vec<ChannelChange> {
        let mut paired: BTreeMap<&str, (Option<&Channel>, Option<&Channel>)> = BTreeMap::new();
        for c in old {
            paired.entry(c.name.as_str()).or_default().0 = Some(c);
        }
        for c in new {
            paired.entry(c.name.as_str()).or_default().1 = Some(c);
        }
        paired
            .into_values()
            .filter_map(|(o, n)| ChannelChange::compute(o, n))
            .collect()
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn status(&self) -> DiffStatus {
        self.0.status()
    }

    pub fn diff(&self) -> &Diff {
        &self.0
    }
}

/// The change of a channel's resolved version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelVersionChange {
    pub channel: String,
    pub old: Option<ChannelVersion>,
    pub new: Option<ChannelVersion>,
}

impl ChannelVersionChange {
    pub fn new(
        channel: impl Into<String>,
        old: Option<ChannelVersion>,
        new: Option<ChannelVersion>,
    ) -> Self {
        ChannelVersionChange {
            channel: channel.into(),
            old,
            new,
        }
    }

    /// True when both sides are coordinate versions and `new` sorts before `old`.
    ///
    /// URL and open channels carry no ordering and never downgrade.
    pub fn is_downgrade(&self) -> bool {
        match (&self.old, &self.new) {
            (
                Some(ChannelVersion::Coordinate { physical: old, .. }),
                Some(ChannelVersion::Coordinate { physical: new, .. }),
            ) => version::is_older(new, old),
            _ => false,
        }
    }

    pub fn status(&self) -> DiffStatus {
        DiffStatus::of(self.old.as_ref(), self.new.as_ref())
    }

    /// The change as a diff tree node.
    pub fn to_diff(&self) -> Diff {
        let physical = Diff::leaf(
            "physical",
            self.old.as_ref().and_then(|v| v.physical()).map(str::to_string),
            self.new.as_ref().and_then(|v| v.physical()).map(str::to_string),
        );
        let logical = Diff::leaf(
            "logical",
            self.old.as_ref().and_then(|v| v.logical()).map(str::to_string),
            self.new.as_ref().and_then(|v| v.logical()).map(str::to_string),
        );
        let description = Diff::leaf(
            "version",
            self.old.as_ref().map(|v| v.to_string()),
            self.new.as_ref().map(|v| v.to_string()),
        );
        let children: Vec<Diff> = physical
            .into_iter()
            .chain(logical)
            .chain(description)
            .collect();
        Diff::Group {
            name: self.channel.clone(),
            status: self.status(),
            children,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ManifestRef, Repository};

    fn coordinate_version(v: &str) -> ChannelVersion {
        ChannelVersion::Coordinate {
            namespace: "org.example".into(),
            name: "m1".into(),
            physical: v.into(),
            logical: None,
        }
    }

    #[test]
    fn downgrade_only_for_older_coordinates() {
        let down = ChannelVersionChange::new(
            "m1",
            Some(coordinate_version("1.0.1")),
            Some(coordinate_version("1.0.0")),
        );
        assert!(down.is_downgrade());

        let up = ChannelVersionChange::new(
            "m1",
            Some(coordinate_version("1.0.0")),
            Some(coordinate_version("1.0.1")),
        );
        assert!(!up.is_downgrade());

        let same = ChannelVersionChange::new(
            "m1",
            Some(coordinate_version("1.0.0")),
            Some(coordinate_version("1.0.0")),
        );
        assert!(!same.is_downgrade());
    }

    #[test]
    fn url_and_open_channels_never_downgrade() {
        let url = |hash: &str| ChannelVersion::Url {
            url: "https://example.org/m.toml".into(),
            hash: hash.into(),
            logical: None,
        };
        let change = ChannelVersionChange::new("u", Some(url("ffff")), Some(url("0000")));
        assert!(!change.is_downgrade());

        let open = ChannelVersion::Open {
            policy: "latest".into(),
            repositories: vec!["central".into()],
        };
        let mixed =
            ChannelVersionChange::new("o", Some(coordinate_version("2.0.0")), Some(open));
        assert!(!mixed.is_downgrade());
    }

    #[test]
    fn artifact_changes_by_key() {
        let old = vec![Stream::new("org", "a", "1.0"), Stream::new("org", "b", "1.0")];
        let new = vec![Stream::new("org", "b", "1.1"), Stream::new("org", "c", "3.0")];
        let changes = ArtifactChange::between(&old, &new);
        assert_eq!(changes.len(), 3);

        assert_eq!(changes[0].name(), "org:a");
        assert_eq!(changes[0].status(), DiffStatus::Removed);
        assert_eq!(changes[0].old_version(), Some("1.0"));
        assert_eq!(changes[0].new_version(), None);

        assert_eq!(changes[1].status(), DiffStatus::Modified);
        assert_eq!(changes[1].new_version(), Some("1.1"));

        assert_eq!(changes[2].status(), DiffStatus::Added);
    }

    #[test]
    fn unchanged_stream_has_no_change() {
        let s = Stream::new("org", "a", "1.0");
        assert!(ArtifactChange::compute(Some(&s), Some(&s)).is_none());
    }

    #[test]
    fn channel_change_tree() {
        let old = Channel::new("base", ManifestRef::Url { url: "https://a/m.toml".into() })
            .with_repository(Repository::new("central", "https://repo.a/"));
        let mut new = old.clone();
        new.repositories[0].url = "https://repo.b/".into();
        new.gpg_check = true;

        let change = ChannelChange::compute(Some(&old), Some(&new)).unwrap();
        assert_eq!(change.status(), DiffStatus::Modified);
        let repos = change.diff().child("repositories").unwrap();
        assert_eq!(
            repos.child("central").unwrap().values(),
            Some((Some("https://repo.a/"), Some("https://repo.b/")))
        );
        assert!(change.diff().child("gpg-check").is_some());
        assert!(change.diff().child("manifest").is_none());

        assert!(ChannelChange::compute(Some(&old), Some(&old)).is_none());
        let removed = ChannelChange::between(&[old], &[]);
        assert_eq!(removed[0].status(), DiffStatus::Removed);
    }

    #[test]
    fn render_is_indented() {
        let change = ArtifactChange::compute(None, Some(&Stream::new("org", "a", "1.0"))).unwrap();
        let text = change.diff().render();
        assert_eq!(text, "org:a (added)\n  version: [] -> 1.0\n");
    }
}
