//! Channel definitions and resolved channel versions.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::coordinate::Coordinate;
use crate::error::{CoreError, Result};

/// Artifact type under which channel manifests are published.
pub const MANIFEST_KIND: &str = "manifest";

/// A repository supplying a channel's artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Repository {
    pub id: String,
    pub url: String,
}

impl Repository {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Repository {
            id: id.into(),
            url: url.into(),
        }
    }

    /// Offline repositories are backed by the local filesystem.
    pub fn is_local(&self) -> bool {
        self.url.starts_with("file:")
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.id, self.url)
    }
}

/// Where a channel's manifest comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ManifestRef {
    /// Manifest published as an artifact; `version` pins it, `None` tracks the latest.
    Coordinate {
        namespace: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
    /// Manifest fetched from a fixed URL.
    Url { url: String },
    /// No manifest; components are resolved by policy from the repositories.
    Open {
        #[serde(default = "default_policy")]
        policy: String,
    },
}

fn default_policy() -> String {
    "latest".to_string()
}

impl ManifestRef {
    /// Coordinate of the manifest artifact at the given version.
    ///
    /// `None` for URL and open channels.
    pub fn coordinate(&self, version: &str) -> Option<Coordinate> {
        match self {
            ManifestRef::Coordinate {
                namespace, name, ..
            } => Some(Coordinate::new(namespace, name, MANIFEST_KIND, version)),
            ManifestRef::Url { .. } | ManifestRef::Open { .. } => None,
        }
    }
}

impl fmt::Display for ManifestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestRef::Coordinate {
                namespace,
                name,
                version,
            } => match version {
                Some(version) => write!(f, "{namespace}:{name}:{version}"),
                None => write!(f, "{namespace}:{name}"),
            },
            ManifestRef::Url { url } => write!(f, "{url}"),
            ManifestRef::Open { policy } => write!(f, "open ({policy})"),
        }
    }
}

/// A configured channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Channel {
    pub name: String,
    pub manifest: ManifestRef,
    #[serde(default)]
    pub repositories: Vec<Repository>,
    /// Whether artifacts from this channel must carry a trusted signature.
    #[serde(default)]
    pub gpg_check: bool,
    /// Locations of certificates that may be offered for acceptance.
    #[serde(default)]
    pub gpg_urls: Vec<String>,
}

impl Channel {
    pub fn new(name: impl Into<String>, manifest: ManifestRef) -> Self {
        Channel {
            name: name.into(),
            manifest,
            repositories: Vec::new(),
            gpg_check: false,
            gpg_urls: Vec::new(),
        }
    }

    /// Builder: append a repository.
    pub fn with_repository(mut self, repository: Repository) -> Self {
        self.repositories.push(repository);
        self
    }

    /// Builder: require signatures, offering certificates from `gpg_urls`.
    pub fn with_gpg_check(mut self, gpg_urls: Vec<String>) -> Self {
        self.gpg_check = true;
        self.gpg_urls = gpg_urls;
        self
    }

    /// True when every repository is local (offline).
    pub fn is_local_only(&self) -> bool {
        !self.repositories.is_empty() && self.repositories.iter().all(Repository::is_local)
    }

    /// Check the structural rules of a channel definition.
    pub fn validate(&self) -> Result<()> {
        let invalid = |detail: String| CoreError::InvalidChannel {
            name: self.name.clone(),
            detail,
        };

        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(invalid(
                "name must be non-empty and use [A-Za-z0-9._-]".to_string(),
            ));
        }
        if self.repositories.is_empty() {
            return Err(invalid("at least one repository is required".to_string()));
        }
        let mut ids = BTreeSet::new();
        for repo in &self.repositories {
            if !ids.insert(repo.id.as_str()) {
                return Err(invalid(format!("duplicate repository id '{}'", repo.id)));
            }
        }
        if let ManifestRef::Coordinate {
            namespace, name, ..
        } = &self.manifest
        {
            if namespace.is_empty() || name.is_empty() {
                return Err(invalid("manifest coordinate is incomplete".to_string()));
            }
        }
        Ok(())
    }
}

/// The version of a channel recorded in (or proposed for) an installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ChannelVersion {
    /// Manifest resolved as an artifact; `physical` is its artifact version.
    Coordinate {
        namespace: String,
        name: String,
        physical: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        logical: Option<String>,
    },
    /// Manifest fetched from a URL; its identity is the content hash.
    Url {
        url: String,
        hash: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        logical: Option<String>,
    },
    /// Unpinned channel; only the resolution policy is known.
    Open {
        policy: String,
        repositories: Vec<String>,
    },
}

impl ChannelVersion {
    /// The resolvable identifier, absent for open channels.
    pub fn physical(&self) -> Option<&str> {
        match self {
            ChannelVersion::Coordinate { physical, .. } => Some(physical),
            ChannelVersion::Url { hash, .. } => Some(hash),
            ChannelVersion::Open { .. } => None,
        }
    }

    pub fn logical(&self) -> Option<&str> {
        match self {
            ChannelVersion::Coordinate { logical, .. } | ChannelVersion::Url { logical, .. } => {
                logical.as_deref()
            }
            ChannelVersion::Open { .. } => None,
        }
    }

    /// Coordinate of the manifest artifact for coordinate-typed versions.
    pub fn manifest_coordinate(&self) -> Option<Coordinate> {
        match self {
            ChannelVersion::Coordinate {
                namespace,
                name,
                physical,
                ..
            } => Some(Coordinate::new(namespace, name, MANIFEST_KIND, physical)),
            _ => None,
        }
    }
}

impl fmt::Display for ChannelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelVersion::Coordinate {
                namespace,
                name,
                physical,
                logical,
            } => {
                write!(f, "{namespace}:{name}:{physical}")?;
                if let Some(logical) = logical {
                    write!(f, " ({logical})")?;
                }
                Ok(())
            }
            ChannelVersion::Url { url, hash, .. } => {
                write!(f, "{url}#{}", &hash[..hash.len().min(12)])
            }
            ChannelVersion::Open {
                policy,
                repositories,
            } => write!(f, "{policy} from [{}]", repositories.join(", ")),
        }
    }
}
