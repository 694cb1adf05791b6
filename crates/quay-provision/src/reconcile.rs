//! Channel version discovery and reconciliation.

use std::collections::{BTreeMap, BTreeSet};

use quay_core::{Channel, ChannelVersion, ChannelVersionChange, ContentHash, Manifest, ManifestRef};
use tracing::debug;

use crate::error::{ProvisionError, Result};
use crate::repository::ArtifactResolver;

/// A candidate version for one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered {
    pub version: ChannelVersion,
    /// Manifest bytes already fetched during discovery (URL channels).
    pub manifest_bytes: Option<Vec<u8>>,
}

/// Find the version `channel` would move to now.
///
/// Coordinate channels use their pinned version or the latest one the
/// repositories offer; URL channels are identified by the hash of the
/// fetched document; open channels only record their policy.
pub fn discover(channel: &Channel, resolver: &dyn ArtifactResolver) -> Result<Discovered> {
    let unavailable = |detail: String| ProvisionError::ChannelUnavailable {
        channel: channel.name.clone(),
        detail,
    };

    let discovered = match &channel.manifest {
        ManifestRef::Coordinate {
            namespace,
            name,
            version,
        } => {
            let physical = match version {
                Some(pinned) => pinned.clone(),
                None => {
                    let template = channel.manifest.coordinate("").ok_or_else(|| {
                        unavailable("manifest reference has no coordinate".into())
                    })?;
                    resolver
                        .latest_version(&template, &channel.repositories)?
                        .ok_or_else(|| {
                            unavailable(format!("no version of manifest {namespace}:{name} found"))
                        })?
                }
            };
            Discovered {
                version: ChannelVersion::Coordinate {
                    namespace: namespace.clone(),
                    name: name.clone(),
                    physical,
                    logical: None,
                },
                manifest_bytes: None,
            }
        }
        ManifestRef::Url { url } => {
            let bytes = resolver
                .fetch_url(url)?
                .ok_or_else(|| unavailable(format!("manifest {url} not found")))?;
            Discovered {
                version: ChannelVersion::Url {
                    url: url.clone(),
                    hash: ContentHash::compute(&bytes).as_str().to_string(),
                    logical: None,
                },
                manifest_bytes: Some(bytes),
            }
        }
        ManifestRef::Open { policy } => Discovered {
            version: ChannelVersion::Open {
                policy: policy.clone(),
                repositories: channel.repositories.iter().map(|r| r.id.clone()).collect(),
            },
            manifest_bytes: None,
        },
    };
    debug!(channel = %channel.name, version = %discovered.version, "discovered channel version");
    Ok(discovered)
}

/// Fill in the logical version published by `manifest`.
pub fn with_logical(version: ChannelVersion, manifest: &Manifest) -> ChannelVersion {
    let logical = manifest.logical_version.clone();
    match version {
        ChannelVersion::Coordinate {
            namespace,
            name,
            physical,
            ..
        } => ChannelVersion::Coordinate {
            namespace,
            name,
            physical,
            logical,
        },
        ChannelVersion::Url { url, hash, .. } => ChannelVersion::Url { url, hash, logical },
        open @ ChannelVersion::Open { .. } => open,
    }
}

/// Every channel whose version differs between `current` and `candidates`,
/// ordered by channel name. Unchanged channels are omitted.
pub fn reconcile(
    current: &BTreeMap<String, ChannelVersion>,
    candidates: &BTreeMap<String, ChannelVersion>,
) -> Vec<ChannelVersionChange> {
    let names: BTreeSet<&String> = current.keys().chain(candidates.keys()).collect();
    names
        .into_iter()
        .filter_map(|name| {
            let old = current.get(name);
            let new = candidates.get(name);
            (old != new).then(|| ChannelVersionChange::new(name, old.cloned(), new.cloned()))
        })
        .collect()
}
