//! `channels.toml` configuration and the persisted installation state.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use quay_core::{fs::write_atomic, Channel, ChannelVersion, ContentHash, Coordinate, Manifest};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{io_err, ProvisionError, Result};

/// Channel configuration file name inside the metadata directory.
pub const CONFIG_FILE: &str = "channels.toml";
/// Manifests in effect, keyed by channel name.
pub const MANIFESTS_FILE: &str = "manifests.toml";
/// Resolved channel versions, keyed by channel name.
pub const VERSIONS_FILE: &str = "versions.toml";
/// Files laid out by the provisioning engine.
pub const INSTALLED_FILE: &str = "installed.toml";

/// Configured channels plus installation settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationConfig {
    #[serde(default, rename = "channel")]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub settings: Settings,
}

/// Installation-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Settings {
    /// Worker threads used for signature verification.
    #[serde(default = "default_verify_threads")]
    pub verify_threads: usize,
    /// File extensions treated as binaries by the origin audit, in addition
    /// to files containing a NUL byte.
    #[serde(default = "default_binary_extensions")]
    pub binary_extensions: Vec<String>,
}

fn default_verify_threads() -> usize {
    4
}

fn default_binary_extensions() -> Vec<String> {
    ["jar", "zip", "war", "ear", "so", "dll", "dylib", "exe", "class"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            verify_threads: default_verify_threads(),
            binary_extensions: default_binary_extensions(),
        }
    }
}

impl InstallationConfig {
    pub fn new(channels: Vec<Channel>) -> Self {
        InstallationConfig {
            channels,
            settings: Settings::default(),
        }
    }

    pub fn parse(input: &str) -> Result<Self> {
        let config: InstallationConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        Self::parse(&text)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Hash of the serialized configuration, recorded in snapshots.
    pub fn hash(&self) -> Result<ContentHash> {
        Ok(ContentHash::compute(self.to_toml()?.as_bytes()))
    }

    /// Check every channel and reject duplicate channel names.
    pub fn validate(&self) -> Result<()> {
        let mut names = BTreeSet::new();
        for channel in &self.channels {
            channel.validate()?;
            if !names.insert(channel.name.as_str()) {
                return Err(ProvisionError::InvalidConfig {
                    detail: format!("duplicate channel '{}'", channel.name),
                });
            }
        }
        if self.settings.verify_threads == 0 {
            return Err(ProvisionError::InvalidConfig {
                detail: "verify-threads must be at least 1".into(),
            });
        }
        Ok(())
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.name == name)
    }
}

/// A file laid out in the installation by the provisioning engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedFile {
    /// Path relative to the installation root, `/` separated.
    pub path: String,
    /// Reference hash of the file as provisioned.
    pub hash: ContentHash,
    /// Artifact the file was provisioned from; `None` for plain files such
    /// as generated configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinate: Option<Coordinate>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct InstalledFiles {
    #[serde(default, rename = "file")]
    files: Vec<TrackedFile>,
}

/// Read a TOML state file; a missing file yields the default value.
pub(crate) fn read_state<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(toml::from_str(&text)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(io_err(path, e)),
    }
}

pub(crate) fn write_state<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    write_atomic(path, toml::to_string_pretty(value)?.as_bytes())?;
    Ok(())
}

pub(crate) fn read_versions(path: &Path) -> Result<BTreeMap<String, ChannelVersion>> {
    read_state(path)
}

pub(crate) fn read_manifests(path: &Path) -> Result<BTreeMap<String, Manifest>> {
    read_state(path)
}

pub(crate) fn read_installed(path: &Path) -> Result<Vec<TrackedFile>> {
    Ok(read_state::<InstalledFiles>(path)?.files)
}

pub(crate) fn write_installed(path: &Path, files: &[TrackedFile]) -> Result<()> {
    write_state(
        path,
        &InstalledFiles {
            files: files.to_vec(),
        },
    )
}
