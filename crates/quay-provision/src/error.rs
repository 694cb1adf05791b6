//! Provisioning error types.

use std::path::PathBuf;

use quay_core::{ChannelVersionChange, Coordinate};

/// Errors raised by installation operations.
///
/// Every variant is raised before the installation is modified, except
/// [`ProvisionError::Io`], [`ProvisionError::Provision`] and the wrapped
/// storage errors, which can also come from the write phase.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// Another operation holds the installation lock.
    #[error("installation {path} is locked by another operation")]
    Locked { path: PathBuf },

    #[error("no installation at {path}")]
    NotInstalled { path: PathBuf },

    #[error("{path} is already installed")]
    AlreadyInstalled { path: PathBuf },

    /// Manifests or artifacts found neither in the cache nor in any repository.
    #[error("unresolved metadata: {}", join(.missing))]
    UnresolvedMetadata { missing: Vec<Coordinate> },

    /// A channel's manifest source could not be read.
    #[error("channel '{channel}' unavailable: {detail}")]
    ChannelUnavailable { channel: String, detail: String },

    /// The update would move a channel to an older version.
    #[error("update would downgrade {}", channels(.changes))]
    Downgrade { changes: Vec<ChannelVersionChange> },

    #[error("invalid configuration: {detail}")]
    InvalidConfig { detail: String },

    /// The repository client failed (as opposed to not having the artifact).
    #[error("repository error: {detail}")]
    Repository { detail: String },

    /// The provisioning engine failed to lay out artifacts.
    #[error("provisioning failed: {detail}")]
    Provision { detail: String },

    #[error("I/O error at {path}: {detail}")]
    Io { path: PathBuf, detail: String },

    #[error(transparent)]
    Trust(#[from] quay_trust::TrustError),

    #[error(transparent)]
    Cache(#[from] quay_cache::CacheError),

    #[error(transparent)]
    History(#[from] quay_history::HistoryError),

    #[error(transparent)]
    Core(#[from] quay_core::CoreError),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

fn join<T: std::fmt::Display>(items: impl IntoIterator<Item = T>) -> String {
    items
        .into_iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn channels(changes: &[ChannelVersionChange]) -> String {
    join(changes.iter().map(|c| &c.channel))
}

pub(crate) fn io_err(path: &std::path::Path, e: std::io::Error) -> ProvisionError {
    ProvisionError::Io {
        path: path.to_path_buf(),
        detail: e.to_string(),
    }
}

/// Result type alias for provisioning operations.
pub type Result<T> = std::result::Result<T, ProvisionError>;
