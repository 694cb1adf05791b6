//! Shared data model for quay installations.
//!
//! Everything the trust, cache and history subsystems agree on lives here:
//! component coordinates, version-pin manifests, channel definitions, the
//! generic diff tree and the content hash used to detect tampering.
//!
//! # Layout of an installation
//!
//! ```text
//! <install>/
//!   .installation/
//!     channels.toml      configured channels and settings
//!     manifests.toml     manifests currently in effect
//!     versions.toml      resolved channel versions
//!     installed.toml     tracked files and their reference hashes
//!     keyring.qkr        trusted certificates
//!     install.lock       exclusive lock held by a mutating operation
//!     .cache/            content-verified artifact cache
//!     history/           revision log and snapshots
//! ```

pub mod channel;
pub mod coordinate;
pub mod diff;
pub mod error;
pub mod fs;
pub mod hash;
pub mod manifest;
pub mod version;

pub use channel::{Channel, ChannelVersion, ManifestRef, Repository};
pub use coordinate::{Coordinate, StreamKey};
pub use diff::{ArtifactChange, ChannelChange, ChannelVersionChange, Diff, DiffStatus};
pub use error::{CoreError, Result};
pub use hash::ContentHash;
pub use manifest::{Manifest, Stream};

/// Name of the metadata directory inside an installation.
pub const METADATA_DIR: &str = ".installation";
