//! Version-pin manifests.
//!
//! A manifest is the document a channel publishes: a named, versioned list
//! of streams, each pinning one component to one version.
//!
//! ```toml
//! schema-version = "1.0.0"
//! name = "runtime"
//! logical-version = "Runtime 31 (GA)"
//!
//! [[streams]]
//! namespace = "org.example"
//! name = "core"
//! version = "1.0.0"
//! ```

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::coordinate::{Coordinate, StreamKey};
use crate::error::{CoreError, Result};

/// Highest manifest schema major version understood by this crate.
pub const SCHEMA_MAJOR: u64 = 1;

/// A channel manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Manifest {
    /// Schema version of this document.
    pub schema_version: String,
    /// Manifest name.
    pub name: String,
    /// Optional stable identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Human readable version label (e.g. "Runtime 31 GA").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_version: Option<String>,
    /// Component pins, kept sorted by stream key.
    #[serde(default)]
    pub streams: Vec<Stream>,
}

/// A single component pin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stream {
    pub namespace: String,
    pub name: String,
    pub version: String,
    /// Artifact type of the component.
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub qualifier: String,
}

fn default_kind() -> String {
    "jar".to_string()
}

impl Stream {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Stream {
            namespace: namespace.into(),
            name: name.into(),
            version: version.into(),
            kind: default_kind(),
            qualifier: String::new(),
        }
    }

    pub fn key(&self) -> StreamKey {
        StreamKey::new(&self.namespace, &self.name)
    }

    /// Coordinate of the pinned artifact.
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(&self.namespace, &self.name, &self.kind, &self.version)
            .with_qualifier(&self.qualifier)
    }
}

impl Manifest {
    /// Create an empty manifest at the current schema version.
    pub fn new(name: impl Into<String>) -> Self {
        Manifest {
            schema_version: format!("{SCHEMA_MAJOR}.0.0"),
            name: name.into(),
            id: None,
            description: None,
            logical_version: None,
            streams: Vec::new(),
        }
    }

    /// Builder: set the logical version.
    pub fn with_logical_version(mut self, logical: impl Into<String>) -> Self {
        self.logical_version = Some(logical.into());
        self
    }

    /// Builder: add a stream.
    pub fn with_stream(mut self, stream: Stream) -> Self {
        self.streams.push(stream);
        self.streams.sort_by_key(|s| s.key());
        self
    }

    /// Parse and validate a manifest from TOML.
    pub fn parse(input: &str) -> Result<Self> {
        let mut manifest: Manifest = toml::from_str(input)?;

        if manifest.name.trim().is_empty() {
            return Err(CoreError::InvalidManifest {
                detail: "name is required".to_string(),
            });
        }

        let schema = semver::Version::parse(&manifest.schema_version).map_err(|e| {
            CoreError::InvalidManifest {
                detail: format!("schema-version '{}': {e}", manifest.schema_version),
            }
        })?;
        if schema.major > SCHEMA_MAJOR {
            return Err(CoreError::InvalidManifest {
                detail: format!(
                    "unsupported schema-version {} (max {SCHEMA_MAJOR}.x)",
                    manifest.schema_version
                ),
            });
        }

        let mut seen = BTreeSet::new();
        for stream in &manifest.streams {
            if stream.namespace.is_empty() || stream.name.is_empty() || stream.version.is_empty()
            {
                return Err(CoreError::InvalidManifest {
                    detail: format!("incomplete stream '{}'", stream.key()),
                });
            }
            if let Err(e) = stream.coordinate().validate() {
                return Err(CoreError::InvalidManifest {
                    detail: format!("stream '{}': {}", stream.key(), invalid_detail(e)),
                });
            }
            if !seen.insert(stream.key()) {
                return Err(CoreError::InvalidManifest {
                    detail: format!("duplicate stream '{}'", stream.key()),
                });
            }
        }
        manifest.streams.sort_by_key(|s| s.key());

        Ok(manifest)
    }

    /// Parse a manifest from raw bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data).map_err(|e| CoreError::InvalidManifest {
            detail: format!("invalid UTF-8: {e}"),
        })?;
        Self::parse(text)
    }

    /// Load a manifest from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Serialize to TOML.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Look up the stream pinning `namespace:name`.
    pub fn stream(&self, namespace: &str, name: &str) -> Option<&Stream> {
        self.streams
            .iter()
            .find(|s| s.namespace == namespace && s.name == name)
    }

    /// Coordinates of every pinned artifact.
    pub fn coordinates(&self) -> Vec<Coordinate> {
        self.streams.iter().map(Stream::coordinate).collect()
    }
}

fn invalid_detail(error: CoreError) -> String {
    match error {
        CoreError::InvalidCoordinate { detail, .. } => detail,
        other => other.to_string(),
    }
}
