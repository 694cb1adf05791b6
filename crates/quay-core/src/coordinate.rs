//! Component coordinates.
//!
//! A coordinate uniquely names one versioned artifact:
//! `namespace:name:qualifier:type:version`. The qualifier may be empty,
//! every other field is required.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Characters that would break the string form or escape a directory.
const FORBIDDEN: &[char] = &[':', '/', '\\'];

/// Fully qualified identifier of a component artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Coordinate {
    /// Grouping namespace, dot separated (e.g. `org.example`).
    pub namespace: String,
    /// Component name within the namespace.
    pub name: String,
    /// Optional variant qualifier; empty when absent.
    pub qualifier: String,
    /// Artifact type (file extension, e.g. `jar`, `manifest`).
    pub kind: String,
    /// Version string.
    pub version: String,
}

/// The version-independent part of a coordinate, used to match streams.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamKey {
    pub namespace: String,
    pub name: String,
}

impl Coordinate {
    /// Build a coordinate without a qualifier.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        kind: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Coordinate {
            namespace: namespace.into(),
            name: name.into(),
            qualifier: String::new(),
            kind: kind.into(),
            version: version.into(),
        }
    }

    /// Builder: set the qualifier.
    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = qualifier.into();
        self
    }

    /// Same artifact at a different version.
    pub fn with_version(&self, version: impl Into<String>) -> Self {
        Coordinate {
            version: version.into(),
            ..self.clone()
        }
    }

    /// Check that every field survives the string form and that the stored
    /// path of the artifact stays inside its directory.
    pub fn validate(&self) -> Result<(), CoreError> {
        let invalid = |detail: String| CoreError::InvalidCoordinate {
            input: self.to_string(),
            detail,
        };
        let fields = [
            ("namespace", &self.namespace),
            ("name", &self.name),
            ("qualifier", &self.qualifier),
            ("type", &self.kind),
            ("version", &self.version),
        ];
        for (field, value) in fields {
            if value.is_empty() && field != "qualifier" {
                return Err(invalid(format!("{field} is empty")));
            }
            if value.trim() != value.as_str() {
                return Err(invalid(format!("{field} has surrounding whitespace")));
            }
            if let Some(c) = value.chars().find(|c| FORBIDDEN.contains(c) || c.is_control()) {
                return Err(invalid(format!("{field} contains {c:?}")));
            }
        }
        let segments = self.namespace.split('.').chain([self.name.as_str(), self.version.as_str()]);
        for segment in segments {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(invalid(format!("'{segment}' is not a valid path segment")));
            }
        }
        Ok(())
    }

    /// File name used when the artifact is stored on disk.
    pub fn file_name(&self) -> String {
        if self.qualifier.is_empty() {
            format!("{}-{}.{}", self.name, self.version, self.kind)
        } else {
            format!(
                "{}-{}-{}.{}",
                self.name, self.version, self.qualifier, self.kind
            )
        }
    }

    /// Relative directory segments: namespace split on dots, then name and version.
    pub fn path_segments(&self) -> Vec<&str> {
        let mut segments: Vec<&str> = self.namespace.split('.').collect();
        segments.push(&self.name);
        segments.push(&self.version);
        segments
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            self.namespace, self.name, self.qualifier, self.kind, self.version
        )
    }
}

impl FromStr for Coordinate {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |detail: &str| CoreError::InvalidCoordinate {
            input: s.to_string(),
            detail: detail.to_string(),
        };

        let fields: Vec<&str> = s.split(':').collect();
        if fields.len() != 5 {
            return Err(invalid("expected namespace:name:qualifier:type:version"));
        }
        let [namespace, name, qualifier, kind, version] = [
            fields[0].trim(),
            fields[1].trim(),
            fields[2].trim(),
            fields[3].trim(),
            fields[4].trim(),
        ];
        let coordinate = Coordinate {
            namespace: namespace.to_string(),
            name: name.to_string(),
            qualifier: qualifier.to_string(),
            kind: kind.to_string(),
            version: version.to_string(),
        };
        coordinate.validate().map_err(|e| match e {
            CoreError::InvalidCoordinate { detail, .. } => invalid(&detail),
            other => other,
        })?;
        Ok(coordinate)
    }
}

impl TryFrom<String> for Coordinate {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Coordinate> for String {
    fn from(value: Coordinate) -> Self {
        value.to_string()
    }
}

impl StreamKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        StreamKey {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)
    }
}
