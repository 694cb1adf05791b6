//! Data model error types.

use std::path::PathBuf;

/// Errors raised while parsing or persisting model documents.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A coordinate string did not have the expected shape.
    #[error("invalid coordinate '{input}': {detail}")]
    InvalidCoordinate { input: String, detail: String },

    /// A manifest document was structurally invalid.
    #[error("invalid manifest: {detail}")]
    InvalidManifest { detail: String },

    /// A channel definition was invalid.
    #[error("invalid channel '{name}': {detail}")]
    InvalidChannel { name: String, detail: String },

    /// Writing a state file failed.
    #[error("failed to write {path}: {detail}")]
    Write { path: PathBuf, detail: String },

    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for model operations.
pub type Result<T> = std::result::Result<T, CoreError>;
