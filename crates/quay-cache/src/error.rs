//! Cache error types.

use std::path::PathBuf;

/// Errors that can occur during cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The persisted index could not be parsed. Nothing was rewritten.
    #[error("corrupt cache index {path} at line {line}: {detail}")]
    CorruptIndex {
        path: PathBuf,
        line: usize,
        detail: String,
    },

    /// An entry that the index cannot represent. Nothing was written.
    #[error("cannot cache {coordinate}: {detail}")]
    InvalidEntry { coordinate: String, detail: String },

    /// A recorded path does not lie inside the installation.
    #[error("{path} is outside the installation")]
    OutsideInstallation { path: PathBuf },

    /// Cache I/O error.
    #[error("cache error at {path}: {detail}")]
    Io { path: PathBuf, detail: String },

    /// Writing the index failed.
    #[error(transparent)]
    Core(#[from] quay_core::CoreError),
}

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
