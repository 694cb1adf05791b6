//! History error types.

use std::path::PathBuf;

/// Errors raised by the revision log.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// A log line or snapshot could not be read back.
    #[error("corrupt history at {path}: {detail}")]
    Corrupt { path: PathBuf, detail: String },

    /// The requested revision kind is not allowed in the current state.
    #[error("invalid revision: {detail}")]
    InvalidTransition { detail: String },

    #[error("no revision matches '{id}'")]
    UnknownRevision { id: String },

    #[error("revision prefix '{id}' is ambiguous")]
    AmbiguousRevision { id: String },

    /// History I/O error.
    #[error("history error at {path}: {detail}")]
    Io { path: PathBuf, detail: String },

    #[error(transparent)]
    Core(#[from] quay_core::CoreError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for history operations.
pub type Result<T> = std::result::Result<T, HistoryError>;
