//! Trust error types.

use std::path::PathBuf;

use crate::verifier::SignatureCheckResult;

/// Errors raised by the trust store and signature verification.
#[derive(Debug, thiserror::Error)]
pub enum TrustError {
    /// Certificate or revocation bytes could not be parsed or validated.
    #[error("invalid certificate: {detail}")]
    InvalidCertificate { detail: String },

    /// A certificate with this key id is already in the keyring.
    #[error("certificate {key_id} is already trusted")]
    DuplicatedCertificate { key_id: String },

    /// No certificate with this key id is in the keyring.
    #[error("no certificate with key id {key_id}")]
    NoSuchCertificate { key_id: String },

    /// An artifact failed signature verification; the operation is aborted.
    #[error("signature check failed for {coordinate}: {result}{}", key_suffix(.key_id))]
    SignatureFailure {
        coordinate: String,
        result: SignatureCheckResult,
        key_id: Option<String>,
    },

    /// The keyring file is corrupt or could not be written.
    #[error("keyring {path}: {detail}")]
    Metadata { path: PathBuf, detail: String },
}

fn key_suffix(key_id: &Option<String>) -> String {
    key_id
        .as_deref()
        .map(|k| format!(" (key {k})"))
        .unwrap_or_default()
}

/// Result type alias for trust operations.
pub type Result<T> = std::result::Result<T, TrustError>;
