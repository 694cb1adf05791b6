//! Certificate trust store and signature verification.
//!
//! The [`TrustStore`] is the keyring of certificates an installation trusts.
//! The [`SignatureVerifier`] checks artifact signatures against it under a
//! channel's [`TrustPolicy`], and a [`VerificationSession`] handles the
//! first encounter of an unknown signer during one operation.
//!
//! Cryptography sits behind [`CryptoBackend`]; the bundled
//! [`Ed25519Backend`] is the default implementation.

pub mod certificate;
pub mod crypto;
pub mod error;
pub mod keyring;
pub mod store;
pub mod verifier;

pub use certificate::{Certificate, CertificateInfo, CertificateStatus, Revocation};
pub use crypto::{CryptoBackend, Ed25519Backend, KeyPair};
pub use error::{Result, TrustError};
pub use store::{TrustStore, KEYRING_FILE};
pub use verifier::{
    CertificateAcceptor, CertificateSource, FileCertificateSource, PendingImports,
    SignatureCheck, SignatureCheckResult, SignatureVerifier, TrustPolicy, VerificationItem,
    VerificationSession,
};
