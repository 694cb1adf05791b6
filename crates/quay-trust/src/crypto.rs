//! Cryptographic capability and the default Ed25519 implementation.
//!
//! Trust store logic only talks to [`CryptoBackend`]; swapping the
//! signature scheme means providing another backend.
//!
//! The Ed25519 backend exchanges three JSON documents:
//! - certificate: public key, user ids, validity window and a
//!   self-signature over those fields
//! - detached signature: signer key id and the signature over the raw bytes
//! - revocation: fingerprint, time and reason, signed by the revoked key

use std::fmt;

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::certificate::{Certificate, Revocation};
use crate::error::{Result, TrustError};

const CERTIFICATE_FORMAT: &str = "quay-certificate-v1";
const SIGNATURE_FORMAT: &str = "quay-signature-v1";
const REVOCATION_FORMAT: &str = "quay-revocation-v1";
const KEY_ID_LEN: usize = 16;

/// Signature primitives used by the trust store and verifier.
pub trait CryptoBackend: Send + Sync + fmt::Debug {
    /// Parse and self-validate certificate bytes.
    fn parse_certificate(&self, bytes: &[u8]) -> Result<Certificate>;

    /// Parse revocation bytes (without checking who signed them).
    fn parse_revocation(&self, bytes: &[u8]) -> Result<Revocation>;

    /// Key id claimed by a detached signature, `None` if unparsable.
    fn signer_key_id(&self, signature: &[u8]) -> Option<String>;

    /// Check a detached signature over `data` against `certificate`.
    fn verify_signature(&self, data: &[u8], signature: &[u8], certificate: &Certificate) -> bool;

    /// Check that `revocation` was issued by the key of `certificate`.
    fn valid_revocation(&self, revocation: &Revocation, certificate: &Certificate) -> bool;
}

#[derive(Serialize)]
struct CertificatePayload<'a> {
    format: &'a str,
    public_key: &'a str,
    user_ids: &'a [String],
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize)]
struct CertificateDocument {
    format: String,
    public_key: String,
    user_ids: Vec<String>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
    self_signature: String,
}

impl CertificateDocument {
    fn payload(&self) -> Vec<u8> {
        canonical(&CertificatePayload {
            format: &self.format,
            public_key: &self.public_key,
            user_ids: &self.user_ids,
            created_at: self.created_at,
            expires_at: self.expires_at,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct SignatureDocument {
    format: String,
    key_id: String,
    created_at: DateTime<Utc>,
    signature: String,
}

#[derive(Serialize)]
struct RevocationPayload<'a> {
    format: &'a str,
    fingerprint: &'a str,
    revoked_at: DateTime<Utc>,
    reason: Option<&'a str>,
}

#[derive(Serialize, Deserialize)]
struct RevocationDocument {
    format: String,
    key_id: String,
    fingerprint: String,
    revoked_at: DateTime<Utc>,
    #[serde(default)]
    reason: Option<String>,
    signature: String,
}

impl RevocationDocument {
    fn payload(&self) -> Vec<u8> {
        canonical(&RevocationPayload {
            format: &self.format,
            fingerprint: &self.fingerprint,
            revoked_at: self.revoked_at,
            reason: self.reason.as_deref(),
        })
    }
}

fn canonical<T: Serialize>(value: &T) -> Vec<u8> {
    // Plain structs of strings and timestamps always serialize.
    serde_json::to_vec(value).unwrap_or_default()
}

/// Uppercase SHA-256 fingerprint of a public key.
pub fn fingerprint(public_key: &[u8]) -> String {
    hex::encode_upper(Sha256::digest(public_key))
}

/// Short key id derived from a fingerprint.
pub fn key_id(fingerprint: &str) -> String {
    fingerprint[fingerprint.len().saturating_sub(KEY_ID_LEN)..].to_string()
}

fn invalid(detail: impl Into<String>) -> TrustError {
    TrustError::InvalidCertificate {
        detail: detail.into(),
    }
}

fn decode_signature(hex_sig: &str) -> Option<Signature> {
    let bytes = hex::decode(hex_sig).ok()?;
    let bytes: [u8; 64] = bytes.try_into().ok()?;
    Some(Signature::from_bytes(&bytes))
}

fn verifying_key(public_key: &[u8]) -> Option<VerifyingKey> {
    let bytes: [u8; 32] = public_key.try_into().ok()?;
    VerifyingKey::from_bytes(&bytes).ok()
}

/// Ed25519 implementation of [`CryptoBackend`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Backend;

impl CryptoBackend for Ed25519Backend {
    fn parse_certificate(&self, bytes: &[u8]) -> Result<Certificate> {
        let doc: CertificateDocument =
            serde_json::from_slice(bytes).map_err(|e| invalid(format!("malformed certificate: {e}")))?;
        if doc.format != CERTIFICATE_FORMAT {
            return Err(invalid(format!("unsupported format '{}'", doc.format)));
        }
        let public_key =
            hex::decode(&doc.public_key).map_err(|e| invalid(format!("public key: {e}")))?;
        let key = verifying_key(&public_key).ok_or_else(|| invalid("public key is not Ed25519"))?;
        let self_sig =
            decode_signature(&doc.self_signature).ok_or_else(|| invalid("malformed self-signature"))?;
        key.verify(&doc.payload(), &self_sig)
            .map_err(|_| invalid("self-signature does not verify"))?;
        if doc.user_ids.is_empty() {
            return Err(invalid("certificate has no user id"));
        }

        let fingerprint = fingerprint(&public_key);
        Ok(Certificate {
            key_id: key_id(&fingerprint),
            fingerprint,
            user_ids: doc.user_ids,
            created_at: doc.created_at,
            expires_at: doc.expires_at,
            public_key,
            encoded: bytes.to_vec(),
            revocation: None,
        })
    }

    fn parse_revocation(&self, bytes: &[u8]) -> Result<Revocation> {
        let doc: RevocationDocument =
            serde_json::from_slice(bytes).map_err(|e| invalid(format!("malformed revocation: {e}")))?;
        if doc.format != REVOCATION_FORMAT {
            return Err(invalid(format!("unsupported format '{}'", doc.format)));
        }
        if decode_signature(&doc.signature).is_none() {
            return Err(invalid("malformed revocation signature"));
        }
        Ok(Revocation {
            key_id: doc.key_id.to_ascii_uppercase(),
            revoked_at: doc.revoked_at,
            reason: doc.reason,
            encoded: bytes.to_vec(),
        })
    }

    fn signer_key_id(&self, signature: &[u8]) -> Option<String> {
        let doc: SignatureDocument = serde_json::from_slice(signature).ok()?;
        (doc.format == SIGNATURE_FORMAT).then(|| doc.key_id.to_ascii_uppercase())
    }

    fn verify_signature(&self, data: &[u8], signature: &[u8], certificate: &Certificate) -> bool {
        let Ok(doc) = serde_json::from_slice::<SignatureDocument>(signature) else {
            return false;
        };
        if !doc.key_id.eq_ignore_ascii_case(&certificate.key_id) {
            return false;
        }
        let (Some(sig), Some(key)) = (
            decode_signature(&doc.signature),
            verifying_key(&certificate.public_key),
        ) else {
            return false;
        };
        key.verify(data, &sig).is_ok()
    }

    fn valid_revocation(&self, revocation: &Revocation, certificate: &Certificate) -> bool {
        let Ok(doc) = serde_json::from_slice::<RevocationDocument>(&revocation.encoded) else {
            return false;
        };
        if doc.fingerprint != certificate.fingerprint {
            return false;
        }
        let (Some(sig), Some(key)) = (
            decode_signature(&doc.signature),
            verifying_key(&certificate.public_key),
        ) else {
            return false;
        };
        key.verify(&doc.payload(), &sig).is_ok()
    }
}

/// An Ed25519 signing identity: issues its certificate, signatures and
/// revocation.
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
    user_ids: Vec<String>,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("key_id", &self.key_id())
            .field("user_ids", &self.user_ids)
            .field("signing_key", &"[redacted]")
            .finish()
    }
}

impl KeyPair {
    /// Generate a new random key pair.
    pub fn generate(user_id: impl Into<String>) -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng), user_id)
    }

    /// Deterministic key pair from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32], user_id: impl Into<String>) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(seed), user_id)
    }

    fn from_signing_key(signing_key: SigningKey, user_id: impl Into<String>) -> Self {
        KeyPair {
            signing_key,
            user_ids: vec![user_id.into()],
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    /// Builder: set the validity window.
    pub fn with_validity(
        mut self,
        created_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.created_at = created_at;
        self.expires_at = expires_at;
        self
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(self.signing_key.verifying_key().as_bytes())
    }

    pub fn key_id(&self) -> String {
        key_id(&self.fingerprint())
    }

    /// Encoded, self-signed certificate.
    pub fn certificate(&self) -> Vec<u8> {
        let mut doc = CertificateDocument {
            format: CERTIFICATE_FORMAT.to_string(),
            public_key: hex::encode(self.signing_key.verifying_key().as_bytes()),
            user_ids: self.user_ids.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            self_signature: String::new(),
        };
        doc.self_signature = hex::encode(self.signing_key.sign(&doc.payload()).to_bytes());
        canonical(&doc)
    }

    /// Detached signature over `data`.
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        canonical(&SignatureDocument {
            format: SIGNATURE_FORMAT.to_string(),
            key_id: self.key_id(),
            created_at: Utc::now(),
            signature: hex::encode(self.signing_key.sign(data).to_bytes()),
        })
    }

    /// Revocation of this key pair's certificate.
    pub fn revoke(&self, reason: Option<&str>) -> Vec<u8> {
        let mut doc = RevocationDocument {
            format: REVOCATION_FORMAT.to_string(),
            key_id: self.key_id(),
            fingerprint: self.fingerprint(),
            revoked_at: Utc::now(),
            reason: reason.map(str::to_string),
            signature: String::new(),
        };
        doc.signature = hex::encode(self.signing_key.sign(&doc.payload()).to_bytes());
        canonical(&doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(seed: u8) -> KeyPair {
        KeyPair::from_seed(&[seed; 32], format!("Signer {seed} <signer{seed}@example.org>"))
    }

    #[test]
    fn certificate_round_trip() {
        let kp = pair(1);
        let cert = Ed25519Backend.parse_certificate(&kp.certificate()).unwrap();
        assert_eq!(cert.key_id, kp.key_id());
        assert_eq!(cert.key_id.len(), 16);
        assert_eq!(cert.fingerprint.len(), 64);
        assert!(cert.fingerprint.ends_with(&cert.key_id));
        assert_eq!(cert.user_ids, vec!["Signer 1 <signer1@example.org>"]);
    }

    #[test]
    fn reject_garbage_and_forged_certificates() {
        assert!(Ed25519Backend.parse_certificate(b"not a certificate").is_err());

        let mut doc: serde_json::Value = serde_json::from_slice(&pair(1).certificate()).unwrap();
        doc["user_ids"] = serde_json::json!(["Mallory <m@example.org>"]);
        let forged = serde_json::to_vec(&doc).unwrap();
        let err = Ed25519Backend.parse_certificate(&forged).unwrap_err();
        assert!(err.to_string().contains("self-signature"));
    }

    #[test]
    fn sign_and_verify() {
        let kp = pair(2);
        let cert = Ed25519Backend.parse_certificate(&kp.certificate()).unwrap();
        let sig = kp.sign(b"artifact");

        assert_eq!(Ed25519Backend.signer_key_id(&sig), Some(kp.key_id()));
        assert!(Ed25519Backend.verify_signature(b"artifact", &sig, &cert));
        assert!(!Ed25519Backend.verify_signature(b"tampered", &sig, &cert));

        let other = Ed25519Backend
            .parse_certificate(&pair(3).certificate())
            .unwrap();
        assert!(!Ed25519Backend.verify_signature(b"artifact", &sig, &other));
        assert_eq!(Ed25519Backend.signer_key_id(b"junk"), None);
    }

    #[test]
    fn revocation_must_come_from_the_key() {
        let kp = pair(4);
        let cert = Ed25519Backend.parse_certificate(&kp.certificate()).unwrap();
        let revocation = Ed25519Backend
            .parse_revocation(&kp.revoke(Some("key compromised")))
            .unwrap();
        assert_eq!(revocation.key_id, kp.key_id());
        assert_eq!(revocation.reason.as_deref(), Some("key compromised"));
        assert!(Ed25519Backend.valid_revocation(&revocation, &cert));

        let other = Ed25519Backend
            .parse_certificate(&pair(5).certificate())
            .unwrap();
        assert!(!Ed25519Backend.valid_revocation(&revocation, &other));
    }

    #[test]
    fn debug_redacts_secret() {
        let text = format!("{:?}", pair(6));
        assert!(text.contains("[redacted]"));
    }
}
