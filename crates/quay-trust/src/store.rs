//! The persistent certificate keyring of an installation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use quay_core::fs::write_atomic;
use tracing::{debug, info};

use crate::certificate::{Certificate, CertificateInfo};
use crate::crypto::CryptoBackend;
use crate::error::{Result, TrustError};
use crate::keyring::{self, KeyringEntry};

/// Keyring file name inside the metadata directory.
pub const KEYRING_FILE: &str = "keyring.qkr";

/// Certificates trusted by one installation.
///
/// The keyring is read once at [`TrustStore::open`]; external changes to the
/// file are not picked up while the handle lives. Every mutation is
/// persisted atomically before it becomes visible in memory.
#[derive(Debug)]
pub struct TrustStore {
    path: PathBuf,
    backend: Arc<dyn CryptoBackend>,
    certificates: IndexMap<String, Certificate>,
}

impl TrustStore {
    /// Open the keyring at `path`. A missing file is an empty keyring.
    pub fn open(path: &Path, backend: Arc<dyn CryptoBackend>) -> Result<Self> {
        let mut store = TrustStore {
            path: path.to_path_buf(),
            backend,
            certificates: IndexMap::new(),
        };
        match std::fs::read(path) {
            Ok(bytes) => store.load(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(store.metadata(format!("reading keyring: {e}"))),
        }
        debug!(path = %path.display(), certificates = store.certificates.len(), "opened trust store");
        Ok(store)
    }

    fn load(&mut self, bytes: &[u8]) -> Result<()> {
        let entries = keyring::decode(bytes).map_err(|detail| self.metadata(detail))?;
        for (i, entry) in entries.into_iter().enumerate() {
            let mut cert = self
                .backend
                .parse_certificate(&entry.certificate)
                .map_err(|e| self.metadata(format!("entry {i}: {e}")))?;
            if let Some(bytes) = entry.revocation {
                let revocation = self
                    .backend
                    .parse_revocation(&bytes)
                    .map_err(|e| self.metadata(format!("entry {i}: {e}")))?;
                cert.revocation = Some(revocation);
            }
            if self.certificates.contains_key(&cert.key_id) {
                return Err(self.metadata(format!("entry {i}: duplicate key {}", cert.key_id)));
            }
            self.certificates.insert(cert.key_id.clone(), cert);
        }
        Ok(())
    }

    fn metadata(&self, detail: impl Into<String>) -> TrustError {
        TrustError::Metadata {
            path: self.path.clone(),
            detail: detail.into(),
        }
    }

    /// Path of the keyring file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Crypto backend used to parse and verify.
    pub fn backend(&self) -> &Arc<dyn CryptoBackend> {
        &self.backend
    }

    /// Import a certificate and persist the keyring.
    pub fn import_certificate(&mut self, bytes: &[u8]) -> Result<CertificateInfo> {
        let cert = self.backend.parse_certificate(bytes)?;
        if self.certificates.contains_key(&cert.key_id) {
            return Err(TrustError::DuplicatedCertificate {
                key_id: cert.key_id,
            });
        }
        let info = cert.info_at(Utc::now());
        let mut next = self.certificates.clone();
        next.insert(cert.key_id.clone(), cert);
        self.persist(next)?;
        info!(key_id = %info.key_id, user_ids = ?info.user_ids, "imported certificate");
        Ok(info)
    }

    /// All certificates with their current status, in keyring order.
    pub fn list_certificates(&self) -> Vec<CertificateInfo> {
        self.list_certificates_at(Utc::now())
    }

    /// All certificates with their status at `now`, in keyring order.
    pub fn list_certificates_at(&self, now: DateTime<Utc>) -> Vec<CertificateInfo> {
        self.certificates.values().map(|c| c.info_at(now)).collect()
    }

    /// Certificate with the given key id (case-insensitive).
    pub fn get_certificate(&self, key_id: &str) -> Option<&Certificate> {
        self.certificates.get(&key_id.to_ascii_uppercase())
    }

    /// Remove a certificate and persist the keyring.
    pub fn remove_certificate(&mut self, key_id: &str) -> Result<Certificate> {
        let key_id = key_id.to_ascii_uppercase();
        let mut next = self.certificates.clone();
        let removed = next
            .shift_remove(&key_id)
            .ok_or(TrustError::NoSuchCertificate { key_id })?;
        self.persist(next)?;
        info!(key_id = %removed.key_id, "removed certificate");
        Ok(removed)
    }

    /// Apply a revocation issued by the certificate's own key.
    ///
    /// The public key is kept so signatures remain attributable, but the
    /// certificate reports REVOKED from now on.
    pub fn revoke_certificate(&mut self, revocation_bytes: &[u8]) -> Result<CertificateInfo> {
        let revocation = self.backend.parse_revocation(revocation_bytes)?;
        let cert = self
            .certificates
            .get(&revocation.key_id)
            .ok_or_else(|| TrustError::NoSuchCertificate {
                key_id: revocation.key_id.clone(),
            })?;
        if !self.backend.valid_revocation(&revocation, cert) {
            return Err(TrustError::InvalidCertificate {
                detail: format!("revocation for {} is not signed by its key", revocation.key_id),
            });
        }

        let mut next = self.certificates.clone();
        let key_id = revocation.key_id.clone();
        let reason = revocation.reason.clone();
        if let Some(cert) = next.get_mut(&key_id) {
            cert.revocation = Some(revocation);
        }
        self.persist(next)?;
        info!(key_id = %key_id, reason = ?reason, "revoked certificate");
        Ok(self.certificates[&key_id].info_at(Utc::now()))
    }

    /// Release the handle.
    pub fn close(self) {
        debug!(path = %self.path.display(), "closed trust store");
    }

    fn persist(&mut self, next: IndexMap<String, Certificate>) -> Result<()> {
        let entries: Vec<KeyringEntry> = next
            .values()
            .map(|c| KeyringEntry {
                certificate: c.encoded.clone(),
                revocation: c.revocation.as_ref().map(|r| r.encoded.clone()),
            })
            .collect();
        write_atomic(&self.path, &keyring::encode(&entries))
            .map_err(|e| self.metadata(e.to_string()))?;
        self.certificates = next;
        Ok(())
    }
}
