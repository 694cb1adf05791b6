//! Signature verification against the trust store.
//!
//! [`SignatureVerifier`] is a pure check of one artifact. A
//! [`VerificationSession`] wraps it for a whole install, update or rollback:
//! unknown signers are offered to a [`CertificateAcceptor`] once, accepted
//! certificates are held as [`PendingImports`] until the caller commits, and
//! the cryptographic checks of many artifacts run on worker threads.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use quay_core::{Channel, Coordinate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::certificate::{Certificate, CertificateInfo, CertificateStatus};
use crate::error::{Result, TrustError};
use crate::store::TrustStore;

/// Whether a channel's artifacts must carry a trusted signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrustPolicy {
    Required,
    Unchecked,
}

impl TrustPolicy {
    /// Signatures are required when the channel asks for them and at least
    /// one of its repositories is remote. Local repositories are trusted.
    pub fn for_channel(channel: &Channel) -> Self {
        if channel.gpg_check && !channel.is_local_only() {
            TrustPolicy::Required
        } else {
            TrustPolicy::Unchecked
        }
    }
}

/// Outcome of checking one artifact's signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignatureCheckResult {
    Ok,
    NoSignature,
    Invalid,
    NoMatchingCert,
    Expired,
    Revoked,
}

impl fmt::Display for SignatureCheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignatureCheckResult::Ok => "OK",
            SignatureCheckResult::NoSignature => "NO_SIGNATURE",
            SignatureCheckResult::Invalid => "INVALID",
            SignatureCheckResult::NoMatchingCert => "NO_MATCHING_CERT",
            SignatureCheckResult::Expired => "EXPIRED",
            SignatureCheckResult::Revoked => "REVOKED",
        };
        f.write_str(s)
    }
}

/// A check result with the signer's key id when one could be read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureCheck {
    pub result: SignatureCheckResult,
    pub key_id: Option<String>,
}

impl SignatureCheck {
    fn new(result: SignatureCheckResult, key_id: Option<String>) -> Self {
        SignatureCheck { result, key_id }
    }

    pub fn is_ok(&self) -> bool {
        self.result == SignatureCheckResult::Ok
    }

    /// Turn a failed check into a terminal [`TrustError::SignatureFailure`].
    pub fn into_result(self, coordinate: &Coordinate) -> Result<()> {
        if self.is_ok() {
            return Ok(());
        }
        Err(TrustError::SignatureFailure {
            coordinate: coordinate.to_string(),
            result: self.result,
            key_id: self.key_id,
        })
    }
}

/// Checks detached signatures against the trust store, plus certificates
/// accepted earlier in the same operation but not yet imported.
#[derive(Debug, Clone, Copy)]
pub struct SignatureVerifier<'a> {
    store: &'a TrustStore,
    pending: Option<&'a IndexMap<String, Certificate>>,
}

impl<'a> SignatureVerifier<'a> {
    pub fn new(store: &'a TrustStore) -> Self {
        SignatureVerifier {
            store,
            pending: None,
        }
    }

    fn with_pending(store: &'a TrustStore, pending: &'a IndexMap<String, Certificate>) -> Self {
        SignatureVerifier {
            store,
            pending: Some(pending),
        }
    }

    fn certificate(&self, key_id: &str) -> Option<&'a Certificate> {
        self.store
            .get_certificate(key_id)
            .or_else(|| self.pending.and_then(|p| p.get(key_id)))
    }

    /// Check `signature` over `data` under `policy`, at the current time.
    pub fn verify(
        &self,
        coordinate: &Coordinate,
        data: &[u8],
        signature: Option<&[u8]>,
        policy: TrustPolicy,
    ) -> SignatureCheck {
        self.verify_at(coordinate, data, signature, policy, Utc::now())
    }

    /// Check `signature` over `data` under `policy`, with certificate
    /// status evaluated at `now`.
    pub fn verify_at(
        &self,
        coordinate: &Coordinate,
        data: &[u8],
        signature: Option<&[u8]>,
        policy: TrustPolicy,
        now: DateTime<Utc>,
    ) -> SignatureCheck {
        let check = self.check(data, signature, policy, now);
        if check.is_ok() {
            debug!(%coordinate, key_id = ?check.key_id, "signature ok");
        } else {
            warn!(%coordinate, result = %check.result, key_id = ?check.key_id, "signature check failed");
        }
        check
    }

    fn check(
        &self,
        data: &[u8],
        signature: Option<&[u8]>,
        policy: TrustPolicy,
        now: DateTime<Utc>,
    ) -> SignatureCheck {
        use SignatureCheckResult::*;

        if policy == TrustPolicy::Unchecked {
            return SignatureCheck::new(Ok, None);
        }
        let Some(signature) = signature else {
            return SignatureCheck::new(NoSignature, None);
        };
        let backend = self.store.backend();
        let Some(key_id) = backend.signer_key_id(signature) else {
            return SignatureCheck::new(Invalid, None);
        };
        let Some(cert) = self.certificate(&key_id) else {
            return SignatureCheck::new(NoMatchingCert, Some(key_id));
        };
        if !backend.verify_signature(data, signature, cert) {
            return SignatureCheck::new(Invalid, Some(key_id));
        }
        let result = match cert.status_at(now) {
            CertificateStatus::Revoked => Revoked,
            CertificateStatus::Expired => Expired,
            CertificateStatus::Trusted => Ok,
        };
        SignatureCheck::new(result, Some(key_id))
    }
}

/// Interactive decision on a certificate seen for the first time.
pub trait CertificateAcceptor {
    fn accept_certificate(&self, candidate: &CertificateInfo) -> bool;
}

impl<F> CertificateAcceptor for F
where
    F: Fn(&CertificateInfo) -> bool,
{
    fn accept_certificate(&self, candidate: &CertificateInfo) -> bool {
        self(candidate)
    }
}

/// Fetches candidate certificates from a channel's certificate locations.
pub trait CertificateSource {
    fn fetch_certificate(&self, location: &str) -> Option<Vec<u8>>;
}

/// Reads certificates from `file:` URLs or plain paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileCertificateSource;

impl CertificateSource for FileCertificateSource {
    fn fetch_certificate(&self, location: &str) -> Option<Vec<u8>> {
        let path = location
            .strip_prefix("file://")
            .or_else(|| location.strip_prefix("file:"))
            .unwrap_or(location);
        match std::fs::read(Path::new(path)) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                debug!(location, error = %e, "certificate not available");
                None
            }
        }
    }
}

/// One artifact to verify within a session.
#[derive(Debug, Clone)]
pub struct VerificationItem {
    pub coordinate: Coordinate,
    pub data: Vec<u8>,
    pub signature: Option<Vec<u8>>,
    pub policy: TrustPolicy,
    /// Where to look for the signer's certificate if it is not trusted yet.
    pub gpg_urls: Vec<String>,
}

/// Certificates accepted during an operation, imported on commit.
#[derive(Debug, Default)]
pub struct PendingImports {
    certificates: Vec<Certificate>,
}

impl PendingImports {
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    /// Import every accepted certificate not already present.
    pub fn commit(self, store: &mut TrustStore) -> Result<Vec<CertificateInfo>> {
        let mut imported = Vec::new();
        for cert in self.certificates {
            if store.get_certificate(&cert.key_id).is_some() {
                continue;
            }
            imported.push(store.import_certificate(&cert.encoded)?);
        }
        Ok(imported)
    }
}

/// Per-operation verification state.
///
/// Without an acceptor the session only audits: unknown signers come back
/// as NO_MATCHING_CERT instead of raising an error.
pub struct VerificationSession<'a> {
    store: &'a TrustStore,
    source: &'a dyn CertificateSource,
    acceptor: Option<&'a dyn CertificateAcceptor>,
    accepted: IndexMap<String, Certificate>,
    rejected: BTreeSet<String>,
}

impl fmt::Debug for VerificationSession<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationSession")
            .field("interactive", &self.acceptor.is_some())
            .field("accepted", &self.accepted.keys().collect::<Vec<_>>())
            .field("rejected", &self.rejected)
            .finish()
    }
}

impl<'a> VerificationSession<'a> {
    pub fn new(store: &'a TrustStore, source: &'a dyn CertificateSource) -> Self {
        VerificationSession {
            store,
            source,
            acceptor: None,
            accepted: IndexMap::new(),
            rejected: BTreeSet::new(),
        }
    }

    /// Builder: ask `acceptor` about unknown signers.
    pub fn with_acceptor(mut self, acceptor: &'a dyn CertificateAcceptor) -> Self {
        self.acceptor = Some(acceptor);
        self
    }

    /// Make sure the signer of `item` is known, asking the acceptor on first
    /// encounter. Rejection, or no candidate certificate, is terminal.
    pub fn resolve_signer(&mut self, item: &VerificationItem) -> Result<()> {
        let Some(acceptor) = self.acceptor else {
            return Ok(());
        };
        if item.policy == TrustPolicy::Unchecked {
            return Ok(());
        }
        let Some(signature) = item.signature.as_deref() else {
            return Ok(());
        };
        let Some(key_id) = self.store.backend().signer_key_id(signature) else {
            return Ok(());
        };
        if self.store.get_certificate(&key_id).is_some() || self.accepted.contains_key(&key_id) {
            return Ok(());
        }

        let failure = |key_id: String| TrustError::SignatureFailure {
            coordinate: item.coordinate.to_string(),
            result: SignatureCheckResult::NoMatchingCert,
            key_id: Some(key_id),
        };
        if self.rejected.contains(&key_id) {
            return Err(failure(key_id));
        }

        let Some(candidate) = self.candidate(&key_id, &item.gpg_urls) else {
            warn!(coordinate = %item.coordinate, %key_id, "no certificate available for signer");
            self.rejected.insert(key_id.clone());
            return Err(failure(key_id));
        };
        if acceptor.accept_certificate(&candidate.info_at(Utc::now())) {
            info!(%key_id, user_ids = ?candidate.user_ids, "certificate accepted");
            self.accepted.insert(key_id, candidate);
            Ok(())
        } else {
            warn!(coordinate = %item.coordinate, %key_id, "certificate rejected");
            self.rejected.insert(key_id.clone());
            Err(failure(key_id))
        }
    }

    fn candidate(&self, key_id: &str, locations: &[String]) -> Option<Certificate> {
        let backend = self.store.backend();
        locations.iter().find_map(|location| {
            let bytes = self.source.fetch_certificate(location)?;
            match backend.parse_certificate(&bytes) {
                Ok(cert) if cert.key_id == key_id => Some(cert),
                Ok(_) => None,
                Err(e) => {
                    debug!(location = %location, error = %e, "ignoring unparsable certificate");
                    None
                }
            }
        })
    }

    /// Resolve signers and check one artifact.
    pub fn verify(&mut self, item: &VerificationItem) -> Result<SignatureCheck> {
        self.resolve_signer(item)?;
        Ok(SignatureVerifier::with_pending(self.store, &self.accepted).verify(
            &item.coordinate,
            &item.data,
            item.signature.as_deref(),
            item.policy,
        ))
    }

    /// Resolve all signers, then run the checks on up to `threads` workers.
    ///
    /// Results line up with `items` whatever the worker scheduling.
    pub fn verify_all(
        &mut self,
        items: &[VerificationItem],
        threads: usize,
    ) -> Result<Vec<SignatureCheck>> {
        for item in items {
            self.resolve_signer(item)?;
        }
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let verifier = SignatureVerifier::with_pending(self.store, &self.accepted);
        let chunk_size = items.len().div_ceil(threads.clamp(1, items.len()));
        let results = std::thread::scope(|scope| {
            let workers: Vec<_> = items
                .chunks(chunk_size)
                .map(|chunk| {
                    scope.spawn(move || {
                        chunk
                            .iter()
                            .map(|item| {
                                verifier.verify(
                                    &item.coordinate,
                                    &item.data,
                                    item.signature.as_deref(),
                                    item.policy,
                                )
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            workers
                .into_iter()
                .flat_map(|w| w.join().unwrap_or_else(|p| std::panic::resume_unwind(p)))
                .collect()
        });
        Ok(results)
    }

    /// Accepted certificates, to be committed once the operation succeeds.
    pub fn finish(self) -> PendingImports {
        PendingImports {
            certificates: self.accepted.into_values().collect(),
        }
    }
}
