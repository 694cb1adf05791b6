//! Certificate records and their derived status.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Trust status of a certificate at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CertificateStatus {
    Trusted,
    Expired,
    Revoked,
}

impl fmt::Display for CertificateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertificateStatus::Trusted => write!(f, "TRUSTED"),
            CertificateStatus::Expired => write!(f, "EXPIRED"),
            CertificateStatus::Revoked => write!(f, "REVOKED"),
        }
    }
}

/// An applied key revocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revocation {
    /// Key id of the revoked certificate.
    pub key_id: String,
    pub revoked_at: DateTime<Utc>,
    pub reason: Option<String>,
    /// Original revocation bytes, persisted in the keyring.
    pub encoded: Vec<u8>,
}

/// A public certificate held by the trust store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    /// Short key id (last 16 hex digits of the fingerprint, uppercase).
    pub key_id: String,
    /// Full fingerprint, uppercase hex.
    pub fingerprint: String,
    pub user_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// End of the validity window; `None` never expires.
    pub expires_at: Option<DateTime<Utc>>,
    pub public_key: Vec<u8>,
    /// Original certificate bytes, persisted in the keyring.
    pub encoded: Vec<u8>,
    /// Present once a revocation has been applied. The key is kept so
    /// earlier signatures remain attributable.
    pub revocation: Option<Revocation>,
}

impl Certificate {
    /// Status at `now`. Revocation takes precedence over expiry.
    pub fn status_at(&self, now: DateTime<Utc>) -> CertificateStatus {
        if self.revocation.is_some() {
            CertificateStatus::Revoked
        } else if self.expires_at.is_some_and(|exp| now > exp) {
            CertificateStatus::Expired
        } else {
            CertificateStatus::Trusted
        }
    }

    pub fn status(&self) -> CertificateStatus {
        self.status_at(Utc::now())
    }

    /// Summary with the status computed at `now`.
    pub fn info_at(&self, now: DateTime<Utc>) -> CertificateInfo {
        CertificateInfo {
            key_id: self.key_id.clone(),
            fingerprint: self.fingerprint.clone(),
            user_ids: self.user_ids.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            status: self.status_at(now),
        }
    }
}

/// Listing view of a certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub key_id: String,
    pub fingerprint: String,
    pub user_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: CertificateStatus,
}

impl fmt::Display for CertificateInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}] {}",
            self.key_id,
            self.status,
            self.user_ids.join(", "),
            self.expires_at
                .map(|e| format!("expires {}", e.format("%Y-%m-%d")))
                .unwrap_or_else(|| "no expiry".to_string())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn cert(expires_at: Option<DateTime<Utc>>) -> Certificate {
        Certificate {
            key_id: "0123456789ABCDEF".into(),
            fingerprint: "FF".repeat(24) + "0123456789ABCDEF",
            user_ids: vec!["Release Team <release@example.org>".into()],
            created_at: Utc::now() - Duration::days(10),
            expires_at,
            public_key: vec![0; 32],
            encoded: Vec::new(),
            revocation: None,
        }
    }

    #[test]
    fn status_transitions() {
        let now = Utc::now();
        assert_eq!(cert(None).status_at(now), CertificateStatus::Trusted);
        assert_eq!(
            cert(Some(now + Duration::days(1))).status_at(now),
            CertificateStatus::Trusted
        );
        assert_eq!(
            cert(Some(now - Duration::days(1))).status_at(now),
            CertificateStatus::Expired
        );
    }

    #[test]
    fn revocation_wins_over_expiry() {
        let now = Utc::now();
        let mut c = cert(Some(now - Duration::days(1)));
        c.revocation = Some(Revocation {
            key_id: c.key_id.clone(),
            revoked_at: now,
            reason: None,
            encoded: Vec::new(),
        });
        assert_eq!(c.status_at(now), CertificateStatus::Revoked);
    }

    #[test]
    fn info_display() {
        let info = cert(None).info_at(Utc::now());
        let text = info.to_string();
        assert!(text.starts_with("0123456789ABCDEF TRUSTED"));
        assert!(text.ends_with("no expiry"));
    }
}
