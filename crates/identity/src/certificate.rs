//! Certificates and identity claims — the data that [`crate::manager::IdentityManager`]
//! mints, stores, and validates.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// The subset of a certificate's fields that are actually signed over.
/// Kept as its own struct so signing and verification always canonicalize
/// the exact same shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedFields {
    pub agent_id: String,
    pub issued_at: u64,
    pub expires_at: u64,
}

/// An HMAC-signed proof of ownership of an `agent_id`, with an expiry.
/// Immutable once issued.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Certificate {
    pub agent_id: String,
    pub issued_at: u64,
    pub expires_at: u64,
    /// `SHA256(canonical_json(SignedFields))`, hex-encoded.
    pub cert_hash: String,
    /// `HMAC_SHA256(secret_key, canonical_json(SignedFields))`, hex-encoded.
    pub signature: String,
}

impl Certificate {
    /// Mint a new certificate for `agent_id`, signed with `secret_key`.
    pub fn issue(secret_key: &[u8], agent_id: &str, issued_at: u64, expires_at: u64) -> Self {
        let fields = SignedFields {
            agent_id: agent_id.to_string(),
            issued_at,
            expires_at,
        };
        let canonical = meshhub_common::canonical::canonical_json_bytes(&fields)
            .unwrap_or_else(|_| Vec::new());

        let cert_hash = hex::encode(sha256(&canonical));
        let signature = hex::encode(hmac_sha256(secret_key, &canonical));

        Self {
            agent_id: agent_id.to_string(),
            issued_at,
            expires_at,
            cert_hash,
            signature,
        }
    }

    /// Recompute the signature over this certificate's fields and compare
    /// with the stored one, in constant time via `hmac`'s `verify_slice`.
    pub fn verify_signature(&self, secret_key: &[u8]) -> bool {
        let fields = SignedFields {
            agent_id: self.agent_id.clone(),
            issued_at: self.issued_at,
            expires_at: self.expires_at,
        };
        let Ok(canonical) = meshhub_common::canonical::canonical_json_bytes(&fields) else {
            return false;
        };
        let Ok(expected_raw) = hex::decode(&self.signature) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret_key) else {
            return false;
        };
        mac.update(&canonical);
        mac.verify_slice(&expected_raw).is_ok()
    }

    /// Whether `now` (ms since epoch) is still within this certificate's
    /// validity window.
    pub fn not_expired(&self, now_ms: u64) -> bool {
        now_ms < self.expires_at
    }
}

/// A standing claim on an `agent_id`, owned by the identity manager.
#[derive(Debug, Clone)]
pub struct IdentityClaim {
    pub agent_id: String,
    pub current_certificate: Certificate,
    pub claim_ts: u64,
}

fn sha256(bytes: &[u8]) -> Vec<u8> {
    use sha2::Digest;
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().to_vec()
}

fn hmac_sha256(key: &[u8], bytes: &[u8]) -> Vec<u8> {
    #[allow(clippy::expect_used)]
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(bytes);
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_certificate_verifies() {
        let cert = Certificate::issue(b"secret", "a1", 1_000, 2_000);
        assert!(cert.verify_signature(b"secret"));
        assert!(cert.not_expired(1_500));
        assert!(!cert.not_expired(2_000));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let cert = Certificate::issue(b"secret", "a1", 1_000, 2_000);
        assert!(!cert.verify_signature(b"other-secret"));
    }

    #[test]
    fn tampered_agent_id_fails_verification() {
        let mut cert = Certificate::issue(b"secret", "a1", 1_000, 2_000);
        cert.agent_id = "a2".into();
        assert!(!cert.verify_signature(b"secret"));
    }
}
