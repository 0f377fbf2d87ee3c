//! [`IdentityManager`]: the authority for who currently owns an `agent_id`.

use std::collections::HashMap;
use std::sync::Arc;

use meshhub_common::time::now_ms;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::certificate::{Certificate, IdentityClaim};
use crate::error::{Error, Result};

/// How a caller is asking to take (or retake) an `agent_id`.
#[derive(Debug, Clone)]
pub enum Authorization {
    /// No prior claim exists, or the caller is only willing to take an
    /// unclaimed `agent_id`.
    None,
    /// The caller is reasserting ownership with a certificate issued on a
    /// prior claim.
    Certificate(Certificate),
    /// The caller is asking to evict whoever currently holds `agent_id`
    /// without presenting a certificate. Honored only when the manager was
    /// constructed with `allow_unauthenticated_reconnect = true`.
    ForceReconnect,
}

/// Owns every outstanding [`IdentityClaim`] and mints/validates
/// certificates against a single shared secret key.
pub struct IdentityManager {
    secret_key: Vec<u8>,
    cert_ttl_ms: u64,
    allow_unauthenticated_reconnect: bool,
    claims: Arc<RwLock<HashMap<String, IdentityClaim>>>,
}

impl IdentityManager {
    #[must_use]
    pub fn new(secret_key: impl Into<Vec<u8>>, cert_ttl_hours: u64) -> Self {
        Self {
            secret_key: secret_key.into(),
            cert_ttl_ms: cert_ttl_hours.saturating_mul(60 * 60 * 1000),
            allow_unauthenticated_reconnect: true,
            claims: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn with_unauthenticated_reconnect(mut self, allow: bool) -> Self {
        self.allow_unauthenticated_reconnect = allow;
        self
    }

    /// Take (or retake) `agent_id`, returning a freshly issued certificate.
    ///
    /// Succeeds when: no claim currently exists, the caller presents a
    /// certificate that verifies and matches the current claim, or the
    /// caller asks for a forced reconnect and the manager allows it.
    pub async fn claim(&self, agent_id: &str, auth: Authorization) -> Result<Certificate> {
        let mut claims = self.claims.write().await;

        if let Some(existing) = claims.get(agent_id) {
            let authorized = match &auth {
                Authorization::Certificate(cert) => {
                    cert.agent_id == agent_id
                        && cert.verify_signature(&self.secret_key)
                        && cert.cert_hash == existing.current_certificate.cert_hash
                },
                Authorization::ForceReconnect => self.allow_unauthenticated_reconnect,
                Authorization::None => false,
            };
            if !authorized {
                return Err(Error::Taken(agent_id.to_string()));
            }
            debug!(agent_id, "reclaiming agent_id");
        }

        let issued_at = now_ms();
        let expires_at = issued_at.saturating_add(self.cert_ttl_ms);
        let cert = Certificate::issue(&self.secret_key, agent_id, issued_at, expires_at);

        claims.insert(
            agent_id.to_string(),
            IdentityClaim {
                agent_id: agent_id.to_string(),
                current_certificate: cert.clone(),
                claim_ts: issued_at,
            },
        );
        info!(agent_id, expires_at, "issued certificate");
        Ok(cert)
    }

    /// Verify a certificate against the secret key and expiry, returning the
    /// `agent_id` it attests to on success.
    #[must_use]
    pub fn validate(&self, cert: &Certificate) -> (bool, &str) {
        let ok = cert.verify_signature(&self.secret_key) && cert.not_expired(now_ms());
        (ok, &cert.agent_id)
    }

    /// Whether `cert` authorizes overriding whatever currently holds
    /// `agent_id` (used by `force_reconnect` handling at the gateway layer).
    pub async fn authorize_override(&self, agent_id: &str, cert: &Certificate) -> bool {
        if cert.agent_id != agent_id || !self.validate(cert).0 {
            return false;
        }
        let claims = self.claims.read().await;
        claims
            .get(agent_id)
            .is_none_or(|existing| existing.current_certificate.cert_hash == cert.cert_hash)
    }

    /// Drop the claim on `agent_id`, if any.
    pub async fn release(&self, agent_id: &str) {
        self.claims.write().await.remove(agent_id);
    }

    /// Remove every claim whose certificate has expired. Run periodically by
    /// the gateway alongside the heartbeat monitor so long-dead claims don't
    /// accumulate.
    pub async fn sweep_expired(&self) -> usize {
        let now = now_ms();
        let mut claims = self.claims.write().await;
        let before = claims.len();
        claims.retain(|_, claim| claim.current_certificate.not_expired(now));
        let removed = before - claims.len();
        if removed > 0 {
            debug!(removed, "swept expired identity claims");
        }
        removed
    }

    pub async fn lookup(&self, agent_id: &str) -> Option<IdentityClaim> {
        self.claims.read().await.get(agent_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> IdentityManager {
        IdentityManager::new(b"secret".to_vec(), 24)
    }

    #[tokio::test]
    async fn claim_then_validate_round_trips() {
        let mgr = manager();
        let cert = mgr.claim("a1", Authorization::None).await.expect("claim succeeds");
        let (ok, agent_id) = mgr.validate(&cert);
        assert!(ok);
        assert_eq!(agent_id, "a1");
    }

    #[tokio::test]
    async fn second_claim_without_certificate_is_rejected() {
        let mgr = manager();
        mgr.claim("a1", Authorization::None).await.expect("first claim succeeds");
        let err = mgr.claim("a1", Authorization::None).await.unwrap_err();
        assert!(matches!(err, Error::Taken(_)));
    }

    #[tokio::test]
    async fn reclaim_with_matching_certificate_succeeds() {
        let mgr = manager();
        let cert = mgr.claim("a1", Authorization::None).await.expect("first claim succeeds");
        let cert2 = mgr
            .claim("a1", Authorization::Certificate(cert))
            .await
            .expect("reclaim with valid certificate succeeds");
        assert_eq!(cert2.agent_id, "a1");
    }

    #[tokio::test]
    async fn force_reconnect_overrides_existing_claim() {
        let mgr = manager();
        mgr.claim("a1", Authorization::None).await.expect("first claim succeeds");
        let cert = mgr
            .claim("a1", Authorization::ForceReconnect)
            .await
            .expect("force reconnect succeeds by default");
        assert_eq!(cert.agent_id, "a1");
    }

    #[tokio::test]
    async fn force_reconnect_denied_when_disabled() {
        let mgr = manager().with_unauthenticated_reconnect(false);
        mgr.claim("a1", Authorization::None).await.expect("first claim succeeds");
        let err = mgr.claim("a1", Authorization::ForceReconnect).await.unwrap_err();
        assert!(matches!(err, Error::Taken(_)));
    }

    #[tokio::test]
    async fn expired_certificate_fails_validation() {
        let mgr = IdentityManager::new(b"secret".to_vec(), 0);
        let cert = mgr.claim("a1", Authorization::None).await.expect("claim succeeds");
        assert!(!mgr.validate(&cert).0);
    }
}
