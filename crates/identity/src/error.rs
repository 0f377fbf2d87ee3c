use thiserror::Error;

/// Errors surfaced by [`crate::manager::IdentityManager`].
#[derive(Debug, Error)]
pub enum Error {
    /// `agent_id` is already claimed by a live certificate and the caller
    /// did not present a valid certificate or force-reconnect authorization.
    #[error("agent_id already claimed: {0}")]
    Taken(String),

    /// The certificate presented did not verify against the configured
    /// secret key, or has expired.
    #[error("invalid certificate for agent_id: {0}")]
    InvalidCertificate(String),

    /// No claim exists for this `agent_id`.
    #[error("no claim for agent_id: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;
