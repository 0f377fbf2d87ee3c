//! Certificate-based identity for `agent_id`s: issuing, verifying, and
//! sweeping HMAC-signed proofs of ownership.

pub mod certificate;
pub mod error;
pub mod manager;

pub use certificate::{Certificate, IdentityClaim};
pub use error::{Error, Result};
pub use manager::{Authorization, IdentityManager};
