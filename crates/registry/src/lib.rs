//! Tracks which `agent_id` is bound to which live transport.
//!
//! At most one [`AgentConnection`] may exist per `agent_id` at a time
//! (invariant 1). Binding a second connection for an already-bound
//! `agent_id` either fails or, when the caller passes `force = true`
//! (gateway decides this from identity/certificate checks), evicts the
//! prior connection and returns it to the caller for cleanup.

pub mod connection;
pub mod error;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info};

pub use connection::{AgentConnection, ConnectionSnapshot};
pub use error::{Error, Result};

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    conns: Arc<RwLock<HashMap<String, AgentConnection>>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `agent_id` to a new transport. If a connection already exists
    /// and `force` is false, fails with [`Error::InUse`]. If `force` is
    /// true, the prior connection is evicted and returned so the caller can
    /// close it out (e.g. send a close frame before dropping its sender).
    pub async fn bind(
        &self,
        agent_id: &str,
        sender: mpsc::UnboundedSender<String>,
        metadata: Value,
        force: bool,
    ) -> Result<Option<AgentConnection>> {
        let mut conns = self.conns.write().await;
        if conns.contains_key(agent_id) && !force {
            return Err(Error::InUse(agent_id.to_string()));
        }
        let evicted = conns.insert(agent_id.to_string(), AgentConnection::new(agent_id, sender, metadata));
        if evicted.is_some() {
            info!(agent_id, "evicted prior connection on force bind");
        } else {
            debug!(agent_id, "bound new connection");
        }
        Ok(evicted)
    }

    /// Remove the connection for `agent_id`, if any. Idempotent: calling
    /// this twice (e.g. a racing disconnect and heartbeat eviction) is safe.
    pub async fn unbind(&self, agent_id: &str) -> bool {
        self.conns.write().await.remove(agent_id).is_some()
    }

    /// Only unbind if the currently bound connection is the one identified
    /// by `expect_connected_at` — guards against a disconnect handler for a
    /// stale connection clobbering a connection that reconnected in the
    /// meantime under the same `agent_id`.
    pub async fn unbind_if_current(&self, agent_id: &str, expect_connected_at: tokio::time::Instant) -> bool {
        let mut conns = self.conns.write().await;
        match conns.get(agent_id) {
            Some(conn) if conn.connected_at == expect_connected_at => {
                conns.remove(agent_id);
                true
            },
            _ => false,
        }
    }

    pub async fn touch(&self, agent_id: &str) -> bool {
        if let Some(conn) = self.conns.write().await.get_mut(agent_id) {
            conn.touch();
            true
        } else {
            false
        }
    }

    pub async fn send(&self, agent_id: &str, frame: &str) -> bool {
        match self.conns.read().await.get(agent_id) {
            Some(conn) => conn.send(frame),
            None => false,
        }
    }

    pub async fn lookup(&self, agent_id: &str) -> Option<ConnectionSnapshot> {
        self.conns.read().await.get(agent_id).map(AgentConnection::snapshot)
    }

    pub async fn is_bound(&self, agent_id: &str) -> bool {
        self.conns.read().await.contains_key(agent_id)
    }

    pub async fn list(&self) -> Vec<ConnectionSnapshot> {
        self.conns.read().await.values().map(AgentConnection::snapshot).collect()
    }

    pub async fn count(&self) -> usize {
        self.conns.read().await.len()
    }

    /// `agent_id`s idle longer than `timeout`, for the heartbeat monitor to
    /// ping or evict.
    pub async fn idle_longer_than(&self, timeout: std::time::Duration) -> Vec<String> {
        self.conns
            .read()
            .await
            .values()
            .filter(|conn| conn.idle_for() > timeout)
            .map(|conn| conn.agent_id.clone())
            .collect()
    }
}
