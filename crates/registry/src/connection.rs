use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// A live agent connection: its outbound frame sink and bookkeeping used by
/// the heartbeat monitor and registry listings.
pub struct AgentConnection {
    pub agent_id: String,
    /// Serialized (UTF-8 JSON) frames queued for this connection's write
    /// loop. Unbounded: backpressure against a slow agent is handled at the
    /// write loop via `write_timeout_s`, not by blocking senders here.
    pub sender: mpsc::UnboundedSender<String>,
    pub metadata: Value,
    pub connected_at: Instant,
    pub last_activity: Instant,
}

impl AgentConnection {
    #[must_use]
    pub fn new(agent_id: impl Into<String>, sender: mpsc::UnboundedSender<String>, metadata: Value) -> Self {
        let now = Instant::now();
        Self {
            agent_id: agent_id.into(),
            sender,
            metadata,
            connected_at: now,
            last_activity: now,
        }
    }

    /// Queue a frame for delivery. Returns `false` if the connection's write
    /// loop has already gone away (the receiver was dropped).
    pub fn send(&self, frame: &str) -> bool {
        self.sender.send(frame.to_string()).is_ok()
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    #[must_use]
    pub fn idle_for(&self) -> std::time::Duration {
        self.last_activity.elapsed()
    }

    /// A snapshot view safe to hand out without exposing the sender or
    /// requiring the caller to hold the registry lock.
    #[must_use]
    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            agent_id: self.agent_id.clone(),
            metadata: self.metadata.clone(),
            connected_at: self.connected_at,
            last_activity: self.last_activity,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionSnapshot {
    pub agent_id: String,
    pub metadata: Value,
    pub connected_at: Instant,
    pub last_activity: Instant,
}
