//! [`meshhub_heartbeat::PingSink`] implementation: serializes and enqueues a
//! `system_request{command:"ping_agent"}` frame on the agent's connection.
//!
//! The heartbeat monitor only needs to know whether the send itself
//! succeeded; the matching `system_response` (the "pong") arrives later on
//! the ordinary read loop and is routed back to [`HeartbeatHandle::note_pong`]
//! by [`crate::ws`], not observed here.

use async_trait::async_trait;
use meshhub_heartbeat::PingSink;
use meshhub_mods::ModHost;
use meshhub_protocol::{Frame, SystemRequest};
use meshhub_registry::ConnectionRegistry;

pub struct GatewayPingSink {
    registry: ConnectionRegistry,
    mods: ModHost,
}

impl GatewayPingSink {
    #[must_use]
    pub fn new(registry: ConnectionRegistry, mods: ModHost) -> Self {
        Self { registry, mods }
    }
}

#[async_trait]
impl PingSink for GatewayPingSink {
    async fn send_ping(&self, agent_id: &str) -> bool {
        let frame = Frame::SystemRequest(SystemRequest {
            command: "ping_agent".to_string(),
            fields: serde_json::json!({"timestamp": meshhub_common::time::now_ms()}),
        });
        let serialized = serde_json::to_string(&frame).unwrap_or_default();
        self.registry.send(agent_id, &serialized).await
    }

    /// A heartbeat-evicted agent's reader task is already gone (or about to
    /// die unbinding nothing, via `unbind_if_current`), so it will never run
    /// the ordinary disconnect cleanup in `crate::ws`. Notify mods here
    /// instead, so membership cleanup (e.g. the channel mod dropping the
    /// agent from every channel) still happens.
    async fn on_evicted(&self, agent_id: &str) {
        self.mods.notify_disconnect(agent_id).await;
    }
}
