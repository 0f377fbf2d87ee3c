//! Classifies and delivers inbound message frames.
//!
//! Direct and reply messages go straight to the target connection via the
//! registry; broadcasts fan out to every other bound connection; mod and
//! channel/thread-reply frames are handed to whichever mod owns them. The
//! router holds no long-lived locks of its own — every registry call here
//! is a snapshot read or a single send.

pub mod error;

use std::sync::Arc;

use async_trait::async_trait;
use meshhub_protocol::{Frame, ModDirection, ModMessage};
use meshhub_registry::ConnectionRegistry;
use uuid::Uuid;

pub use error::{Error, Result};

/// Name reserved for the canonical threaded channel-messaging mod. Routed
/// to directly rather than via the generic `mod` field, since channel and
/// channel-reply frames don't carry a `mod` name on the wire.
pub const CHANNEL_MOD_NAME: &str = "channel";

/// Where the router hands off frames it doesn't deliver directly: named
/// mods (`mod_message.mod`) and the channel-messaging mod
/// ([`CHANNEL_MOD_NAME`]).
#[async_trait]
pub trait ModDispatch: Send + Sync {
    async fn dispatch(&self, mod_name: &str, frame: Frame);
}

pub struct Router<D> {
    registry: ConnectionRegistry,
    mods: Arc<D>,
}

impl<D: ModDispatch> Router<D> {
    #[must_use]
    pub fn new(registry: ConnectionRegistry, mods: Arc<D>) -> Self {
        Self { registry, mods }
    }

    /// Route one inbound frame from the connection bound to `bound_agent_id`.
    ///
    /// Only frame kinds with a `sender_id` (every kind except the
    /// system request/response pair, which the dispatcher handles) should
    /// be passed here.
    pub async fn route(&self, frame: Frame, bound_agent_id: &str) -> Result<()> {
        self.registry.touch(bound_agent_id).await;

        match frame.sender_id() {
            Some(sender_id) if sender_id == bound_agent_id => {},
            _ => return Err(Error::SenderMismatch),
        }

        match frame {
            Frame::DirectMessage(ref m) => {
                self.deliver_or_notify_unreachable(&m.target_agent_id, bound_agent_id, &frame).await;
                // The channel mod owns dm_history bookkeeping; it observes
                // every direct message regardless of delivery outcome.
                self.mods.dispatch(CHANNEL_MOD_NAME, frame).await;
            },
            Frame::ReplyMessage(ref m) => {
                let target = m.target_agent_id.clone();
                let is_channel_reply = m.channel.is_some();
                if let Some(target) = target {
                    self.deliver_or_notify_unreachable(&target, bound_agent_id, &frame).await;
                    self.mods.dispatch(CHANNEL_MOD_NAME, frame).await;
                } else if is_channel_reply {
                    self.mods.dispatch(CHANNEL_MOD_NAME, frame).await;
                }
            },
            Frame::BroadcastMessage(ref m) => {
                let exclude = m.exclude_agent_ids.clone().unwrap_or_default();
                let serialized = serde_json::to_string(&frame).unwrap_or_default();
                for conn in self.registry.list().await {
                    if conn.agent_id == bound_agent_id || exclude.contains(&conn.agent_id) {
                        continue;
                    }
                    self.registry.send(&conn.agent_id, &serialized).await;
                }
            },
            Frame::ModMessage(ref m) => {
                let mod_name = m.mod_name.clone();
                self.mods.dispatch(&mod_name, frame).await;
            },
            Frame::ChannelMessage(_) => {
                self.mods.dispatch(CHANNEL_MOD_NAME, frame).await;
            },
            Frame::SystemRequest(_) | Frame::SystemResponse(_) => {},
        }

        Ok(())
    }

    async fn deliver_or_notify_unreachable(&self, target_agent_id: &str, sender_id: &str, frame: &Frame) {
        if self.registry.is_bound(target_agent_id).await {
            let serialized = serde_json::to_string(frame).unwrap_or_default();
            self.registry.send(target_agent_id, &serialized).await;
            return;
        }

        let unreachable = ModMessage {
            message_id: Uuid::new_v4(),
            timestamp: meshhub_common::time::now_ms(),
            sender_id: "system".to_string(),
            mod_name: "system".to_string(),
            direction: ModDirection::Outbound,
            relevant_agent_id: target_agent_id.to_string(),
            content: serde_json::json!({"error": meshhub_protocol::error_codes::UNREACHABLE}),
            text_representation: None,
            metadata: None,
            requires_response: None,
        };
        let serialized = serde_json::to_string(&Frame::ModMessage(unreachable)).unwrap_or_default();
        self.registry.send(sender_id, &serialized).await;
    }
}
