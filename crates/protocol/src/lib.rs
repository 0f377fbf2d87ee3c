//! Wire protocol definitions for the meshhub message bus.
//!
//! All communication is UTF-8 JSON, one object per frame, delivered over a
//! persistent bidirectional transport (a WebSocket in this implementation).
//! Every frame carries a `type` discriminant; [`Frame`] is the discriminated
//! union of every frame kind the hub understands.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ── Constants ────────────────────────────────────────────────────────────────

/// Default maximum frame size, in bytes, before a connection is treated as
/// sending oversized garbage and is dropped.
pub const DEFAULT_MAX_MESSAGE_SIZE_BYTES: usize = 100 * 1024 * 1024;
/// Default heartbeat tick period.
pub const DEFAULT_HEARTBEAT_INTERVAL_S: u64 = 30;
/// Default quiet-period after which a connection becomes a heartbeat target.
pub const DEFAULT_AGENT_TIMEOUT_S: u64 = 90;
/// Default per-ping timeout before a connection is considered dead.
pub const DEFAULT_PING_TIMEOUT_S: u64 = 5;
/// Default certificate lifetime.
pub const DEFAULT_CERT_TTL_HOURS: u64 = 24;
/// Default per-blob upload cap.
pub const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
/// Default rolling history capacity per channel/DM pair.
pub const DEFAULT_CHANNEL_HISTORY_CAPACITY: usize = 2000;
/// Maximum reply nesting: root is level 0, deepest reply is level 4.
pub const MAX_THREAD_DEPTH: u8 = 5;
/// Default backpressure grace period on a connection's outbound queue.
pub const DEFAULT_WRITE_TIMEOUT_S: u64 = 10;
/// Maximum page size accepted by history retrieval operations.
pub const MAX_RETRIEVE_LIMIT: u32 = 500;

/// A reply's nesting depth. `0` is a root message; `reply.level =
/// parent.level + 1` and must not exceed [`MAX_THREAD_DEPTH`] - 1 (`4`).
pub type ThreadLevel = u8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModDirection {
    Inbound,
    Outbound,
}

// ── Envelope structs ─────────────────────────────────────────────────────────
//
// Each message kind gets its own typed struct rather than one flattened
// megastruct: field sets genuinely differ per kind, and keeping them
// separate means a caller can't construct a `reply_message` that forgot
// `reply_to_id`. Unknown/extra JSON fields present on ingress are preserved
// only at the router's ingress/egress boundary (see `meshhub-router`), not
// reflected in these types.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectMessage {
    pub message_id: Uuid,
    pub timestamp: u64,
    pub sender_id: String,
    pub target_agent_id: String,
    pub content: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_representation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_response: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastMessage {
    pub message_id: Uuid,
    pub timestamp: u64,
    pub sender_id: String,
    pub content: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_agent_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_representation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_response: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModMessage {
    pub message_id: Uuid,
    pub timestamp: u64,
    pub sender_id: String,
    #[serde(rename = "mod")]
    pub mod_name: String,
    pub direction: ModDirection,
    pub relevant_agent_id: String,
    pub content: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_representation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_response: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub message_id: Uuid,
    pub timestamp: u64,
    pub sender_id: String,
    pub channel: String,
    pub content: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mentioned_agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quoted_message_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quoted_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_representation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_response: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyMessage {
    pub message_id: Uuid,
    pub timestamp: u64,
    pub sender_id: String,
    pub reply_to_id: Uuid,
    pub thread_level: ThreadLevel,
    pub content: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quoted_message_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_representation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_response: Option<bool>,
}

/// Client → server RPC request. `command`-specific inputs are carried as
/// flattened top-level fields (matching the literal wire examples in the
/// spec) rather than nested under a `params` object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemRequest {
    pub command: String,
    #[serde(flatten)]
    pub fields: Value,
}

/// Server → client RPC response, always correlated to a request by
/// `command` (clients that need concurrent in-flight commands correlate
/// via their own `metadata` field per spec).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemResponse {
    pub command: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub fields: Value,
}

impl SystemResponse {
    #[must_use]
    pub fn ok(command: impl Into<String>, fields: Value) -> Self {
        Self {
            command: command.into(),
            success: true,
            error: None,
            fields,
        }
    }

    #[must_use]
    pub fn err(command: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            success: false,
            error: Some(error.into()),
            fields: Value::Null,
        }
    }
}

/// Discriminated union of every frame kind accepted on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    DirectMessage(DirectMessage),
    BroadcastMessage(BroadcastMessage),
    ModMessage(ModMessage),
    ChannelMessage(ChannelMessage),
    ReplyMessage(ReplyMessage),
    SystemRequest(SystemRequest),
    SystemResponse(SystemResponse),
}

impl Frame {
    /// The `sender_id` carried by every frame kind except `system_response`,
    /// which has none (it is a reply addressed by connection, not identity).
    #[must_use]
    pub fn sender_id(&self) -> Option<&str> {
        match self {
            Frame::DirectMessage(m) => Some(&m.sender_id),
            Frame::BroadcastMessage(m) => Some(&m.sender_id),
            Frame::ModMessage(m) => Some(&m.sender_id),
            Frame::ChannelMessage(m) => Some(&m.sender_id),
            Frame::ReplyMessage(m) => Some(&m.sender_id),
            Frame::SystemRequest(_) | Frame::SystemResponse(_) => None,
        }
    }
}

// ── Well-known error strings ─────────────────────────────────────────────────
//
// Stable error codes returned inside `system_response.error` or a mod's
// response envelope, per spec §7/§4.8.
pub mod error_codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const UNKNOWN_COMMAND: &str = "unknown_command";
    pub const ALREADY_REGISTERED: &str = "agent_id already registered";
    pub const SENDER_MISMATCH: &str = "sender_mismatch";
    pub const UNREACHABLE: &str = "unreachable";
    pub const THREAD_DEPTH_EXCEEDED: &str = "thread_depth_exceeded";
    pub const UNKNOWN_CHANNEL: &str = "unknown_channel";
    pub const FILE_TOO_LARGE: &str = "file_too_large";
    pub const NOT_FOUND: &str = "not_found";
    pub const TAKEN: &str = "taken";
    pub const INVALID_CERTIFICATE: &str = "invalid_certificate";
}
