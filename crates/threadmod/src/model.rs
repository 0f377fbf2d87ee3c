use std::collections::{HashMap, HashSet};

use meshhub_protocol::Frame;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stored message: its original envelope plus the thread/reaction state
/// the mod layers on top.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub envelope: Frame,
    pub parent_id: Option<Uuid>,
    pub level: u8,
    pub children: Vec<Uuid>,
    pub reactions: HashMap<String, HashSet<String>>,
}

impl StoredMessage {
    #[must_use]
    pub fn root(envelope: Frame) -> Self {
        Self {
            envelope,
            parent_id: None,
            level: 0,
            children: Vec::new(),
            reactions: HashMap::new(),
        }
    }

    #[must_use]
    pub fn reply(envelope: Frame, parent_id: Uuid, level: u8) -> Self {
        Self {
            envelope,
            parent_id: Some(parent_id),
            level,
            children: Vec::new(),
            reactions: HashMap::new(),
        }
    }
}

/// An immutable uploaded file, capped at `max_file_size_bytes` and looked up
/// globally by `file_id`.
#[derive(Debug, Clone)]
pub struct FileBlob {
    pub file_id: Uuid,
    pub filename: String,
    pub mime: String,
    pub size: u64,
    pub bytes: Vec<u8>,
    pub uploader_id: String,
    pub upload_ts: u64,
}

/// An unordered pair of agent ids identifying a DM history, normalized so
/// `DmKey::new(a, b) == DmKey::new(b, a)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DmKey(String, String);

impl DmKey {
    #[must_use]
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self(a.to_string(), b.to_string())
        } else {
            Self(b.to_string(), a.to_string())
        }
    }

    /// The participant in this pair that isn't `me`.
    #[must_use]
    pub fn other(&self, me: &str) -> &str {
        if self.0 == me { &self.1 } else { &self.0 }
    }
}

/// Which per-thread store a given `message_id` lives in, so `react_to_message`
/// can find it without the caller naming the channel or DM peer.
#[derive(Debug, Clone)]
pub enum Location {
    Channel(String),
    Dm(DmKey),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionAction {
    Add,
    Remove,
}
