//! Typed request variants carried inside a `mod_message.content` addressed to
//! the channel mod. Kept separate from the wire-level [`meshhub_protocol::ModMessage`]
//! envelope per spec §9's redesign note: dynamic string-dispatched commands
//! collapse into a closed, tagged enum.

use serde::Deserialize;
use uuid::Uuid;

pub use crate::model::ReactionAction as ReactAction;

#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ModRequest {
    UploadFile {
        filename: String,
        mime: String,
        bytes_base64: String,
    },
    DownloadFile {
        file_id: Uuid,
    },
    ListChannels,
    RetrieveChannelMessages {
        channel: String,
        #[serde(default = "default_limit")]
        limit: u32,
        #[serde(default)]
        offset: u32,
        #[serde(default = "default_true")]
        include_threads: bool,
    },
    RetrieveDirectMessages {
        peer: String,
        #[serde(default = "default_limit")]
        limit: u32,
        #[serde(default)]
        offset: u32,
        #[serde(default = "default_true")]
        include_threads: bool,
    },
    ReactToMessage {
        message_id: Uuid,
        reaction: String,
        action: ReactAction,
    },
    JoinChannel {
        channel: String,
    },
    LeaveChannel {
        channel: String,
    },
}

fn default_limit() -> u32 {
    meshhub_protocol::MAX_RETRIEVE_LIMIT
}

fn default_true() -> bool {
    true
}
