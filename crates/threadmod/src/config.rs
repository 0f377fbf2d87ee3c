//! Configuration the channel mod needs at construction time, carved out of
//! [`meshhub_config`]'s root schema so this crate doesn't depend on it.

use meshhub_protocol::{DEFAULT_CHANNEL_HISTORY_CAPACITY, DEFAULT_MAX_FILE_SIZE_BYTES, MAX_THREAD_DEPTH};

/// A pre-seeded channel: just name and description. Membership is dynamic
/// (agents join on first `channel_message`/`join_channel`).
#[derive(Debug, Clone)]
pub struct ChannelSeed {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct ThreadModConfig {
    pub channels: Vec<ChannelSeed>,
    pub max_file_size_bytes: u64,
    pub channel_history_capacity: usize,
    pub max_thread_depth: u8,
    /// Whether `send_channel_message`/`join_channel` may create an unseeded
    /// channel on first reference, rather than rejecting it (spec.md Open
    /// Question; default resolved to `false` — strictly pre-seeded).
    pub channels_auto_create: bool,
}

impl Default for ThreadModConfig {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_BYTES,
            channel_history_capacity: DEFAULT_CHANNEL_HISTORY_CAPACITY,
            max_thread_depth: MAX_THREAD_DEPTH,
            channels_auto_create: false,
        }
    }
}
