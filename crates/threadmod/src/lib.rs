//! The canonical Reddit-style threaded channel-messaging mod.
//!
//! Owns channels, direct-message history, reply threads (≤5 tiers), per-message
//! reactions, and an in-memory file blob store. Registered under
//! [`meshhub_router::CHANNEL_MOD_NAME`] so the router hands it every
//! `direct_message`, `channel_message`, `reply_message`, and `mod_message`
//! frame addressed to `mod: "channel"`.
//!
//! Concurrency: each channel and each DM pair gets its own
//! `tokio::sync::Mutex`-guarded state entry in a `DashMap`, so distinct
//! channels/DM pairs run fully in parallel while operations on the same one
//! serialize (spec §4.8/§5). A lightweight `DashMap<Uuid, Location>` index
//! lets `react_to_message` find a message's owning lock without taking every
//! lock in turn.

pub mod config;
pub mod error;
pub mod model;
mod requests;

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use meshhub_common::time::now_ms;
use meshhub_mods::{Mod, ModManifest};
use meshhub_protocol::{Frame, ModDirection, ModMessage, error_codes};
use meshhub_registry::ConnectionRegistry;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

pub use config::{ChannelSeed, ThreadModConfig};
pub use error::{Error, Result};
pub use model::{DmKey, FileBlob, Location, ReactionAction, StoredMessage};
use requests::{ModRequest, ReactAction};

const MOD_NAME: &str = "channel";

/// Per-channel state: membership, an append-only deque of *root* message ids
/// (the unit of capacity trimming), and the message arena keyed by
/// `message_id` holding both roots and their reply trees. Replies are never
/// pushed onto `roots` — they only ever exist as entries in their parent's
/// `children` list, so trimming a root's id out of `roots` and sweeping its
/// subtree out of `messages` is enough to keep both in sync (no separate
/// bookkeeping needed to find and drop a trimmed root's descendants from an
/// order list they were never added to).
struct ChannelState {
    description: String,
    members: std::collections::HashSet<String>,
    roots: VecDeque<Uuid>,
    messages: std::collections::HashMap<Uuid, StoredMessage>,
}

impl ChannelState {
    fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            members: std::collections::HashSet::new(),
            roots: VecDeque::new(),
            messages: std::collections::HashMap::new(),
        }
    }

    fn thread_count(&self) -> usize {
        self.roots.iter().filter(|id| self.messages.get(*id).is_some_and(|m| !m.children.is_empty())).count()
    }
}

/// Per-DM-pair state: same shape as [`ChannelState`] minus membership (a DM
/// pair's two participants are implied by the key).
struct DmState {
    roots: VecDeque<Uuid>,
    messages: std::collections::HashMap<Uuid, StoredMessage>,
}

impl DmState {
    fn new() -> Self {
        Self {
            roots: VecDeque::new(),
            messages: std::collections::HashMap::new(),
        }
    }
}

/// The threaded channel-messaging mod.
pub struct ThreadMod {
    registry: ConnectionRegistry,
    config: ThreadModConfig,
    channels: DashMap<String, Arc<Mutex<ChannelState>>>,
    dms: DashMap<DmKey, Arc<Mutex<DmState>>>,
    files: DashMap<Uuid, FileBlob>,
    /// Index from message id to the channel/DM pair that owns it, so
    /// `react_to_message` doesn't need its channel/DM argument from callers.
    locations: DashMap<Uuid, Location>,
}

impl ThreadMod {
    #[must_use]
    pub fn new(config: ThreadModConfig, registry: ConnectionRegistry) -> Self {
        let channels = DashMap::new();
        for seed in &config.channels {
            channels.insert(seed.name.clone(), Arc::new(Mutex::new(ChannelState::new(seed.description.clone()))));
        }
        Self {
            registry,
            config,
            channels,
            dms: DashMap::new(),
            files: DashMap::new(),
            locations: DashMap::new(),
        }
    }

    fn channel_lock(&self, name: &str) -> Option<Arc<Mutex<ChannelState>>> {
        self.channels.get(name).map(|e| Arc::clone(&e))
    }

    fn channel_lock_or_create(&self, name: &str) -> Arc<Mutex<ChannelState>> {
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ChannelState::new(""))))
            .clone()
    }

    fn dm_lock(&self, key: &DmKey) -> Arc<Mutex<DmState>> {
        self.dms.entry(key.clone()).or_insert_with(|| Arc::new(Mutex::new(DmState::new()))).clone()
    }

    async fn send_frame(&self, agent_id: &str, frame: &Frame) {
        let serialized = serde_json::to_string(frame).unwrap_or_default();
        self.registry.send(agent_id, &serialized).await;
    }

    /// Deliver a `mod_message` response envelope back to `relevant_agent_id`.
    async fn respond(&self, relevant_agent_id: &str, content: serde_json::Value) {
        let response = Frame::ModMessage(ModMessage {
            message_id: Uuid::new_v4(),
            timestamp: now_ms(),
            sender_id: MOD_NAME.to_string(),
            mod_name: MOD_NAME.to_string(),
            direction: ModDirection::Outbound,
            relevant_agent_id: relevant_agent_id.to_string(),
            content,
            text_representation: None,
            metadata: None,
            requires_response: None,
        });
        self.send_frame(relevant_agent_id, &response).await;
    }

    async fn notify_ok(&self, relevant_agent_id: &str, command: &str, data: serde_json::Value) {
        let mut obj = match data {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        obj.insert("command".into(), command.into());
        obj.insert("success".into(), true.into());
        self.respond(relevant_agent_id, serde_json::Value::Object(obj)).await;
    }

    async fn notify_err(&self, relevant_agent_id: &str, command: &str, error: &str) {
        self.respond(
            relevant_agent_id,
            serde_json::json!({"command": command, "success": false, "error": error}),
        )
        .await;
    }

    // ── §4.8 contracts ──────────────────────────────────────────────────

    /// Stores `envelope` as a DM-history root. Delivery to both endpoints is
    /// the router's job (it already sent the frame verbatim to `target`); the
    /// sender has its own copy locally. This call only persists history.
    async fn observe_direct_message(&self, sender: &str, target: &str, envelope: Frame) {
        let key = DmKey::new(sender, target);
        let lock = self.dm_lock(&key);
        let mut state = lock.lock().await;
        let message_id = envelope_message_id(&envelope);
        state.messages.insert(message_id, StoredMessage::root(envelope));
        push_root_with_capacity(&mut state.roots, &mut state.messages, message_id, self.config.channel_history_capacity);
        self.locations.insert(message_id, Location::Dm(key));
    }

    async fn observe_channel_message(&self, channel: &str, sender: &str, mentioned: Option<&str>, envelope: Frame) {
        let Some(lock) = self.channel_lock(channel) else {
            warn!(channel, "channel_message for unknown channel observed after router dispatch");
            return;
        };
        let message_id = envelope_message_id(&envelope);
        let members: Vec<String> = {
            let mut state = lock.lock().await;
            state.members.insert(sender.to_string());
            state.messages.insert(message_id, StoredMessage::root(envelope.clone()));
            push_root_with_capacity(&mut state.roots, &mut state.messages, message_id, self.config.channel_history_capacity);
            state.members.iter().cloned().collect()
        };
        self.locations.insert(message_id, Location::Channel(channel.to_string()));

        for member in &members {
            if member != sender {
                self.send_frame(member, &envelope).await;
            }
        }
        if let Some(mentioned) = mentioned
            && self.registry.is_bound(mentioned).await
        {
            let notice = Frame::ModMessage(ModMessage {
                message_id: Uuid::new_v4(),
                timestamp: now_ms(),
                sender_id: MOD_NAME.to_string(),
                mod_name: MOD_NAME.to_string(),
                direction: ModDirection::Outbound,
                relevant_agent_id: mentioned.to_string(),
                content: serde_json::json!({
                    "command": "mention_notification",
                    "channel": channel,
                    "message_id": message_id,
                    "from": sender,
                }),
                text_representation: None,
                metadata: None,
                requires_response: None,
            });
            self.send_frame(mentioned, &notice).await;
        }
    }

    async fn reply_channel_message(&self, channel: &str, sender: &str, reply_to_id: Uuid, envelope: Frame) -> Result<()> {
        let Some(lock) = self.channel_lock(channel) else {
            return Err(Error::UnknownChannel);
        };
        let (message_id, members) = {
            let mut state = lock.lock().await;
            let parent_level = state.messages.get(&reply_to_id).map(|m| m.level).ok_or(Error::NotFound)?;
            let level = parent_level.checked_add(1).ok_or(Error::ThreadDepthExceeded)?;
            if level > self.config.max_thread_depth.saturating_sub(1) {
                return Err(Error::ThreadDepthExceeded);
            }
            let message_id = envelope_message_id(&envelope);
            state.messages.insert(message_id, StoredMessage::reply(envelope.clone(), reply_to_id, level));
            if let Some(parent) = state.messages.get_mut(&reply_to_id) {
                parent.children.push(message_id);
            }
            state.members.insert(sender.to_string());
            (message_id, state.members.iter().cloned().collect::<Vec<_>>())
        };
        self.locations.insert(message_id, Location::Channel(channel.to_string()));
        for member in &members {
            if member != sender {
                self.send_frame(member, &envelope).await;
            }
        }
        Ok(())
    }

    async fn reply_direct_message(&self, peer_a: &str, peer_b: &str, reply_to_id: Uuid, envelope: Frame) -> Result<()> {
        let key = DmKey::new(peer_a, peer_b);
        let lock = self.dm_lock(&key);
        let message_id = {
            let mut state = lock.lock().await;
            let parent_level = state.messages.get(&reply_to_id).map(|m| m.level).ok_or(Error::NotFound)?;
            let level = parent_level.checked_add(1).ok_or(Error::ThreadDepthExceeded)?;
            if level > self.config.max_thread_depth.saturating_sub(1) {
                return Err(Error::ThreadDepthExceeded);
            }
            let message_id = envelope_message_id(&envelope);
            state.messages.insert(message_id, StoredMessage::reply(envelope, reply_to_id, level));
            if let Some(parent) = state.messages.get_mut(&reply_to_id) {
                parent.children.push(message_id);
            }
            message_id
        };
        self.locations.insert(message_id, Location::Dm(key));
        Ok(())
    }

    async fn upload_file(&self, uploader: &str, filename: String, mime: String, bytes: Vec<u8>) -> Result<Uuid> {
        let size = bytes.len() as u64;
        if size > self.config.max_file_size_bytes {
            return Err(Error::FileTooLarge);
        }
        let file_id = Uuid::new_v4();
        self.files.insert(
            file_id,
            FileBlob {
                file_id,
                filename,
                mime,
                size,
                bytes,
                uploader_id: uploader.to_string(),
                upload_ts: now_ms(),
            },
        );
        Ok(file_id)
    }

    fn download_file(&self, file_id: Uuid) -> Result<FileBlob> {
        self.files.get(&file_id).map(|f| f.clone()).ok_or(Error::NotFound)
    }

    async fn list_channels(&self) -> Vec<serde_json::Value> {
        let mut out = Vec::with_capacity(self.channels.len());
        for entry in self.channels.iter() {
            let state = entry.value().lock().await;
            out.push(serde_json::json!({
                "name": entry.key(),
                "description": state.description,
                "members": state.members.iter().collect::<Vec<_>>(),
                "message_count": state.messages.len(),
                "thread_count": state.thread_count(),
            }));
        }
        out
    }

    async fn retrieve_channel_messages(&self, channel: &str, limit: u32, offset: u32, include_threads: bool) -> Result<serde_json::Value> {
        let lock = self.channel_lock(channel).ok_or(Error::UnknownChannel)?;
        let state = lock.lock().await;
        Ok(paginate_newest_first(&state.roots, &state.messages, limit, offset, include_threads))
    }

    async fn retrieve_direct_messages(&self, me: &str, peer: &str, limit: u32, offset: u32, include_threads: bool) -> serde_json::Value {
        let key = DmKey::new(me, peer);
        let lock = self.dm_lock(&key);
        let state = lock.lock().await;
        paginate_newest_first(&state.roots, &state.messages, limit, offset, include_threads)
    }

    async fn react_to_message(&self, sender: &str, message_id: Uuid, reaction: &str, action: ReactAction) -> Result<(usize, Option<String>, Option<String>)> {
        let Some(location) = self.locations.get(&message_id).map(|l| l.clone()) else {
            return Err(Error::NotFound);
        };
        match &location {
            Location::Channel(name) => {
                let lock = self.channel_lock(name).ok_or(Error::NotFound)?;
                let mut state = lock.lock().await;
                let msg = state.messages.get_mut(&message_id).ok_or(Error::NotFound)?;
                let total = apply_reaction(msg, reaction, sender, action);
                let members: Vec<String> = state.members.iter().cloned().collect();
                drop(state);
                for member in &members {
                    if member != sender {
                        self.notify_reaction(member, message_id, reaction, total).await;
                    }
                }
                Ok((total, Some(name.clone()), None))
            },
            Location::Dm(key) => {
                let lock = self.dm_lock(key);
                let mut state = lock.lock().await;
                let msg = state.messages.get_mut(&message_id).ok_or(Error::NotFound)?;
                let total = apply_reaction(msg, reaction, sender, action);
                drop(state);
                let peer = key.other(sender).to_string();
                self.notify_reaction(&peer, message_id, reaction, total).await;
                Ok((total, None, Some(peer)))
            },
        }
    }

    async fn notify_reaction(&self, agent_id: &str, message_id: Uuid, reaction: &str, total: usize) {
        self.respond(
            agent_id,
            serde_json::json!({
                "command": "reaction_notification",
                "message_id": message_id,
                "reaction": reaction,
                "total_reactions": total,
            }),
        )
        .await;
    }

    async fn join_channel(&self, agent_id: &str, channel: &str) -> Result<()> {
        let lock = if self.config.channels_auto_create {
            self.channel_lock_or_create(channel)
        } else {
            self.channel_lock(channel).ok_or(Error::UnknownChannel)?
        };
        lock.lock().await.members.insert(agent_id.to_string());
        Ok(())
    }

    async fn leave_channel(&self, agent_id: &str, channel: &str) -> Result<()> {
        let lock = self.channel_lock(channel).ok_or(Error::UnknownChannel)?;
        lock.lock().await.members.remove(agent_id);
        Ok(())
    }

    /// Drop `agent_id` from every channel's membership set on disconnect
    /// (spec §4.2(a)): otherwise a departed agent keeps being selected as a
    /// `send_frame` recipient and keeps showing up in `list_channels`.
    async fn remove_from_all_channels(&self, agent_id: &str) {
        for entry in self.channels.iter() {
            entry.value().lock().await.members.remove(agent_id);
        }
    }
}

fn envelope_message_id(frame: &Frame) -> Uuid {
    match frame {
        Frame::DirectMessage(m) => m.message_id,
        Frame::BroadcastMessage(m) => m.message_id,
        Frame::ModMessage(m) => m.message_id,
        Frame::ChannelMessage(m) => m.message_id,
        Frame::ReplyMessage(m) => m.message_id,
        Frame::SystemRequest(_) | Frame::SystemResponse(_) => Uuid::nil(),
    }
}

fn apply_reaction(msg: &mut StoredMessage, reaction: &str, agent_id: &str, action: ReactAction) -> usize {
    let set = msg.reactions.entry(reaction.to_string()).or_default();
    match action {
        ReactAction::Add => {
            set.insert(agent_id.to_string());
        },
        ReactAction::Remove => {
            set.remove(agent_id);
        },
    }
    set.len()
}

/// Root append with capacity enforcement: once the rolling window of roots
/// exceeds `capacity`, drops the oldest root and its entire reply subtree
/// from the arena (spec §4.8 state machine, invariant 4). Trimmed message
/// ids are never referenced from anywhere else — they only lived in `roots`
/// and in the removed root's `children` chain — so nothing is left dangling.
fn push_root_with_capacity(
    roots: &mut VecDeque<Uuid>,
    messages: &mut std::collections::HashMap<Uuid, StoredMessage>,
    message_id: Uuid,
    capacity: usize,
) {
    roots.push_back(message_id);
    while roots.len() > capacity {
        let Some(oldest) = roots.pop_front() else { break };
        trim_subtree(messages, oldest);
    }
}

fn trim_subtree(messages: &mut std::collections::HashMap<Uuid, StoredMessage>, root_id: Uuid) {
    let mut stack = vec![root_id];
    while let Some(id) = stack.pop() {
        if let Some(msg) = messages.remove(&id) {
            stack.extend(msg.children);
        }
    }
}

/// Flattens a page of root threads into one `not_found`-safe Reddit-style
/// list: the `limit`/`offset` window applies to *roots*, newest first; when
/// `include_threads` is set, each root's reply subtree is included
/// depth-first right after it.
fn paginate_newest_first(
    roots: &VecDeque<Uuid>,
    messages: &std::collections::HashMap<Uuid, StoredMessage>,
    limit: u32,
    offset: u32,
    include_threads: bool,
) -> serde_json::Value {
    let limit = (limit.min(meshhub_protocol::MAX_RETRIEVE_LIMIT)) as usize;
    let offset = offset as usize;

    let mut page = Vec::new();
    for root_id in roots.iter().rev().skip(offset).take(limit) {
        let Some(root) = messages.get(root_id) else { continue };
        page.push(serde_json::to_value(&root.envelope).unwrap_or_default());
        if include_threads {
            append_subtree(messages, root, &mut page);
        }
    }
    serde_json::json!({"messages": page, "limit": limit, "offset": offset})
}

fn append_subtree(messages: &std::collections::HashMap<Uuid, StoredMessage>, parent: &StoredMessage, out: &mut Vec<serde_json::Value>) {
    for child_id in &parent.children {
        let Some(child) = messages.get(child_id) else { continue };
        out.push(serde_json::to_value(&child.envelope).unwrap_or_default());
        append_subtree(messages, child, out);
    }
}

#[async_trait]
impl Mod for ThreadMod {
    fn name(&self) -> &str {
        MOD_NAME
    }

    fn manifest(&self) -> ModManifest {
        ModManifest {
            name: MOD_NAME.to_string(),
            version: "1.0.0".to_string(),
            capabilities: vec![
                "upload_file".into(),
                "download_file".into(),
                "list_channels".into(),
                "retrieve_channel_messages".into(),
                "retrieve_direct_messages".into(),
                "react_to_message".into(),
                "join_channel".into(),
                "leave_channel".into(),
            ],
        }
    }

    async fn on_agent_connect(&self, _agent_id: &str, _metadata: &serde_json::Value) {}

    async fn on_agent_disconnect(&self, agent_id: &str) {
        self.remove_from_all_channels(agent_id).await;
    }

    async fn on_mod_message(&self, frame: Frame) {
        match frame {
            Frame::DirectMessage(ref m) => {
                self.observe_direct_message(&m.sender_id, &m.target_agent_id, frame.clone()).await;
            },
            Frame::ChannelMessage(ref m) => {
                let channel_exists = self.channel_lock(&m.channel).is_some();
                if !channel_exists && self.config.channels_auto_create {
                    self.channel_lock_or_create(&m.channel);
                } else if !channel_exists {
                    self.notify_err(&m.sender_id, "send_channel_message", error_codes::UNKNOWN_CHANNEL).await;
                    return;
                }
                self.observe_channel_message(&m.channel, &m.sender_id, m.mentioned_agent_id.as_deref(), frame.clone()).await;
            },
            Frame::ReplyMessage(ref m) => {
                let result = if let Some(channel) = &m.channel {
                    self.reply_channel_message(channel, &m.sender_id, m.reply_to_id, frame.clone()).await
                } else if let Some(target) = &m.target_agent_id {
                    self.reply_direct_message(&m.sender_id, target, m.reply_to_id, frame.clone()).await
                } else {
                    Err(Error::BadRequest)
                };
                if let Err(err) = result {
                    self.notify_err(&m.sender_id, "reply_message", err.code()).await;
                }
            },
            Frame::ModMessage(ref m) if m.mod_name == MOD_NAME => {
                self.handle_request(&m.sender_id, m.content.clone()).await;
            },
            Frame::ModMessage(_) | Frame::BroadcastMessage(_) | Frame::SystemRequest(_) | Frame::SystemResponse(_) => {
                debug!("channel mod ignoring frame kind it does not own");
            },
        }
    }
}

impl ThreadMod {
    async fn handle_request(&self, sender: &str, content: serde_json::Value) {
        let request: ModRequest = match serde_json::from_value(content) {
            Ok(r) => r,
            Err(_) => {
                self.notify_err(sender, "unknown_command", error_codes::BAD_REQUEST).await;
                return;
            },
        };

        match request {
            ModRequest::UploadFile { filename, mime, bytes_base64 } => {
                let bytes = match base64_decode(&bytes_base64) {
                    Ok(b) => b,
                    Err(_) => {
                        self.notify_err(sender, "upload_file", error_codes::BAD_REQUEST).await;
                        return;
                    },
                };
                match self.upload_file(sender, filename, mime, bytes).await {
                    Ok(file_id) => self.notify_ok(sender, "upload_file", serde_json::json!({"file_id": file_id})).await,
                    Err(err) => self.notify_err(sender, "upload_file", err.code()).await,
                }
            },
            ModRequest::DownloadFile { file_id } => match self.download_file(file_id) {
                Ok(blob) => {
                    self.notify_ok(
                        sender,
                        "download_file",
                        serde_json::json!({
                            "file_id": blob.file_id,
                            "filename": blob.filename,
                            "mime": blob.mime,
                            "size": blob.size,
                            "bytes_base64": base64_encode(&blob.bytes),
                        }),
                    )
                    .await;
                },
                Err(err) => self.notify_err(sender, "download_file", err.code()).await,
            },
            ModRequest::ListChannels => {
                let channels = self.list_channels().await;
                self.notify_ok(sender, "list_channels", serde_json::json!({"channels": channels})).await;
            },
            ModRequest::RetrieveChannelMessages { channel, limit, offset, include_threads } => {
                match self.retrieve_channel_messages(&channel, limit, offset, include_threads).await {
                    Ok(page) => self.notify_ok(sender, "retrieve_channel_messages", page).await,
                    Err(err) => self.notify_err(sender, "retrieve_channel_messages", err.code()).await,
                }
            },
            ModRequest::RetrieveDirectMessages { peer, limit, offset, include_threads } => {
                let page = self.retrieve_direct_messages(sender, &peer, limit, offset, include_threads).await;
                self.notify_ok(sender, "retrieve_direct_messages", page).await;
            },
            ModRequest::ReactToMessage { message_id, reaction, action } => {
                match self.react_to_message(sender, message_id, &reaction, action).await {
                    Ok((total, _, _)) => {
                        self.notify_ok(sender, "react_to_message", serde_json::json!({"total_reactions": total})).await;
                    },
                    Err(err) => self.notify_err(sender, "react_to_message", err.code()).await,
                }
            },
            ModRequest::JoinChannel { channel } => match self.join_channel(sender, &channel).await {
                Ok(()) => self.notify_ok(sender, "join_channel", serde_json::json!({"channel": channel})).await,
                Err(err) => self.notify_err(sender, "join_channel", err.code()).await,
            },
            ModRequest::LeaveChannel { channel } => match self.leave_channel(sender, &channel).await {
                Ok(()) => self.notify_ok(sender, "leave_channel", serde_json::json!({"channel": channel})).await,
                Err(err) => self.notify_err(sender, "leave_channel", err.code()).await,
            },
        }
    }
}

fn base64_decode(input: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(input)
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use meshhub_protocol::{ChannelMessage, DirectMessage, ReplyMessage};
    use tokio::sync::mpsc;

    use super::*;

    fn test_config() -> ThreadModConfig {
        ThreadModConfig {
            channels: vec![ChannelSeed { name: "dev".into(), description: "dev channel".into() }],
            max_file_size_bytes: 1024,
            channel_history_capacity: 3,
            max_thread_depth: 5,
            channels_auto_create: false,
        }
    }

    async fn bound_mod(agent_ids: &[&str]) -> (ThreadMod, Vec<mpsc::UnboundedReceiver<String>>) {
        let registry = ConnectionRegistry::new();
        let mut receivers = Vec::new();
        for id in agent_ids {
            let (tx, rx) = mpsc::unbounded_channel();
            registry.bind(id, tx, serde_json::Value::Null, false).await.expect("bind succeeds");
            receivers.push(rx);
        }
        (ThreadMod::new(test_config(), registry), receivers)
    }

    fn channel_frame(channel: &str, sender: &str) -> Frame {
        Frame::ChannelMessage(ChannelMessage {
            message_id: Uuid::new_v4(),
            timestamp: 0,
            sender_id: sender.into(),
            channel: channel.into(),
            content: serde_json::json!({"text": "hi"}),
            mentioned_agent_id: None,
            quoted_message_id: None,
            quoted_text: None,
            text_representation: None,
            metadata: None,
            requires_response: None,
        })
    }

    #[tokio::test]
    async fn channel_message_to_unknown_channel_is_rejected() {
        let (thread_mod, mut rx) = bound_mod(&["a"]).await;
        thread_mod.on_mod_message(channel_frame("ghost-channel", "a")).await;
        let received = rx[0].try_recv().expect("error response sent");
        assert!(received.contains("unknown_channel"));
    }

    #[tokio::test]
    async fn reply_depth_beyond_five_tiers_is_rejected() {
        let (thread_mod, mut rx) = bound_mod(&["a"]).await;
        let root = channel_frame("dev", "a");
        let root_id = envelope_message_id(&root);
        thread_mod.on_mod_message(root).await;
        rx[0].try_recv().ok();

        let mut parent_id = root_id;
        for level in 1..=4u8 {
            let reply = Frame::ReplyMessage(ReplyMessage {
                message_id: Uuid::new_v4(),
                timestamp: 0,
                sender_id: "a".into(),
                reply_to_id: parent_id,
                thread_level: level,
                content: serde_json::json!({}),
                target_agent_id: None,
                channel: Some("dev".into()),
                quoted_message_id: None,
                text_representation: None,
                metadata: None,
                requires_response: None,
            });
            parent_id = envelope_message_id(&reply);
            thread_mod.on_mod_message(reply).await;
            rx[0].try_recv().ok();
        }

        let over_limit = Frame::ReplyMessage(ReplyMessage {
            message_id: Uuid::new_v4(),
            timestamp: 0,
            sender_id: "a".into(),
            reply_to_id: parent_id,
            thread_level: 5,
            content: serde_json::json!({}),
            target_agent_id: None,
            channel: Some("dev".into()),
            quoted_message_id: None,
            text_representation: None,
            metadata: None,
            requires_response: None,
        });
        thread_mod.on_mod_message(over_limit).await;
        let received = rx[0].try_recv().expect("error response sent");
        assert!(received.contains("thread_depth_exceeded"));
    }

    #[tokio::test]
    async fn reactions_are_idempotent_set_semantics() {
        let (thread_mod, _rx) = bound_mod(&["a", "b"]).await;
        let root = channel_frame("dev", "a");
        let message_id = envelope_message_id(&root);
        thread_mod.on_mod_message(root).await;

        let (total, _, _) = thread_mod.react_to_message("a", message_id, "like", ReactAction::Add).await.unwrap();
        assert_eq!(total, 1);
        let (total, _, _) = thread_mod.react_to_message("b", message_id, "like", ReactAction::Add).await.unwrap();
        assert_eq!(total, 2);
        let (total, _, _) = thread_mod.react_to_message("a", message_id, "like", ReactAction::Remove).await.unwrap();
        assert_eq!(total, 1);
        let (total, _, _) = thread_mod.react_to_message("a", message_id, "like", ReactAction::Remove).await.unwrap();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn file_round_trips_and_oversize_is_rejected() {
        let (thread_mod, _rx) = bound_mod(&["a"]).await;
        let bytes = vec![0u8; 512];
        let file_id = thread_mod.upload_file("a", "z.bin".into(), "application/octet-stream".into(), bytes.clone()).await.unwrap();
        let blob = thread_mod.download_file(file_id).unwrap();
        assert_eq!(blob.bytes, bytes);

        let too_big = vec![0u8; 2048];
        let err = thread_mod.upload_file("a", "big.bin".into(), "application/octet-stream".into(), too_big).await.unwrap_err();
        assert!(matches!(err, Error::FileTooLarge));
    }

    #[tokio::test]
    async fn channel_history_trims_oldest_root_past_capacity() {
        let (thread_mod, _rx) = bound_mod(&["a"]).await;
        let mut ids = Vec::new();
        for _ in 0..4 {
            let frame = channel_frame("dev", "a");
            ids.push(envelope_message_id(&frame));
            thread_mod.on_mod_message(frame).await;
        }
        // capacity is 3, so the first root should have been trimmed.
        let err = thread_mod.react_to_message("a", ids[0], "like", ReactAction::Add).await.unwrap_err();
        assert!(matches!(err, Error::NotFound));
        assert!(thread_mod.react_to_message("a", ids[3], "like", ReactAction::Add).await.is_ok());
    }

    #[tokio::test]
    async fn direct_message_is_retrievable_from_either_side() {
        let (thread_mod, _rx) = bound_mod(&["a", "b"]).await;
        let dm = Frame::DirectMessage(DirectMessage {
            message_id: Uuid::new_v4(),
            timestamp: 0,
            sender_id: "a".into(),
            target_agent_id: "b".into(),
            content: serde_json::json!({"text": "hi"}),
            text_representation: None,
            metadata: None,
            requires_response: None,
        });
        thread_mod.on_mod_message(dm).await;
        let page = thread_mod.retrieve_direct_messages("a", "b", 10, 0, true).await;
        assert_eq!(page["messages"].as_array().unwrap().len(), 1);
        let page = thread_mod.retrieve_direct_messages("b", "a", 10, 0, true).await;
        assert_eq!(page["messages"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn disconnect_drops_agent_from_channel_membership() {
        let (thread_mod, _rx) = bound_mod(&["a", "b"]).await;
        thread_mod.join_channel("a", "dev").await.unwrap();
        thread_mod.join_channel("b", "dev").await.unwrap();

        thread_mod.on_agent_disconnect("a").await;

        let channels = thread_mod.list_channels().await;
        let dev = channels.into_iter().find(|c| c["name"] == "dev").unwrap();
        let members = dev["members"].as_array().unwrap();
        assert!(!members.iter().any(|m| m == "a"));
        assert!(members.iter().any(|m| m == "b"));
    }
}
