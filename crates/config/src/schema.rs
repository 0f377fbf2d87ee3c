//! Configuration schema for the hub: a single flat [`MeshhubConfig`] plus the
//! pre-seeded channel list, loaded from `meshhub.toml`/`.yaml`/`.json`.

use serde::{Deserialize, Serialize};

use meshhub_protocol::{
    DEFAULT_AGENT_TIMEOUT_S, DEFAULT_CERT_TTL_HOURS, DEFAULT_CHANNEL_HISTORY_CAPACITY,
    DEFAULT_HEARTBEAT_INTERVAL_S, DEFAULT_MAX_FILE_SIZE_BYTES, DEFAULT_MAX_MESSAGE_SIZE_BYTES,
    DEFAULT_PING_TIMEOUT_S, DEFAULT_WRITE_TIMEOUT_S, MAX_THREAD_DEPTH,
};

fn default_name() -> String {
    "meshhub".into()
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    7777
}

fn default_max_connections() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

/// A channel seeded at startup: name and description. Membership is dynamic;
/// agents join on first `channel_message`/`join_channel`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSeedConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Root configuration for the hub process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshhubConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_heartbeat_interval_s")]
    pub heartbeat_interval_s: u64,
    #[serde(default = "default_agent_timeout_s")]
    pub agent_timeout_s: u64,
    #[serde(default = "default_ping_timeout_s")]
    pub ping_timeout_s: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_max_message_size_bytes")]
    pub max_message_size_bytes: u64,
    #[serde(default = "default_cert_ttl_hours")]
    pub cert_ttl_hours: u64,
    /// HMAC signing key for agent certificates. Falls back to the
    /// `MESHHUB_SECRET_KEY` environment variable if absent here; a process
    /// with neither set refuses to start.
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub channels: Vec<ChannelSeedConfig>,
    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: u64,
    #[serde(default = "default_channel_history_capacity")]
    pub channel_history_capacity: usize,
    #[serde(default = "default_max_thread_depth")]
    pub max_thread_depth: u8,
    #[serde(default = "default_write_timeout_s")]
    pub write_timeout_s: u64,
    /// Whether an unauthenticated reconnect (no certificate presented) may
    /// evict an existing binding for the same `agent_id`.
    #[serde(default = "default_true")]
    pub allow_unauthenticated_reconnect: bool,
    /// Whether `channel_message`/`join_channel` may create an unseeded
    /// channel on first reference, rather than rejecting it.
    #[serde(default)]
    pub channels_auto_create: bool,
}

fn default_heartbeat_interval_s() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_S
}
fn default_agent_timeout_s() -> u64 {
    DEFAULT_AGENT_TIMEOUT_S
}
fn default_ping_timeout_s() -> u64 {
    DEFAULT_PING_TIMEOUT_S
}
fn default_max_message_size_bytes() -> u64 {
    DEFAULT_MAX_MESSAGE_SIZE_BYTES
}
fn default_cert_ttl_hours() -> u64 {
    DEFAULT_CERT_TTL_HOURS
}
fn default_max_file_size_bytes() -> u64 {
    DEFAULT_MAX_FILE_SIZE_BYTES
}
fn default_channel_history_capacity() -> usize {
    DEFAULT_CHANNEL_HISTORY_CAPACITY
}
fn default_max_thread_depth() -> u8 {
    MAX_THREAD_DEPTH
}
fn default_write_timeout_s() -> u64 {
    DEFAULT_WRITE_TIMEOUT_S
}

impl Default for MeshhubConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            host: default_host(),
            port: default_port(),
            heartbeat_interval_s: default_heartbeat_interval_s(),
            agent_timeout_s: default_agent_timeout_s(),
            ping_timeout_s: default_ping_timeout_s(),
            max_connections: default_max_connections(),
            max_message_size_bytes: default_max_message_size_bytes(),
            cert_ttl_hours: default_cert_ttl_hours(),
            secret_key: None,
            channels: Vec::new(),
            max_file_size_bytes: default_max_file_size_bytes(),
            channel_history_capacity: default_channel_history_capacity(),
            max_thread_depth: default_max_thread_depth(),
            write_timeout_s: default_write_timeout_s(),
            allow_unauthenticated_reconnect: true,
            channels_auto_create: false,
        }
    }
}

impl MeshhubConfig {
    /// Resolve the HMAC secret key, falling back to `MESHHUB_SECRET_KEY`.
    #[must_use]
    pub fn resolve_secret_key(&self) -> Option<String> {
        self.secret_key
            .clone()
            .or_else(|| std::env::var("MESHHUB_SECRET_KEY").ok())
            .filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let cfg = MeshhubConfig::default();
        assert_eq!(cfg.heartbeat_interval_s, DEFAULT_HEARTBEAT_INTERVAL_S);
        assert_eq!(cfg.agent_timeout_s, DEFAULT_AGENT_TIMEOUT_S);
        assert_eq!(cfg.ping_timeout_s, DEFAULT_PING_TIMEOUT_S);
        assert_eq!(cfg.max_message_size_bytes, DEFAULT_MAX_MESSAGE_SIZE_BYTES);
        assert_eq!(cfg.cert_ttl_hours, DEFAULT_CERT_TTL_HOURS);
        assert_eq!(cfg.max_file_size_bytes, DEFAULT_MAX_FILE_SIZE_BYTES);
        assert_eq!(
            cfg.channel_history_capacity,
            DEFAULT_CHANNEL_HISTORY_CAPACITY
        );
        assert_eq!(cfg.max_thread_depth, MAX_THREAD_DEPTH);
        assert_eq!(cfg.write_timeout_s, DEFAULT_WRITE_TIMEOUT_S);
        assert!(cfg.allow_unauthenticated_reconnect);
        assert!(!cfg.channels_auto_create);
        assert!(cfg.channels.is_empty());
    }

    #[test]
    fn empty_toml_parses_to_defaults() {
        let cfg: MeshhubConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.name, "meshhub");
        assert_eq!(cfg.port, 7777);
    }

    #[test]
    fn secret_key_falls_back_to_env() {
        let cfg = MeshhubConfig {
            secret_key: None,
            ..Default::default()
        };
        // SAFETY: test-local, single-threaded env mutation.
        unsafe {
            std::env::set_var("MESHHUB_SECRET_KEY", "from-env");
        }
        assert_eq!(cfg.resolve_secret_key().as_deref(), Some("from-env"));
        unsafe {
            std::env::remove_var("MESHHUB_SECRET_KEY");
        }
    }

    #[test]
    fn missing_secret_key_resolves_to_none() {
        unsafe {
            std::env::remove_var("MESHHUB_SECRET_KEY");
        }
        let cfg = MeshhubConfig {
            secret_key: None,
            ..Default::default()
        };
        assert_eq!(cfg.resolve_secret_key(), None);
    }
}
