//! Configuration validation: unknown-field detection plus semantic warnings,
//! mirroring the teacher's diagnostic-collecting design for a much smaller
//! flat schema.

use std::{collections::HashMap, path::Path};

use crate::schema::MeshhubConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "security", "semantic"
    pub category: &'static str,
    /// Dotted path, e.g. "channels[0].name"
    pub path: String,
    pub message: String,
}

/// Result of validating a configuration file.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<std::path::PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

const TOP_LEVEL_KEYS: &[&str] = &[
    "name",
    "host",
    "port",
    "heartbeat_interval_s",
    "agent_timeout_s",
    "ping_timeout_s",
    "max_connections",
    "max_message_size_bytes",
    "cert_ttl_hours",
    "secret_key",
    "channels",
    "max_file_size_bytes",
    "channel_history_capacity",
    "max_thread_depth",
    "write_timeout_s",
    "allow_unauthenticated_reconnect",
    "channels_auto_create",
];

const CHANNEL_ENTRY_KEYS: &[&str] = &["name", "description"];

/// Validate a config file at the given path, or discover the default config
/// file location if `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = if let Some(p) = path {
        Some(p.to_path_buf())
    } else {
        crate::loader::find_config_file()
    };

    let Some(ref actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Info,
                category: "file-ref",
                path: String::new(),
                message: "no config file found; using defaults".into(),
            }],
            config_path: None,
        };
    };

    match std::fs::read_to_string(actual_path) {
        Ok(content) => {
            let mut result = validate_toml_str(&content);
            result.config_path = Some(actual_path.clone());
            result
        },
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("failed to read config file: {e}"),
            }],
            config_path: Some(actual_path.clone()),
        },
    }
}

/// Validate a TOML string without file-system side effects (useful for tests
/// and the `config validate` CLI subcommand).
#[must_use]
pub fn validate_toml_str(toml_str: &str) -> ValidationResult {
    let mut diagnostics = Vec::new();

    let toml_value: toml::Value = match toml::from_str(toml_str) {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("TOML syntax error: {e}"),
            });
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    check_unknown_fields(&toml_value, &mut diagnostics);

    match toml::from_str::<MeshhubConfig>(toml_str) {
        Ok(config) => check_semantic_warnings(&config, &mut diagnostics),
        Err(e) => diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "type-error",
            path: String::new(),
            message: format!("type error: {e}"),
        }),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn check_unknown_fields(value: &toml::Value, diagnostics: &mut Vec<Diagnostic>) {
    let Some(table) = value.as_table() else {
        return;
    };
    for (key, val) in table {
        if !TOP_LEVEL_KEYS.contains(&key.as_str()) {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "unknown-field",
                path: key.clone(),
                message: "unknown field at top level".into(),
            });
            continue;
        }
        if key == "channels" {
            if let Some(entries) = val.as_array() {
                for (idx, entry) in entries.iter().enumerate() {
                    if let Some(entry_table) = entry.as_table() {
                        for entry_key in entry_table.keys() {
                            if !CHANNEL_ENTRY_KEYS.contains(&entry_key.as_str()) {
                                diagnostics.push(Diagnostic {
                                    severity: Severity::Error,
                                    category: "unknown-field",
                                    path: format!("channels[{idx}].{entry_key}"),
                                    message: "unknown field in channel entry".into(),
                                });
                            }
                        }
                    }
                }
            }
        }
    }
}

fn check_semantic_warnings(config: &MeshhubConfig, diagnostics: &mut Vec<Diagnostic>) {
    if config.resolve_secret_key().is_none() {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "semantic",
            path: "secret_key".into(),
            message: "no secret_key set and MESHHUB_SECRET_KEY is not set; the hub will refuse to start".into(),
        });
    }

    if config.port == 0 {
        diagnostics.push(Diagnostic {
            severity: Severity::Info,
            category: "semantic",
            path: "port".into(),
            message: "port is 0; a random port will be assigned at startup".into(),
        });
    }

    let is_localhost =
        config.host == "127.0.0.1" || config.host == "localhost" || config.host == "::1";
    if !is_localhost {
        diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            category: "security",
            path: "host".into(),
            message: format!(
                "binding to {} exposes the hub beyond the local machine",
                config.host
            ),
        });
    }

    if config.heartbeat_interval_s == 0 {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "semantic",
            path: "heartbeat_interval_s".into(),
            message: "heartbeat_interval_s must be greater than zero".into(),
        });
    }

    if config.agent_timeout_s <= config.heartbeat_interval_s {
        diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            category: "semantic",
            path: "agent_timeout_s".into(),
            message: "agent_timeout_s should be larger than heartbeat_interval_s, or agents will time out between heartbeats".into(),
        });
    }

    let mut seen = HashMap::new();
    for (idx, ch) in config.channels.iter().enumerate() {
        if let Some(prev) = seen.insert(ch.name.clone(), idx) {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "semantic",
                path: format!("channels[{idx}].name"),
                message: format!(
                    "duplicate channel name \"{}\" (also at channels[{prev}])",
                    ch.name
                ),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_warns_missing_secret_key() {
        unsafe {
            std::env::remove_var("MESHHUB_SECRET_KEY");
        }
        let result = validate_toml_str("");
        assert!(result.has_errors());
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.path == "secret_key" && d.severity == Severity::Error)
        );
    }

    #[test]
    fn valid_config_with_secret_key_has_no_errors() {
        let toml = r#"
secret_key = "test-secret"
host = "127.0.0.1"
port = 7777
"#;
        let result = validate_toml_str(toml);
        assert!(!result.has_errors(), "{:?}", result.diagnostics);
    }

    #[test]
    fn unknown_top_level_field_is_error() {
        let result = validate_toml_str("bnd = \"0.0.0.0\"\n");
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.category == "unknown-field" && d.path == "bnd")
        );
    }

    #[test]
    fn unknown_field_in_channel_entry_is_error() {
        let toml = r#"
secret_key = "s"
[[channels]]
name = "general"
topic = "oops"
"#;
        let result = validate_toml_str(toml);
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.category == "unknown-field" && d.path == "channels[0].topic")
        );
    }

    #[test]
    fn duplicate_channel_names_flagged() {
        let toml = r#"
secret_key = "s"
[[channels]]
name = "general"
[[channels]]
name = "general"
"#;
        let result = validate_toml_str(toml);
        assert!(result.has_errors());
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.path == "channels[1].name")
        );
    }

    #[test]
    fn non_localhost_bind_is_warned() {
        let toml = r#"
secret_key = "s"
host = "0.0.0.0"
"#;
        let result = validate_toml_str(toml);
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.category == "security" && d.path == "host")
        );
    }

    #[test]
    fn syntax_error_detected() {
        let result = validate_toml_str("this is not valid toml [[[");
        assert!(result.has_errors());
        assert!(result.diagnostics.iter().any(|d| d.category == "syntax"));
    }
}
