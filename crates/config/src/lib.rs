//! Configuration loading, validation, and env substitution for the hub.
//!
//! Config files: `meshhub.toml`, `meshhub.yaml`, or `meshhub.json`.
//! Searched in `./` then `~/.config/meshhub/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{
        config_dir, discover_and_load, find_config_file, find_or_default_config_path,
        load_config, load_config_value, save_config,
    },
    schema::{ChannelSeedConfig, MeshhubConfig},
    validate::{Diagnostic, Severity, ValidationResult},
};
