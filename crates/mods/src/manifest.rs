use serde::{Deserialize, Serialize};

/// Static description of a mod, returned by `list_mods` and `get_mod_manifest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModManifest {
    pub name: String,
    pub version: String,
    pub capabilities: Vec<String>,
}
