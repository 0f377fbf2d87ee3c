//! System-command dispatcher: routes `system_request` frames by `command` to
//! a handler, per spec.md §9's redesign note — a closed tagged enum replaces
//! dynamic string-keyed handler tables. Every branch returns exactly one
//! `system_response`; nothing here ever disconnects the connection.

use std::sync::Arc;

use meshhub_identity::{Authorization, Certificate};
use meshhub_protocol::{SystemRequest, SystemResponse, error_codes};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::state::GatewayState;

const KNOWN_COMMANDS: &[&str] = &[
    "register_agent",
    "list_agents",
    "list_mods",
    "get_mod_manifest",
    "claim_agent_id",
    "validate_certificate",
];

#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
enum SystemCommand {
    RegisterAgent {
        agent_id: String,
        #[serde(default)]
        metadata: Value,
        #[serde(default)]
        certificate: Option<Certificate>,
        #[serde(default)]
        force_reconnect: bool,
    },
    ListAgents {},
    ListMods {},
    GetModManifest {
        mod_name: String,
    },
    ClaimAgentId {
        agent_id: String,
        #[serde(default)]
        force: bool,
    },
    ValidateCertificate {
        certificate: Certificate,
    },
}

/// Handle one inbound `system_request` from a connection that has not yet
/// necessarily registered an `agent_id`. `bound_agent_id` is the connection's
/// current binding (if any); `register_agent` is the only command that sets
/// it. `sender` is the connection's outbound queue, consumed by
/// `register_agent` to bind into the registry.
pub async fn handle(
    state: &Arc<GatewayState>,
    sender: &mpsc::UnboundedSender<String>,
    bound_agent_id: &mut Option<String>,
    request: SystemRequest,
) -> SystemResponse {
    if !KNOWN_COMMANDS.contains(&request.command.as_str()) {
        return SystemResponse::err(request.command, error_codes::UNKNOWN_COMMAND);
    }

    let mut fields = match request.fields {
        Value::Object(map) => map,
        Value::Null => serde_json::Map::new(),
        _ => return SystemResponse::err(request.command, error_codes::BAD_REQUEST),
    };
    fields.insert("command".to_string(), Value::String(request.command.clone()));

    let command: SystemCommand = match serde_json::from_value(Value::Object(fields)) {
        Ok(c) => c,
        Err(err) => {
            debug!(command = %request.command, %err, "malformed system_request");
            return SystemResponse::err(request.command, error_codes::BAD_REQUEST);
        },
    };

    match command {
        SystemCommand::RegisterAgent { agent_id, metadata, certificate, force_reconnect } => {
            register_agent(state, sender, bound_agent_id, agent_id, metadata, certificate, force_reconnect).await
        },
        SystemCommand::ListAgents {} => list_agents(state).await,
        SystemCommand::ListMods {} => list_mods(state),
        SystemCommand::GetModManifest { mod_name } => get_mod_manifest(state, &mod_name),
        SystemCommand::ClaimAgentId { agent_id, force } => claim_agent_id(state, &agent_id, force).await,
        SystemCommand::ValidateCertificate { certificate } => validate_certificate(state, &certificate),
    }
}

async fn register_agent(
    state: &Arc<GatewayState>,
    sender: &mpsc::UnboundedSender<String>,
    bound_agent_id: &mut Option<String>,
    agent_id: String,
    metadata: Value,
    certificate: Option<Certificate>,
    force_reconnect: bool,
) -> SystemResponse {
    let override_authorized = match &certificate {
        Some(cert) => state.identity.authorize_override(&agent_id, cert).await,
        None => false,
    };
    let force = override_authorized || (force_reconnect && state.config.allow_unauthenticated_reconnect);

    match state.registry.bind(&agent_id, sender.clone(), metadata.clone(), force).await {
        Ok(_evicted) => {
            info!(agent_id, "agent registered");
            *bound_agent_id = Some(agent_id.clone());
            state.mods.notify_connect(&agent_id, metadata).await;
            SystemResponse::ok(
                "register_agent",
                serde_json::json!({"network_name": state.config.name, "network_id": state.network_id}),
            )
        },
        Err(_) => {
            warn!(agent_id, "register_agent rejected, agent_id already bound");
            SystemResponse::err("register_agent", error_codes::ALREADY_REGISTERED)
        },
    }
}

async fn list_agents(state: &Arc<GatewayState>) -> SystemResponse {
    let now = meshhub_common::time::now_ms();
    let agents: Vec<Value> = state
        .registry
        .list()
        .await
        .into_iter()
        .map(|snap| {
            serde_json::json!({
                "agent_id": snap.agent_id,
                "metadata": snap.metadata,
                "last_seen": now.saturating_sub(snap.last_activity.elapsed().as_millis() as u64),
            })
        })
        .collect();
    SystemResponse::ok("list_agents", serde_json::json!({"agents": agents}))
}

fn list_mods(state: &Arc<GatewayState>) -> SystemResponse {
    let mods = state.mods.manifests();
    SystemResponse::ok("list_mods", serde_json::json!({"mods": mods}))
}

fn get_mod_manifest(state: &Arc<GatewayState>, mod_name: &str) -> SystemResponse {
    match state.mods.manifest_for(mod_name) {
        Some(manifest) => SystemResponse::ok("get_mod_manifest", serde_json::to_value(manifest).unwrap_or_default()),
        None => SystemResponse::err("get_mod_manifest", error_codes::NOT_FOUND),
    }
}

async fn claim_agent_id(state: &Arc<GatewayState>, agent_id: &str, force: bool) -> SystemResponse {
    let auth = if force { Authorization::ForceReconnect } else { Authorization::None };
    match state.identity.claim(agent_id, auth).await {
        Ok(cert) => SystemResponse::ok("claim_agent_id", serde_json::to_value(cert).unwrap_or_default()),
        Err(_) => SystemResponse::err("claim_agent_id", error_codes::TAKEN),
    }
}

fn validate_certificate(state: &Arc<GatewayState>, certificate: &Certificate) -> SystemResponse {
    let (valid, agent_id) = state.identity.validate(certificate);
    SystemResponse::ok("validate_certificate", serde_json::json!({"valid": valid, "agent_id": agent_id}))
}
