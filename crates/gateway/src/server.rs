//! The gateway's composition root: builds [`GatewayState`], wires in the
//! configured mods, spawns the heartbeat monitor, and serves `/ws` and
//! `/health` over axum.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{ConnectInfo, State, WebSocketUpgrade},
    response::{IntoResponse, Json},
    routing::get,
};
use meshhub_config::MeshhubConfig;
use meshhub_heartbeat::HeartbeatConfig;
use meshhub_identity::IdentityManager;
use meshhub_mods::{Mod, ModHost};
use meshhub_registry::ConnectionRegistry;
use meshhub_threadmod::{ChannelSeed, ThreadMod, ThreadModConfig};
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    sensitive_headers::SetSensitiveRequestHeadersLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::{ping::GatewayPingSink, state::GatewayState};

/// Start the hub: bind a TCP listener on `config.host:config.port`, serve
/// `/ws` and `/health`, and run until `shutdown` resolves. Returns once the
/// listener is closed and in-flight connections have had a chance to drain.
///
/// Fatal per spec §7: a missing secret key never falls back to a default —
/// the process refuses to start rather than mint certificates nobody can
/// later verify against a known key.
pub async fn run(config: MeshhubConfig, shutdown: impl std::future::Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid host/port {}:{}: {e}", config.host, config.port))?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| anyhow::anyhow!("bind {addr}: {e}"))?;

    let state = bind(config).await?;
    info!(addr = %listener.local_addr().unwrap_or(addr), "meshhub listening");
    serve(listener, state, shutdown).await
}

/// Build [`GatewayState`] and spawn its heartbeat monitor, without binding a
/// listener. Split out from [`run`] so tests can bind an ephemeral port
/// themselves (`TcpListener::bind("127.0.0.1:0")`) the way the reference
/// gateway's integration tests do.
pub async fn bind(config: MeshhubConfig) -> anyhow::Result<Arc<GatewayState>> {
    let secret_key = config
        .resolve_secret_key()
        .ok_or_else(|| anyhow::anyhow!("no secret_key configured and MESHHUB_SECRET_KEY is unset"))?;
    let identity = IdentityManager::new(secret_key.into_bytes(), config.cert_ttl_hours)
        .with_unauthenticated_reconnect(config.allow_unauthenticated_reconnect);

    let state = build_state(config, identity);
    let heartbeat = meshhub_heartbeat::spawn(
        state.registry.clone(),
        Arc::clone(&state.identity),
        Arc::new(GatewayPingSink::new(state.registry.clone(), state.mods.clone())),
        HeartbeatConfig {
            heartbeat_interval: std::time::Duration::from_secs(state.config.heartbeat_interval_s),
            agent_timeout: std::time::Duration::from_secs(state.config.agent_timeout_s),
            ping_timeout: std::time::Duration::from_secs(state.config.ping_timeout_s),
        },
    );
    state.set_heartbeat(heartbeat).await;
    Ok(state)
}

/// Serve `app`'s routes on an already-bound listener until `shutdown`
/// resolves, then stop the heartbeat monitor.
pub async fn serve(listener: tokio::net::TcpListener, state: Arc<GatewayState>, shutdown: impl std::future::Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
    let app = build_app(Arc::clone(&state));
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| anyhow::anyhow!("server error: {e}"))?;

    state.stop_heartbeat().await;
    Ok(())
}

/// Construct [`GatewayState`] with the one mod this build ships: the
/// threaded channel-messaging mod seeded from `config.channels`. `ThreadMod`
/// needs the registry `GatewayState` itself owns, so the registry is built
/// first and handed to both.
fn build_state(config: MeshhubConfig, identity: IdentityManager) -> Arc<GatewayState> {
    let registry = ConnectionRegistry::new();
    let thread_mod_config = ThreadModConfig {
        channels: config
            .channels
            .iter()
            .map(|c| ChannelSeed { name: c.name.clone(), description: c.description.clone() })
            .collect(),
        max_file_size_bytes: config.max_file_size_bytes,
        channel_history_capacity: config.channel_history_capacity,
        max_thread_depth: config.max_thread_depth,
        channels_auto_create: config.channels_auto_create,
    };
    let thread_mod: Arc<dyn Mod> = Arc::new(ThreadMod::new(thread_mod_config, registry.clone()));
    let mods = ModHost::new(vec![thread_mod]);

    GatewayState::new_with_registry(config, identity, mods, registry)
}

/// Build the router shared between production startup and tests: `/health`
/// for liveness probes, `/ws` for the frame transport, with the same
/// middleware shape (tracing, CORS, panic-catching, body limits,
/// compression) the reference gateway applies to its own HTTP surface.
pub fn build_app(state: Arc<GatewayState>) -> Router {
    let max_body = state.config.max_message_size_bytes as usize;
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_upgrade_handler))
        .layer(CompressionLayer::new())
        .layer(RequestBodyLimitLayer::new(max_body))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .layer(SetSensitiveRequestHeadersLayer::new([axum::http::header::AUTHORIZATION]))
        .layer(CatchPanicLayer::new())
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "network_id": state.network_id,
        "connections": state.client_count().await,
    }))
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    if state.client_count().await >= state.config.max_connections {
        warn!(remote = %remote_addr, max = state.config.max_connections, "rejecting connection, at capacity");
        return axum::http::StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ws.on_upgrade(move |socket| crate::ws::handle_connection(socket, state, remote_addr)).into_response()
}
