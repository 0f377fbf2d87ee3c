//! The WebSocket connection lifecycle: handshake-free upgrade (identity is
//! established later via `register_agent`), a reader loop that classifies
//! and dispatches frames, a dedicated writer task that is the connection's
//! only path to the socket, and cleanup on close.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::SinkExt;
use futures::stream::StreamExt;
use meshhub_protocol::{Frame, SystemResponse, error_codes};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{dispatch, state::GatewayState};

/// Handle one accepted WebSocket connection through its full lifecycle:
/// frame loop, then cleanup. There is no separate handshake phase — the
/// first `register_agent` system_request *is* the handshake.
pub async fn handle_connection(socket: WebSocket, state: Arc<GatewayState>, remote_addr: SocketAddr) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let write_timeout = Duration::from_secs(state.config.write_timeout_s);
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match tokio::time::timeout(write_timeout, ws_tx.send(Message::Text(frame.into()))).await {
                Ok(Ok(())) => {},
                Ok(Err(err)) => {
                    debug!(%err, "ws write failed, closing connection");
                    break;
                },
                Err(_) => {
                    warn!("ws write exceeded write_timeout_s, closing connection");
                    break;
                },
            }
        }
    });

    let mut bound_agent_id: Option<String> = None;
    let mut connected_at: Option<Instant> = None;
    let max_message_size = state.config.max_message_size_bytes as usize;

    while let Some(msg) = ws_rx.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(err) => {
                debug!(%err, remote = %remote_addr, "ws read error");
                break;
            },
        };

        let text = match msg {
            Message::Text(t) => t,
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => continue,
        };

        if text.len() > max_message_size {
            warn!(remote = %remote_addr, size = text.len(), "oversized frame, closing connection");
            break;
        }

        let frame: Frame = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(err) => {
                debug!(%err, "malformed frame, ignoring");
                let resp = Frame::SystemResponse(SystemResponse::err("unknown", error_codes::BAD_REQUEST));
                let _ = tx.send(serde_json::to_string(&resp).unwrap_or_default());
                continue;
            },
        };

        match frame {
            Frame::SystemRequest(req) => {
                if let Some(agent_id) = bound_agent_id.as_deref() {
                    state.registry.touch(agent_id).await;
                }
                let response = dispatch::handle(&state, &tx, &mut bound_agent_id, req).await;
                if connected_at.is_none()
                    && let Some(agent_id) = bound_agent_id.as_deref()
                {
                    connected_at = state.registry.lookup(agent_id).await.map(|snap| snap.connected_at);
                }
                let _ = tx.send(serde_json::to_string(&Frame::SystemResponse(response)).unwrap_or_default());
            },
            Frame::SystemResponse(ref resp) => {
                if resp.command == "ping_agent"
                    && resp.success
                    && let Some(agent_id) = bound_agent_id.as_deref()
                    && let Some(heartbeat) = state.heartbeat.read().await.as_ref()
                {
                    heartbeat.note_pong(agent_id).await;
                }
            },
            other => {
                let Some(agent_id) = bound_agent_id.clone() else {
                    debug!("dropping message frame from unregistered connection");
                    continue;
                };
                if let Err(err) = state.router.route(other, &agent_id).await {
                    debug!(agent_id, %err, "routing rejected frame");
                    let resp = Frame::SystemResponse(SystemResponse::err("message", error_codes::SENDER_MISMATCH));
                    let _ = tx.send(serde_json::to_string(&resp).unwrap_or_default());
                }
            },
        }
    }

    writer.abort();
    drop(tx);

    if let Some(agent_id) = bound_agent_id {
        let removed = match connected_at {
            Some(at) => state.registry.unbind_if_current(&agent_id, at).await,
            None => state.registry.unbind(&agent_id).await,
        };
        if removed {
            info!(agent_id, remote = %remote_addr, "connection closed, unbound");
            state.mods.notify_disconnect(&agent_id).await;
        }
    }
}
