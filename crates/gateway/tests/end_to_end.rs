#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end scenarios driven entirely over real WebSocket connections
//! against a hub bound to an ephemeral port, the same bootstrap pattern the
//! reference gateway's own integration tests use.

use std::net::SocketAddr;
use std::time::Duration;

use base64::Engine as _;
use futures::{SinkExt, StreamExt};
use meshhub_config::{ChannelSeedConfig, MeshhubConfig};
use meshhub_protocol::{ChannelMessage, Frame, ModDirection, ModMessage, ReplyMessage, SystemRequest, SystemResponse};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use uuid::Uuid;

type Ws = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn start(config: MeshhubConfig) -> SocketAddr {
    let mut config = config;
    config.host = "127.0.0.1".into();
    config.port = 0;
    config.secret_key = Some("end-to-end-secret".into());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    let state = meshhub_gateway::bind(config).await.expect("bind state");
    tokio::spawn(meshhub_gateway::serve(listener, state, std::future::pending()));
    addr
}

async fn register(addr: SocketAddr, agent_id: &str) -> Ws {
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.expect("connect");
    send(&mut ws, Frame::SystemRequest(SystemRequest { command: "register_agent".into(), fields: serde_json::json!({"agent_id": agent_id}) })).await;
    let resp = recv_system_response(&mut ws).await;
    assert!(resp.success, "register_agent failed: {resp:?}");
    ws
}

async fn send(ws: &mut Ws, frame: Frame) {
    ws.send(Message::Text(serde_json::to_string(&frame).unwrap_or_default().into())).await.expect("send");
}

async fn recv_frame(ws: &mut Ws) -> Frame {
    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next()).await.expect("timeout").expect("stream closed").expect("ws error");
    serde_json::from_str(&msg.into_text().expect("text frame")).expect("valid frame")
}

async fn recv_system_response(ws: &mut Ws) -> SystemResponse {
    match recv_frame(ws).await {
        Frame::SystemResponse(resp) => resp,
        other => panic!("expected system_response, got {other:?}"),
    }
}

fn channel_config() -> MeshhubConfig {
    let mut config = MeshhubConfig::default();
    config.channels = vec![ChannelSeedConfig { name: "general".into(), description: "default channel".into() }];
    config
}

fn mod_request(sender: &str, content: serde_json::Value) -> Frame {
    Frame::ModMessage(ModMessage {
        message_id: Uuid::new_v4(),
        timestamp: 0,
        sender_id: sender.into(),
        mod_name: "channel".into(),
        direction: ModDirection::Inbound,
        relevant_agent_id: sender.into(),
        content,
        text_representation: None,
        metadata: None,
        requires_response: None,
    })
}

async fn recv_mod_response(ws: &mut Ws) -> (String, serde_json::Value) {
    match recv_frame(ws).await {
        Frame::ModMessage(m) => (m.content["command"].as_str().unwrap_or_default().to_string(), m.content),
        other => panic!("expected mod_message, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_channel_is_rejected() {
    let addr = start(channel_config()).await;
    let mut a = register(addr, "a").await;

    send(&mut a, Frame::ChannelMessage(ChannelMessage {
        message_id: Uuid::new_v4(),
        timestamp: 0,
        sender_id: "a".into(),
        channel: "does-not-exist".into(),
        content: serde_json::json!({"text": "hi"}),
        mentioned_agent_id: None,
        quoted_message_id: None,
        quoted_text: None,
        text_representation: None,
        metadata: None,
        requires_response: None,
    }))
    .await;

    let (_, content) = recv_mod_response(&mut a).await;
    assert_eq!(content["error"], meshhub_protocol::error_codes::UNKNOWN_CHANNEL);
}

#[tokio::test]
async fn reply_chain_past_max_depth_is_rejected() {
    let addr = start(channel_config()).await;
    let mut a = register(addr, "a").await;

    let root_id = Uuid::new_v4();
    send(&mut a, Frame::ChannelMessage(ChannelMessage {
        message_id: root_id,
        timestamp: 0,
        sender_id: "a".into(),
        channel: "general".into(),
        content: serde_json::json!({"text": "root"}),
        mentioned_agent_id: None,
        quoted_message_id: None,
        quoted_text: None,
        text_representation: None,
        metadata: None,
        requires_response: None,
    }))
    .await;

    let mut parent_id = root_id;
    for level in 1..=4u8 {
        let reply_id = Uuid::new_v4();
        send(&mut a, Frame::ReplyMessage(ReplyMessage {
            message_id: reply_id,
            timestamp: 0,
            sender_id: "a".into(),
            reply_to_id: parent_id,
            thread_level: level,
            content: serde_json::json!({"text": format!("reply {level}")}),
            target_agent_id: None,
            channel: Some("general".into()),
            quoted_message_id: None,
            text_representation: None,
            metadata: None,
            requires_response: None,
        }))
        .await;
        parent_id = reply_id;
    }

    send(&mut a, Frame::ReplyMessage(ReplyMessage {
        message_id: Uuid::new_v4(),
        timestamp: 0,
        sender_id: "a".into(),
        reply_to_id: parent_id,
        thread_level: 5,
        content: serde_json::json!({"text": "too deep"}),
        target_agent_id: None,
        channel: Some("general".into()),
        quoted_message_id: None,
        text_representation: None,
        metadata: None,
        requires_response: None,
    }))
    .await;

    let (_, content) = recv_mod_response(&mut a).await;
    assert_eq!(content["error"], meshhub_protocol::error_codes::THREAD_DEPTH_EXCEEDED);
}

#[tokio::test]
async fn reaction_is_idempotent_per_agent_and_notifies_channel_members() {
    let addr = start(channel_config()).await;
    let mut a = register(addr, "a").await;
    let mut b = register(addr, "b").await;

    let message_id = Uuid::new_v4();
    send(&mut a, Frame::ChannelMessage(ChannelMessage {
        message_id,
        timestamp: 0,
        sender_id: "a".into(),
        channel: "general".into(),
        content: serde_json::json!({"text": "react to me"}),
        mentioned_agent_id: None,
        quoted_message_id: None,
        quoted_text: None,
        text_representation: None,
        metadata: None,
        requires_response: None,
    }))
    .await;

    send(&mut b, mod_request("b", serde_json::json!({
        "command": "react_to_message", "message_id": message_id, "reaction": "+1", "action": "add",
    })))
    .await;
    let (_, content) = recv_mod_response(&mut b).await;
    assert_eq!(content["total_reactions"], 1);

    // The same agent reacting again is idempotent: still one reaction.
    send(&mut b, mod_request("b", serde_json::json!({
        "command": "react_to_message", "message_id": message_id, "reaction": "+1", "action": "add",
    })))
    .await;
    let (_, content) = recv_mod_response(&mut b).await;
    assert_eq!(content["total_reactions"], 1);
}

#[tokio::test]
async fn upload_then_download_file_round_trips_bytes() {
    let addr = start(channel_config()).await;
    let mut a = register(addr, "a").await;

    let bytes = b"hello from an agent".to_vec();
    let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
    send(&mut a, mod_request("a", serde_json::json!({
        "command": "upload_file", "filename": "note.txt", "mime": "text/plain", "bytes_base64": encoded,
    })))
    .await;
    let (_, content) = recv_mod_response(&mut a).await;
    let file_id = content["file_id"].clone();
    assert!(content.get("error").is_none(), "upload failed: {content:?}");

    send(&mut a, mod_request("a", serde_json::json!({"command": "download_file", "file_id": file_id}))).await;
    let (_, content) = recv_mod_response(&mut a).await;
    let downloaded = base64::engine::general_purpose::STANDARD.decode(content["bytes_base64"].as_str().unwrap_or_default()).expect("valid base64");
    assert_eq!(downloaded, bytes);
}

#[tokio::test]
async fn oversize_file_upload_is_rejected() {
    let mut config = channel_config();
    config.max_file_size_bytes = 8;
    let addr = start(config).await;
    let mut a = register(addr, "a").await;

    let encoded = base64::engine::general_purpose::STANDARD.encode(b"this is definitely more than eight bytes");
    send(&mut a, mod_request("a", serde_json::json!({
        "command": "upload_file", "filename": "big.txt", "mime": "text/plain", "bytes_base64": encoded,
    })))
    .await;
    let (_, content) = recv_mod_response(&mut a).await;
    assert_eq!(content["error"], meshhub_protocol::error_codes::FILE_TOO_LARGE);
}

#[tokio::test]
async fn direct_message_to_offline_agent_notifies_sender_unreachable() {
    let addr = start(MeshhubConfig::default()).await;
    let mut a = register(addr, "a").await;

    send(&mut a, Frame::DirectMessage(meshhub_protocol::DirectMessage {
        message_id: Uuid::new_v4(),
        timestamp: 0,
        sender_id: "a".into(),
        target_agent_id: "nobody-home".into(),
        content: serde_json::json!({"text": "hi"}),
        text_representation: None,
        metadata: None,
        requires_response: None,
    }))
    .await;

    let (_, content) = recv_mod_response(&mut a).await;
    assert_eq!(content["error"], meshhub_protocol::error_codes::UNREACHABLE);
}
