//! Gateway: the hub's composition root. Owns the connection registry,
//! identity manager, heartbeat monitor, mod host and router, and exposes
//! them over a single WebSocket endpoint.
//!
//! Lifecycle:
//! 1. Load + validate config (`meshhub_config`)
//! 2. Build [`state::GatewayState`] (registry, identity, mods, router)
//! 3. Spawn the heartbeat monitor and identity claim sweeper
//! 4. Serve `/ws` and `/health` over HTTP

pub mod dispatch;
pub mod ping;
pub mod server;
pub mod state;
pub mod ws;

pub use server::{bind, build_app, run, serve};
pub use state::GatewayState;
