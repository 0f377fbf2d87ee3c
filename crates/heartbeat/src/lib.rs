//! Background liveness monitor.
//!
//! Periodically scans [`meshhub_registry::ConnectionRegistry`] for agents
//! idle longer than `agent_timeout_s`, pings them through a caller-supplied
//! [`PingSink`], and evicts (registry unbind + identity claim release) any
//! agent that doesn't answer within `ping_timeout_s`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use meshhub_identity::IdentityManager;
use meshhub_registry::ConnectionRegistry;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How the monitor actually delivers a ping to an agent. Implemented by the
/// gateway, which knows how to serialize and enqueue a `system_request`
/// frame on the agent's connection.
#[async_trait]
pub trait PingSink: Send + Sync {
    async fn send_ping(&self, agent_id: &str) -> bool;

    /// Called after the monitor evicts `agent_id` (missed pong, or the ping
    /// send itself failed). Lets the gateway notify mods of the disconnect
    /// the same way an ordinary connection close would, since an evicted
    /// agent's reader task is already gone and will never run its own
    /// disconnect cleanup.
    async fn on_evicted(&self, _agent_id: &str) {}
}

#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    pub heartbeat_interval: Duration,
    pub agent_timeout: Duration,
    pub ping_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            agent_timeout: Duration::from_secs(90),
            ping_timeout: Duration::from_secs(5),
        }
    }
}

struct Inner {
    registry: ConnectionRegistry,
    identity: Arc<IdentityManager>,
    ping_sink: Arc<dyn PingSink>,
    config: HeartbeatConfig,
    /// agent_id → deadline by which a pong must arrive.
    awaiting_pong: RwLock<HashMap<String, Instant>>,
    running: RwLock<bool>,
    wake: Notify,
}

/// Owns the spawned monitor task. Dropping this does not stop the task;
/// call [`HeartbeatHandle::stop`] for a clean shutdown.
pub struct HeartbeatHandle {
    inner: Arc<Inner>,
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    /// Record that a pong was received for `agent_id`, clearing any pending
    /// eviction deadline. Call this from the gateway's `system_response`
    /// dispatch when `command == "pong"`.
    pub async fn note_pong(&self, agent_id: &str) {
        self.inner.awaiting_pong.write().await.remove(agent_id);
        self.inner.registry.touch(agent_id).await;
    }

    /// Stop the monitor loop. Idempotent.
    pub async fn stop(self) {
        *self.inner.running.write().await = false;
        self.inner.wake.notify_one();
        self.task.abort();
    }
}

/// Spawn the heartbeat monitor loop.
pub fn spawn(
    registry: ConnectionRegistry,
    identity: Arc<IdentityManager>,
    ping_sink: Arc<dyn PingSink>,
    config: HeartbeatConfig,
) -> HeartbeatHandle {
    let inner = Arc::new(Inner {
        registry,
        identity,
        ping_sink,
        config,
        awaiting_pong: RwLock::new(HashMap::new()),
        running: RwLock::new(true),
        wake: Notify::new(),
    });

    let loop_inner = Arc::clone(&inner);
    let task = tokio::spawn(async move { run_loop(loop_inner).await });

    HeartbeatHandle { inner, task }
}

async fn run_loop(inner: Arc<Inner>) {
    let mut ticker = tokio::time::interval(inner.config.heartbeat_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {},
            () = inner.wake.notified() => {
                if !*inner.running.read().await {
                    break;
                }
                continue;
            },
        }

        if !*inner.running.read().await {
            break;
        }

        tick(&inner).await;
    }

    debug!("heartbeat monitor stopped");
}

async fn tick(inner: &Arc<Inner>) {
    evict_unanswered(inner).await;
    ping_idle_agents(inner).await;
    let removed = inner.identity.sweep_expired().await;
    if removed > 0 {
        debug!(removed, "heartbeat tick swept expired identity claims");
    }
}

async fn ping_idle_agents(inner: &Arc<Inner>) {
    let idle = inner.registry.idle_longer_than(inner.config.agent_timeout).await;
    if idle.is_empty() {
        return;
    }
    let deadline = Instant::now() + inner.config.ping_timeout;
    let mut awaiting = inner.awaiting_pong.write().await;
    for agent_id in idle {
        if awaiting.contains_key(&agent_id) {
            continue;
        }
        if inner.ping_sink.send_ping(&agent_id).await {
            awaiting.insert(agent_id, deadline);
        } else {
            warn!(agent_id, "ping send failed, evicting immediately");
            evict(inner, &agent_id).await;
        }
    }
}

async fn evict_unanswered(inner: &Arc<Inner>) {
    let now = Instant::now();
    let expired: Vec<String> = {
        let awaiting = inner.awaiting_pong.read().await;
        awaiting
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(agent_id, _)| agent_id.clone())
            .collect()
    };
    for agent_id in expired {
        inner.awaiting_pong.write().await.remove(&agent_id);
        evict(inner, &agent_id).await;
    }
}

async fn evict(inner: &Arc<Inner>, agent_id: &str) {
    if inner.registry.unbind(agent_id).await {
        info!(agent_id, "evicted agent for missed heartbeat");
        inner.ping_sink.on_evicted(agent_id).await;
    }
    inner.identity.release(agent_id).await;
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use meshhub_identity::Authorization;
    use tokio::sync::mpsc;

    use super::*;

    struct CountingPingSink {
        pings: AtomicUsize,
        evictions: AtomicUsize,
        answer: bool,
    }

    #[async_trait]
    impl PingSink for CountingPingSink {
        async fn send_ping(&self, _agent_id: &str) -> bool {
            self.pings.fetch_add(1, Ordering::SeqCst);
            self.answer
        }

        async fn on_evicted(&self, _agent_id: &str) {
            self.evictions.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn idle_agent_gets_pinged_then_evicted_without_pong() {
        let registry = ConnectionRegistry::new();
        let identity = Arc::new(IdentityManager::new(b"secret".to_vec(), 24));
        let (tx, _rx) = mpsc::unbounded_channel();
        registry
            .bind("a1", tx, serde_json::Value::Null, false)
            .await
            .expect("bind succeeds");
        identity
            .claim("a1", Authorization::None)
            .await
            .expect("claim succeeds");

        let sink = Arc::new(CountingPingSink {
            pings: AtomicUsize::new(0),
            evictions: AtomicUsize::new(0),
            answer: true,
        });
        let config = HeartbeatConfig {
            heartbeat_interval: Duration::from_millis(10),
            agent_timeout: Duration::from_millis(0),
            ping_timeout: Duration::from_millis(5),
        };
        let handle = spawn(registry.clone(), Arc::clone(&identity), sink.clone(), config);

        // First tick (t=10ms) pings and starts a 5ms pong deadline.
        tokio::time::advance(Duration::from_millis(12)).await;
        tokio::task::yield_now().await;
        assert!(sink.pings.load(Ordering::SeqCst) >= 1);
        assert!(registry.is_bound("a1").await);

        // Second tick (t=20ms) finds the deadline elapsed and evicts.
        tokio::time::advance(Duration::from_millis(10)).await;
        tokio::task::yield_now().await;
        assert!(!registry.is_bound("a1").await);
        assert_eq!(sink.evictions.load(Ordering::SeqCst), 1);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn note_pong_clears_pending_eviction() {
        let registry = ConnectionRegistry::new();
        let identity = Arc::new(IdentityManager::new(b"secret".to_vec(), 24));
        let (tx, _rx) = mpsc::unbounded_channel();
        registry
            .bind("a1", tx, serde_json::Value::Null, false)
            .await
            .expect("bind succeeds");

        let sink = Arc::new(CountingPingSink {
            pings: AtomicUsize::new(0),
            evictions: AtomicUsize::new(0),
            answer: true,
        });
        let config = HeartbeatConfig {
            heartbeat_interval: Duration::from_millis(10),
            agent_timeout: Duration::from_millis(20),
            ping_timeout: Duration::from_millis(50),
        };
        let handle = spawn(registry.clone(), identity, sink, config);

        // First ping fires once idle_for exceeds 20ms, i.e. the tick at t=30ms.
        tokio::time::advance(Duration::from_millis(35)).await;
        tokio::task::yield_now().await;
        assert!(sink.pings.load(Ordering::SeqCst) >= 1);
        handle.note_pong("a1").await;

        // Re-idling after the pong takes another 20ms+ before a re-ping, well
        // short of the 50ms pong deadline, so the agent should stay bound.
        tokio::time::advance(Duration::from_millis(40)).await;
        tokio::task::yield_now().await;
        assert!(registry.is_bound("a1").await);

        handle.stop().await;
    }
}
