//! Pluggable server-side mods: named objects with their own state, notified
//! of connection lifecycle events and handed `mod_message`/channel frames by
//! the router.

pub mod manifest;

use std::sync::Arc;

use async_trait::async_trait;
pub use manifest::ModManifest;
use meshhub_protocol::Frame;
use meshhub_router::ModDispatch;
use serde_json::Value;
use tracing::{error, warn};

/// A server-side plugin. Implementations must not block the caller for long
/// — `on_mod_message` in particular runs on the router's hot path.
#[async_trait]
pub trait Mod: Send + Sync {
    fn name(&self) -> &str;
    fn manifest(&self) -> ModManifest;
    async fn on_agent_connect(&self, agent_id: &str, metadata: &Value);
    async fn on_agent_disconnect(&self, agent_id: &str);
    async fn on_mod_message(&self, frame: Frame);
}

/// Owns every configured mod and fans lifecycle/message events out to them.
/// A panic inside one mod is caught and logged; it never prevents other
/// mods from running or crashes the caller.
#[derive(Clone)]
pub struct ModHost {
    mods: Arc<Vec<Arc<dyn Mod>>>,
}

impl ModHost {
    #[must_use]
    pub fn new(mods: Vec<Arc<dyn Mod>>) -> Self {
        Self { mods: Arc::new(mods) }
    }

    #[must_use]
    pub fn manifests(&self) -> Vec<ModManifest> {
        self.mods.iter().map(|m| m.manifest()).collect()
    }

    #[must_use]
    pub fn manifest_for(&self, name: &str) -> Option<ModManifest> {
        self.get(name).map(|m| m.manifest())
    }

    fn get(&self, name: &str) -> Option<Arc<dyn Mod>> {
        self.mods.iter().find(|m| m.name() == name).cloned()
    }

    pub async fn notify_connect(&self, agent_id: &str, metadata: Value) {
        for m in self.mods.iter() {
            let m = Arc::clone(m);
            let agent_id = agent_id.to_string();
            let metadata = metadata.clone();
            let name = m.name().to_string();
            let task = tokio::spawn(async move { m.on_agent_connect(&agent_id, &metadata).await });
            if let Err(err) = task.await {
                error!(mod_name = %name, %err, "mod panicked handling on_agent_connect");
            }
        }
    }

    pub async fn notify_disconnect(&self, agent_id: &str) {
        for m in self.mods.iter() {
            let m = Arc::clone(m);
            let agent_id = agent_id.to_string();
            let name = m.name().to_string();
            let task = tokio::spawn(async move { m.on_agent_disconnect(&agent_id).await });
            if let Err(err) = task.await {
                error!(mod_name = %name, %err, "mod panicked handling on_agent_disconnect");
            }
        }
    }
}

#[async_trait]
impl ModDispatch for ModHost {
    async fn dispatch(&self, mod_name: &str, frame: Frame) {
        let Some(m) = self.get(mod_name) else {
            warn!(mod_name, "mod_message addressed to unknown mod, dropping");
            return;
        };
        let task = tokio::spawn(async move { m.on_mod_message(frame).await });
        if let Err(err) = task.await {
            error!(mod_name, %err, "mod panicked handling on_mod_message");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingMod {
        connects: AtomicUsize,
        disconnects: AtomicUsize,
        messages: AtomicUsize,
    }

    #[async_trait]
    impl Mod for CountingMod {
        fn name(&self) -> &str {
            "counter"
        }

        fn manifest(&self) -> ModManifest {
            ModManifest {
                name: "counter".into(),
                version: "0.1.0".into(),
                capabilities: vec![],
            }
        }

        async fn on_agent_connect(&self, _agent_id: &str, _metadata: &Value) {
            self.connects.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_agent_disconnect(&self, _agent_id: &str) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_mod_message(&self, _frame: Frame) {
            self.messages.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct PanickingMod;

    #[async_trait]
    impl Mod for PanickingMod {
        fn name(&self) -> &str {
            "boom"
        }

        fn manifest(&self) -> ModManifest {
            ModManifest {
                name: "boom".into(),
                version: "0.1.0".into(),
                capabilities: vec![],
            }
        }

        async fn on_agent_connect(&self, _agent_id: &str, _metadata: &Value) {
            panic!("boom")
        }

        async fn on_agent_disconnect(&self, _agent_id: &str) {}

        async fn on_mod_message(&self, _frame: Frame) {}
    }

    #[tokio::test]
    async fn lifecycle_events_reach_every_mod() {
        let counter = Arc::new(CountingMod {
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            messages: AtomicUsize::new(0),
        });
        let host = ModHost::new(vec![counter.clone()]);

        host.notify_connect("a1", Value::Null).await;
        host.notify_disconnect("a1").await;

        assert_eq!(counter.connects.load(Ordering::SeqCst), 1);
        assert_eq!(counter.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_mod_does_not_affect_others() {
        let counter = Arc::new(CountingMod {
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            messages: AtomicUsize::new(0),
        });
        let boom: Arc<dyn Mod> = Arc::new(PanickingMod);
        let host = ModHost::new(vec![boom, counter.clone()]);

        host.notify_connect("a1", Value::Null).await;

        assert_eq!(counter.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dispatch_to_unknown_mod_is_a_no_op() {
        let host = ModHost::new(vec![]);
        let frame = Frame::SystemResponse(meshhub_protocol::SystemResponse::ok("noop", Value::Null));
        host.dispatch("ghost", frame).await;
    }
}
