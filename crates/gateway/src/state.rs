//! Everything the gateway's HTTP/WS handlers need, bundled into one
//! `Clone`-able handle threaded through axum's `State` extractor.

use std::sync::Arc;

use meshhub_config::MeshhubConfig;
use meshhub_heartbeat::HeartbeatHandle;
use meshhub_identity::IdentityManager;
use meshhub_mods::ModHost;
use meshhub_registry::ConnectionRegistry;
use meshhub_router::Router;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Bundles every long-lived collaborator the gateway composes at startup.
///
/// Owned by one `Arc`, cloned into every connection task and axum handler.
/// The heartbeat handle is set once `run` spawns the monitor, after the
/// state itself is constructed (the monitor needs a `PingSink` that in turn
/// needs the registry), so it lives behind a `RwLock<Option<_>>`.
pub struct GatewayState {
    pub registry: ConnectionRegistry,
    pub identity: Arc<IdentityManager>,
    pub mods: ModHost,
    pub router: Router<ModHost>,
    pub config: MeshhubConfig,
    pub network_id: String,
    pub heartbeat: RwLock<Option<HeartbeatHandle>>,
}

impl GatewayState {
    #[must_use]
    pub fn new(config: MeshhubConfig, identity: IdentityManager, mods: ModHost) -> Arc<Self> {
        Self::new_with_registry(config, identity, mods, ConnectionRegistry::new())
    }

    /// Like [`GatewayState::new`], but takes a registry built ahead of time —
    /// needed when a mod (such as the channel-messaging mod) is itself
    /// constructed against that same registry before `GatewayState` exists.
    #[must_use]
    pub fn new_with_registry(config: MeshhubConfig, identity: IdentityManager, mods: ModHost, registry: ConnectionRegistry) -> Arc<Self> {
        let router = Router::new(registry.clone(), Arc::new(mods.clone()));
        Arc::new(Self {
            registry,
            identity: Arc::new(identity),
            mods,
            router,
            network_id: format!("n-{}", Uuid::new_v4()),
            config,
            heartbeat: RwLock::new(None),
        })
    }

    pub async fn client_count(&self) -> usize {
        self.registry.count().await
    }

    pub async fn set_heartbeat(&self, handle: HeartbeatHandle) {
        *self.heartbeat.write().await = Some(handle);
    }

    /// Stop the heartbeat monitor, if one is running. Called on graceful
    /// shutdown so the background loop doesn't outlive the listener.
    pub async fn stop_heartbeat(&self) {
        if let Some(handle) = self.heartbeat.write().await.take() {
            handle.stop().await;
        }
    }
}
