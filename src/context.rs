//! Service context built once at startup.
//!
//! Owns every skin component and the cluster receiver task. Cloning is
//! cheap; all clones share the same components.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::cache::CacheRegistry;
use crate::config::Config;
use crate::database::SkinStore;
use crate::generator::{GeneratorApi, SkinGenerator};
use crate::resolver::{IdentityApi, IdentityResolver};
use crate::skins::SkinCache;
use crate::sync::{SyncChannel, SyncTransport};

/// Name resolved by the startup service check.
const SERVICE_CHECK_PLAYER: &str = "Notch";

/// External collaborators the context is wired to.
pub struct Services {
    pub store: Arc<dyn SkinStore>,
    pub identity: Arc<dyn IdentityApi>,
    pub generator: Arc<dyn GeneratorApi>,
    /// `None` runs the node standalone.
    pub transport: Option<Arc<dyn SyncTransport>>,
}

/// Shared skin services.
#[derive(Clone)]
pub struct SkinsContext {
    /// Cache registry for creating/accessing caches.
    pub registry: Arc<CacheRegistry>,

    pub skins: SkinCache,

    pub resolver: Arc<IdentityResolver>,

    pub generator: Arc<SkinGenerator>,

    /// Cluster channel, when running multi-node.
    pub sync: Option<SyncChannel>,

    receiver: Arc<Mutex<Option<JoinHandle<()>>>>,
    shutdown_grace: Duration,
}

impl SkinsContext {
    pub fn new(config: &Config, services: Services) -> Self {
        let registry = Arc::new(CacheRegistry::new());
        let resolver = Arc::new(IdentityResolver::new(services.identity, config.resolver()));
        let generator = Arc::new(SkinGenerator::new(services.generator, config.generator()));
        let sync = services
            .transport
            .map(|transport| SyncChannel::new(&config.node_id, &config.sync_channel, transport));

        let skins = SkinCache::new(
            &registry,
            services.store,
            Arc::clone(&resolver),
            Arc::clone(&generator),
            sync.clone(),
            config.skin_cache(),
        );

        Self {
            registry,
            skins,
            resolver,
            generator,
            sync,
            receiver: Arc::new(Mutex::new(None)),
            shutdown_grace: config.shutdown_grace,
        }
    }

    /// Subscribe to sibling updates and preload the default skins.
    ///
    /// # Errors
    /// Returns error if the cluster subscription cannot be opened.
    pub async fn start(&self) -> Result<()> {
        if let Some(sync) = &self.sync {
            let handle = sync.on_receive(Arc::new(self.skins.clone())).await?;
            if let Some(previous) = self.receiver.lock().replace(handle) {
                previous.abort();
            }
            info!("Cluster sync started as node {}", sync.node_id());
        } else {
            info!("Running single-node, cluster sync disabled");
        }

        self.skins.preload_default_skins().await;
        Ok(())
    }

    /// Resolve a well-known player to check the identity service.
    pub async fn run_service_check(&self) -> bool {
        match self.resolver.resolve(SERVICE_CHECK_PLAYER).await {
            Ok(_) => {
                info!("Identity service check passed");
                true
            }
            Err(e) => {
                error!("Identity service check failed: {}", e);
                warn!("Skins will fall back to stored or default records until the service recovers");
                false
            }
        }
    }

    /// Stop receiving sibling updates, then drain in-flight work.
    pub async fn shutdown(&self) {
        if let Some(receiver) = self.receiver.lock().take() {
            receiver.abort();
        }

        info!("Waiting up to {:?} for in-flight skin work", self.shutdown_grace);
        self.skins.shutdown(self.shutdown_grace).await;
        self.generator.shutdown(self.shutdown_grace).await;
        info!("Skin services stopped");
    }
}
