//! skinsync - skin resolution node.
//!
//! Resolves and caches player skins and keeps the cache coherent with the
//! other nodes of the cluster until interrupted.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use skinsync::config::Config;
use skinsync::context::{Services, SkinsContext};
use skinsync::database::{Database, MemorySkinStore, MongoSkinStore, SkinStore};
use skinsync::generator::MineSkinClient;
use skinsync::resolver::MojangClient;
use skinsync::sync::{RedisTransport, SyncTransport};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file first (before anything else)
    dotenvy::dotenv().ok();

    // If RUST_LOG is not set, default to "info" level for our crate
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("skinsync=info,mongodb=warn,redis=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    info!("Starting skinsync...");

    let config = Config::from_env().context("loading configuration")?;
    info!("Configuration loaded successfully");
    info!("Node id: {}", config.node_id);

    // Skin store
    let store: Arc<dyn SkinStore> = match &config.mongodb_uri {
        Some(uri) => {
            info!("Connecting to MongoDB...");
            let db = Database::connect(uri, &config.mongodb_database).await?;
            info!("Database connected");
            Arc::new(MongoSkinStore::new(&db).await?)
        }
        None => {
            warn!("MONGODB_URI not set, skins are stored in memory only");
            Arc::new(MemorySkinStore::new())
        }
    };

    // Cluster transport
    let transport: Option<Arc<dyn SyncTransport>> = match (config.multi_node, &config.redis_url) {
        (true, Some(url)) => Some(Arc::new(RedisTransport::connect(url).await?)),
        (true, None) => {
            warn!("MULTI_NODE is set but REDIS_URL is not, running single-node");
            None
        }
        (false, _) => None,
    };

    let identity = MojangClient::new(
        &config.mojang_api_url,
        &config.mojang_session_url,
        config.resolve_timeout,
    )?;
    let generator = MineSkinClient::new(
        &config.mineskin_url,
        config.mineskin_api_key.clone(),
        config.generate_timeout,
    )?;

    let context = SkinsContext::new(
        &config,
        Services {
            store,
            identity: Arc::new(identity),
            generator: Arc::new(generator),
            transport,
        },
    );
    context.start().await?;
    context.run_service_check().await;

    info!("skinsync is running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("listening for shutdown signal")?;

    info!("Shutting down...");
    context.shutdown().await;

    Ok(())
}
