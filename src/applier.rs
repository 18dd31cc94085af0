//! Hand-off of installed skins to the host platform.
//!
//! Putting a texture on a connected player is the host's job. The host
//! implements [`SkinApplier`] and the bridge feeds it every record the
//! cache installs, whether resolved locally or received from a sibling.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::skins::{SkinCache, SkinRecord};

#[async_trait]
pub trait SkinApplier: Send + Sync {
    /// Show `record` to everyone who can currently see its owner.
    async fn apply(&self, record: &SkinRecord) -> anyhow::Result<()>;
}

/// Forward installed records to `applier` until the cache is dropped.
pub fn spawn_applier_bridge(cache: &SkinCache, applier: Arc<dyn SkinApplier>) -> JoinHandle<()> {
    let mut updates = cache.subscribe();

    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(record) => {
                    debug!("Applying {:?} skin for {}", record.source, record.owner_key);
                    if let Err(e) = applier.apply(&record).await {
                        warn!("Failed to apply skin for {}: {:#}", record.owner_key, e);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Applier bridge lagged, {} skin updates skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        info!("Applier bridge stopped");
    })
}
