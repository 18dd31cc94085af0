//! Cluster sync channel.
//!
//! Fire-and-forget, at-most-once propagation of skin records to sibling
//! nodes. Receivers apply last-write-wins per key; messages from this node
//! are ignored so nothing is ever rebroadcast.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::message::SyncMessage;
use super::transport::SyncTransport;
use crate::skins::SkinRecord;

/// Receives sync messages from other nodes.
#[async_trait]
pub trait SyncHandler: Send + Sync {
    async fn handle(&self, message: SyncMessage);
}

#[derive(Clone)]
pub struct SyncChannel {
    node_id: Arc<str>,
    channel: Arc<str>,
    transport: Arc<dyn SyncTransport>,
}

impl fmt::Debug for SyncChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncChannel")
            .field("node_id", &self.node_id)
            .field("channel", &self.channel)
            .finish()
    }
}

impl SyncChannel {
    pub fn new(node_id: &str, channel: &str, transport: Arc<dyn SyncTransport>) -> Self {
        Self {
            node_id: node_id.into(),
            channel: channel.into(),
            transport,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Publish a record to sibling nodes without waiting for delivery.
    pub fn broadcast(&self, owner_key: &str, record: &SkinRecord) {
        let message = SyncMessage::new(owner_key, record.clone(), &self.node_id);
        let payload = match message.encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode sync message for {}: {}", owner_key, e);
                return;
            }
        };

        let transport = Arc::clone(&self.transport);
        let channel = Arc::clone(&self.channel);
        let owner_key = message.owner_key;
        tokio::spawn(async move {
            match transport.publish(&channel, payload).await {
                Ok(()) => debug!("Broadcast skin update for {}", owner_key),
                Err(e) => warn!("Failed to broadcast skin update for {}: {:#}", owner_key, e),
            }
        });
    }

    /// Subscribe and hand every foreign, well-formed message to `handler`
    /// on a dedicated task. The subscription is live when this returns.
    pub async fn on_receive(&self, handler: Arc<dyn SyncHandler>) -> Result<JoinHandle<()>> {
        let mut stream = self.transport.subscribe(&self.channel).await?;
        let node_id = Arc::clone(&self.node_id);
        let channel = Arc::clone(&self.channel);

        info!("Listening for skin updates on {}", channel);

        Ok(tokio::spawn(async move {
            while let Some(payload) = stream.next().await {
                let message = match SyncMessage::decode(&payload) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("Dropping sync message on {}: {}", channel, e);
                        continue;
                    }
                };

                if message.origin_node_id == *node_id {
                    continue;
                }

                debug!(
                    "Received skin update for {} from {}",
                    message.owner_key, message.origin_node_id
                );
                handler.handle(message).await;
            }

            info!("Sync subscription on {} ended", channel);
        }))
    }
}
