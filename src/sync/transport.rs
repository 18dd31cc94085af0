//! Inter-node messaging transports.
//!
//! The sync channel only needs an opaque publish/subscribe capability on a
//! named channel. `RedisTransport` is the multi-node implementation;
//! `LocalBus` fans out inside one process.

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use futures::stream::BoxStream;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Fire one payload at every subscriber of `channel`.
    async fn publish(&self, channel: &str, payload: String) -> Result<()>;

    /// Start receiving payloads published on `channel`.
    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>>;
}

/// In-process bus. Every subscriber, including the publisher's own, sees
/// each payload.
#[derive(Clone)]
pub struct LocalBus {
    channels: Arc<DashMap<String, broadcast::Sender<String>>>,
    capacity: usize,
}

impl fmt::Debug for LocalBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalBus")
            .field("channels", &self.channels.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity,
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl SyncTransport for LocalBus {
    async fn publish(&self, channel: &str, payload: String) -> Result<()> {
        // no subscribers is not an error for fire-and-forget delivery
        let _ = self.sender(channel).send(payload);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>> {
        let receiver = self.sender(channel).subscribe();
        let channel = channel.to_string();

        let stream = futures::stream::unfold(receiver, move |mut receiver| {
            let channel = channel.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(payload) => return Some((payload, receiver)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("Subscriber on {} lagged, {} messages lost", channel, skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(stream.boxed())
    }
}

/// Redis pub/sub transport shared by every node of a cluster.
#[derive(Clone)]
pub struct RedisTransport {
    client: redis::Client,
    conn: ConnectionManager,
}

impl fmt::Debug for RedisTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisTransport")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisTransport {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        info!("Connecting to Redis at {}", redis_url);

        let client = redis::Client::open(redis_url).context("creating Redis client")?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .context("connecting to Redis")?;

        info!("Successfully connected to Redis");
        Ok(Self { client, conn })
    }
}

#[async_trait]
impl SyncTransport for RedisTransport {
    async fn publish(&self, channel: &str, payload: String) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(channel, payload)
            .await
            .context("Redis PUBLISH failed")?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .context("opening Redis pub/sub connection")?;
        pubsub
            .subscribe(channel)
            .await
            .context("Redis SUBSCRIBE failed")?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            match msg.get_payload::<String>() {
                Ok(payload) => Some(payload),
                Err(e) => {
                    warn!("Dropping non-text payload on {}: {}", msg.get_channel_name(), e);
                    None
                }
            }
        });

        Ok(stream.boxed())
    }
}
