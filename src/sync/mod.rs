//! Cluster sync: propagates skin changes between proxy nodes.

mod channel;
mod message;
mod transport;

pub use channel::{SyncChannel, SyncHandler};
pub use message::{SyncError, SyncMessage};
pub use transport::{LocalBus, RedisTransport, SyncTransport};
