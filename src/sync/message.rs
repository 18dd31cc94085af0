//! Wire format of cluster sync messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::skins::{SkinRecord, normalize_key};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("undecodable sync message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid sync message: {0}")]
    Invalid(String),
}

/// The unit broadcast on the cluster channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMessage {
    pub owner_key: String,
    pub record: SkinRecord,
    pub origin_node_id: String,
    pub sent_at: DateTime<Utc>,
}

impl SyncMessage {
    pub fn new(owner_key: &str, record: SkinRecord, origin_node_id: &str) -> Self {
        Self {
            owner_key: normalize_key(owner_key),
            record,
            origin_node_id: origin_node_id.to_string(),
            sent_at: Utc::now(),
        }
    }

    pub fn encode(&self) -> Result<String, SyncError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse and sanity-check a payload received from the channel.
    pub fn decode(payload: &str) -> Result<Self, SyncError> {
        let message: SyncMessage = serde_json::from_str(payload)?;

        if message.owner_key.is_empty() || message.owner_key != normalize_key(&message.owner_key) {
            return Err(SyncError::Invalid(format!(
                "owner key {:?} is not normalized",
                message.owner_key
            )));
        }
        if message.record.owner_key != message.owner_key {
            return Err(SyncError::Invalid(format!(
                "record owner {:?} does not match key {:?}",
                message.record.owner_key, message.owner_key
            )));
        }
        if message.record.expires_at < message.record.resolved_at {
            return Err(SyncError::Invalid("record expires before it was resolved".into()));
        }
        if message.origin_node_id.is_empty() {
            return Err(SyncError::Invalid("missing origin node id".into()));
        }

        Ok(message)
    }
}
