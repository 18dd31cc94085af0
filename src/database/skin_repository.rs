//! Skin record repository backed by MongoDB.
//!
//! One document per owner key, enforced by a unique index. Each document
//! also carries `resolved_at_ns`, the resolution time as an integer, so
//! writes can be made conditional on ordering.

use anyhow::{Context, Result};
use async_trait::async_trait;
use mongodb::bson::{doc, to_document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{IndexOptions, ReplaceOptions, UpdateOptions};
use mongodb::{Collection, IndexModel};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Database, SkinStore};
use crate::skins::SkinRecord;

const DUPLICATE_KEY: i32 = 11000;

/// Stored form of a [`SkinRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSkin {
    #[serde(flatten)]
    pub record: SkinRecord,
    pub resolved_at_ns: i64,
}

impl From<&SkinRecord> for StoredSkin {
    fn from(record: &SkinRecord) -> Self {
        Self {
            resolved_at_ns: record.resolved_at.timestamp_nanos_opt().unwrap_or(i64::MAX),
            record: record.clone(),
        }
    }
}

/// Repository for skin records.
pub struct MongoSkinStore {
    collection: Collection<StoredSkin>,
}

impl MongoSkinStore {
    /// Open the skins collection and make sure the owner key index exists.
    pub async fn new(db: &Database) -> Result<Self> {
        let collection = db.skins();

        let index = IndexModel::builder()
            .keys(doc! { "owner_key": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        collection
            .create_index(index)
            .await
            .context("creating owner_key index")?;

        Ok(Self { collection })
    }
}

/// A conditional upsert that matched nothing collides with the newer
/// document on the unique owner key.
fn is_duplicate_key(error: &mongodb::error::Error) -> bool {
    matches!(
        error.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(failure)) if failure.code == DUPLICATE_KEY
    )
}

#[async_trait]
impl SkinStore for MongoSkinStore {
    async fn get(&self, owner_key: &str) -> Result<Option<SkinRecord>> {
        let filter = doc! { "owner_key": owner_key };
        let result = self.collection.find_one(filter).await?;
        debug!("DB get skin for {}: {:?}", owner_key, result.is_some());
        Ok(result.map(|stored| stored.record))
    }

    async fn create(&self, record: &SkinRecord) -> Result<bool> {
        let filter = doc! { "owner_key": record.owner_key.as_str() };
        let update = doc! { "$setOnInsert": to_document(&StoredSkin::from(record))? };
        let options = UpdateOptions::builder().upsert(true).build();

        let result = self
            .collection
            .update_one(filter, update)
            .with_options(options)
            .await?;

        let created = result.upserted_id.is_some();
        debug!("Create skin for {}: {}", record.owner_key, created);
        Ok(created)
    }

    async fn upsert(&self, record: &SkinRecord) -> Result<bool> {
        let stored = StoredSkin::from(record);
        let filter = doc! {
            "owner_key": record.owner_key.as_str(),
            "resolved_at_ns": { "$lt": stored.resolved_at_ns },
        };
        let options = ReplaceOptions::builder().upsert(true).build();

        match self
            .collection
            .replace_one(filter, &stored)
            .with_options(options)
            .await
        {
            Ok(_) => {
                debug!("Saved skin for {} ({:?})", record.owner_key, record.source);
                Ok(true)
            }
            Err(e) if is_duplicate_key(&e) => {
                debug!("Stored skin for {} is newer, kept it", record.owner_key);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}
