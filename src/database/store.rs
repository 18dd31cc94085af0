//! Persistent skin record store interface.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::skins::SkinRecord;

/// Keyed table of `owner_key -> SkinRecord`.
///
/// Holds at most one current record per owner key.
#[async_trait]
pub trait SkinStore: Send + Sync {
    /// Read the current record for an owner key.
    async fn get(&self, owner_key: &str) -> Result<Option<SkinRecord>>;

    /// Insert only if no record exists. Returns `true` if inserted.
    async fn create(&self, record: &SkinRecord) -> Result<bool>;

    /// Insert the record, or replace the stored one if `record` is newer.
    ///
    /// Last-write-wins by `resolved_at`, like the in-memory cache. Returns
    /// `false` when the stored record is as new or newer and was kept.
    async fn upsert(&self, record: &SkinRecord) -> Result<bool>;
}

/// Process-local store, used when no database is configured.
#[derive(Debug, Default)]
pub struct MemorySkinStore {
    records: DashMap<String, SkinRecord>,
}

impl MemorySkinStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl SkinStore for MemorySkinStore {
    async fn get(&self, owner_key: &str) -> Result<Option<SkinRecord>> {
        Ok(self.records.get(owner_key).map(|r| r.value().clone()))
    }

    async fn create(&self, record: &SkinRecord) -> Result<bool> {
        match self.records.entry(record.owner_key.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(entry) => {
                entry.insert(record.clone());
                Ok(true)
            }
        }
    }

    async fn upsert(&self, record: &SkinRecord) -> Result<bool> {
        match self.records.entry(record.owner_key.clone()) {
            Entry::Occupied(mut entry) => {
                if !record.supersedes(entry.get()) {
                    return Ok(false);
                }
                entry.insert(record.clone());
                Ok(true)
            }
            Entry::Vacant(entry) => {
                entry.insert(record.clone());
                Ok(true)
            }
        }
    }
}
