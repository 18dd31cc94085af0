//! Skin cache: fresh-record lookups, single-flight resolution and
//! last-write-wins installation of records from every source.
//!
//! ## Lookup path
//!
//! 1. Fresh record in memory: returned without I/O.
//! 2. Otherwise one flight per key (on the bounded worker pool) consults
//!    the store, then the identity service, and installs the result.
//! 3. If resolution fails the flight serves the last known record, or a
//!    default skin, together with the error.
//!
//! Every mutation of a key goes through that key's compute section in the
//! record cache, so unrelated keys never contend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::sync::{Semaphore, broadcast};
use tracing::{debug, info, warn};

use super::error::{ResolutionError, SkinError};
use super::flight::{FlightAborted, SingleFlight};
use super::record::{SkinRecord, SkinSource, normalize_key};
use crate::cache::{CacheConfig, CacheRegistry, Compute, TypedCache};
use crate::database::SkinStore;
use crate::generator::{SkinGenerator, looks_like_url};
use crate::resolver::IdentityResolver;
use crate::sync::{SyncChannel, SyncHandler, SyncMessage};

/// Skin cache settings.
#[derive(Debug, Clone)]
pub struct SkinCacheConfig {
    /// How long "no such player" answers are remembered.
    pub negative_ttl: Duration,
    /// Freshness of explicitly set records (manual, generated, reset).
    pub explicit_ttl: Duration,
    /// Concurrent resolutions allowed per process.
    pub workers: usize,
    /// Default skin sources: player names or texture URLs.
    pub default_skins: Vec<String>,
}

impl Default for SkinCacheConfig {
    fn default() -> Self {
        Self {
            negative_ttl: Duration::from_secs(300),
            explicit_ttl: Duration::from_secs(365 * 24 * 3600),
            workers: 8,
            default_skins: Vec::new(),
        }
    }
}

/// Result of a lookup. Lookups always produce a record; `error` is set
/// when it is a fallback because resolution failed.
#[derive(Debug, Clone, PartialEq)]
pub struct SkinLookup {
    pub record: SkinRecord,
    pub error: Option<SkinError>,
}

impl SkinLookup {
    fn ok(record: SkinRecord) -> Self {
        Self { record, error: None }
    }

    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// Resolved or set on this node; rebroadcast to siblings.
    Local,
    /// Received from a sibling; never rebroadcast.
    Remote,
}

/// Cloneable handle to the skin cache.
#[derive(Clone)]
pub struct SkinCache {
    inner: Arc<Inner>,
}

struct Inner {
    records: TypedCache<String, SkinRecord>,
    /// Names the identity service does not know.
    negative: TypedCache<String, ()>,
    /// Resolved default skins, keyed by their configured source.
    defaults: TypedCache<String, SkinRecord>,
    /// Keys whose stored record must not short-circuit the next resolution.
    invalidated: DashMap<String, ()>,
    flights: SingleFlight<String, SkinLookup>,
    /// Direct identity lookups of source players, keyed by name.
    lookups: SingleFlight<String, Result<SkinRecord, ResolutionError>>,
    workers: Semaphore,
    store: Arc<dyn SkinStore>,
    resolver: Arc<IdentityResolver>,
    generator: Arc<SkinGenerator>,
    sync: Option<SyncChannel>,
    updates: broadcast::Sender<SkinRecord>,
    config: SkinCacheConfig,
}

impl SkinCache {
    pub fn new(
        registry: &CacheRegistry,
        store: Arc<dyn SkinStore>,
        resolver: Arc<IdentityResolver>,
        generator: Arc<SkinGenerator>,
        sync: Option<SyncChannel>,
        config: SkinCacheConfig,
    ) -> Self {
        let records = registry.get_or_create("skin_records", CacheConfig::skin_records());
        let negative = registry.get_or_create(
            "negative_lookups",
            CacheConfig::negative_lookups(config.negative_ttl),
        );
        let defaults = registry.get_or_create("default_skins", CacheConfig::default_skins());
        let (updates, _) = broadcast::channel(1024);

        Self {
            inner: Arc::new(Inner {
                records,
                negative,
                defaults,
                invalidated: DashMap::new(),
                flights: SingleFlight::new(),
                lookups: SingleFlight::new(),
                workers: Semaphore::new(config.workers.max(1)),
                store,
                resolver,
                generator,
                sync,
                updates,
                config,
            }),
        }
    }

    /// Get the skin for a player, resolving on miss or expiry.
    ///
    /// Concurrent calls for one key share a single resolution. Never fails:
    /// on resolution failure the last known record or a default is returned
    /// with the error attached.
    pub async fn get(&self, name: &str) -> SkinLookup {
        let key = normalize_key(name);

        if let Some(record) = self.inner.records.get(&key)
            && record.is_fresh()
        {
            debug!("Skin cache hit for {}", key);
            return SkinLookup::ok(record);
        }

        debug!("Skin cache miss for {}", key);
        let inner = Arc::clone(&self.inner);
        let flight_key = key.clone();

        match self
            .inner
            .flights
            .run(key.clone(), move || inner.resolve(flight_key))
            .await
        {
            Ok(lookup) => lookup,
            Err(FlightAborted) => {
                warn!("Resolution for {} was aborted", key);
                let record = match self.inner.records.get(&key) {
                    Some(record) => record,
                    None => SkinRecord::empty_default(&key, self.inner.config.negative_ttl),
                };
                SkinLookup {
                    record,
                    error: Some(SkinError::Aborted),
                }
            }
        }
    }

    /// Install a record for a player (manually set or received).
    ///
    /// Last-write-wins: a record not newer than the current one is
    /// discarded. Accepted records are persisted and broadcast. Returns
    /// whether the record was accepted.
    pub async fn put(&self, name: &str, record: SkinRecord) -> bool {
        let key = normalize_key(name);
        let record = SkinRecord {
            owner_key: key.clone(),
            ..record
        };

        self.inner.forget_failures(&key);
        let (_, accepted) = self.inner.commit(record, None, Origin::Local).await;
        accepted
    }

    /// Apply a record received from a sibling node. Never rebroadcasts.
    pub async fn apply_remote(&self, message: SyncMessage) -> bool {
        let key = message.owner_key;
        self.inner.forget_failures(&key);
        let (_, accepted) = self.inner.commit(message.record, None, Origin::Remote).await;

        if !accepted {
            debug!("Discarded stale remote update for {}", key);
        }
        accepted
    }

    /// Drop the in-memory record so the next `get` resolves again.
    pub fn invalidate(&self, name: &str) {
        let key = normalize_key(name);
        self.inner.records.invalidate(&key);
        self.inner.negative.invalidate(&key);
        self.inner.invalidated.insert(key, ());
    }

    /// Peek at the current in-memory record without resolving.
    pub fn resolved(&self, name: &str) -> Option<SkinRecord> {
        self.inner.records.get(&normalize_key(name))
    }

    /// Every record installed from now on, local or remote.
    pub fn subscribe(&self) -> broadcast::Receiver<SkinRecord> {
        self.inner.updates.subscribe()
    }

    /// Generate a skin from a texture URL and assign it to a player.
    pub async fn set_custom_skin(&self, name: &str, url: &str) -> Result<SkinRecord, SkinError> {
        let key = normalize_key(name);
        let generated = self.inner.generator.generate(url).await?;

        let record = self.inner.set_explicit(&key, generated, SkinSource::Generated).await?;
        info!("Set custom skin for {} from {}", key, url);
        Ok(record)
    }

    /// Give a player the skin of another player.
    pub async fn set_skin_from_player(&self, name: &str, source_name: &str) -> Result<SkinRecord, SkinError> {
        let key = normalize_key(name);
        let source_key = normalize_key(source_name);
        let source = self.inner.resolve_player(&source_key).await?;

        let record = self.inner.set_explicit(&key, source, SkinSource::Manual).await?;
        info!("Set skin of {} from player {}", key, source_key);
        Ok(record)
    }

    /// Replace a player's skin with their default skin.
    pub async fn reset_to_default(&self, name: &str) -> Result<SkinRecord, SkinError> {
        let key = normalize_key(name);
        let default = self.inner.default_for(&key).await;

        let record = self.inner.set_explicit(&key, default, SkinSource::Default).await?;
        info!("Reset skin of {} to default", key);
        Ok(record)
    }

    /// Resolve every configured default skin. Returns how many loaded.
    pub async fn preload_default_skins(&self) -> usize {
        let mut loaded = 0;
        for source in &self.inner.config.default_skins {
            if self.inner.load_default(source).await.is_some() {
                loaded += 1;
            }
        }
        info!(
            "Preloaded {}/{} default skins",
            loaded,
            self.inner.config.default_skins.len()
        );
        loaded
    }

    /// Wait for in-flight resolutions up to `grace`, then abort them.
    pub async fn shutdown(&self, grace: Duration) {
        self.inner.flights.drain(grace).await;
        self.inner.lookups.drain(grace).await;
    }

    /// Number of resolutions currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.flights.active()
    }
}

#[async_trait]
impl SyncHandler for SkinCache {
    async fn handle(&self, message: SyncMessage) {
        self.apply_remote(message).await;
    }
}

impl Inner {
    /// Body of a single flight.
    async fn resolve(self: Arc<Self>, key: String) -> SkinLookup {
        let _permit = self.workers.acquire().await.ok();
        let started_at = Utc::now();
        let forced = self.invalidated.contains_key(&key);

        let last_known = self.last_known(&key).await;
        if !forced
            && let Some(record) = &last_known
            && record.is_fresh()
        {
            debug!("Serving stored record for {}", key);
            return SkinLookup::ok(self.install(record.clone()));
        }

        let outcome = if self.negative.contains(&key) {
            debug!("Negative cache hit for {}", key);
            Err(ResolutionError::NotFound)
        } else {
            self.resolver.resolve(&key).await
        };

        match outcome {
            Ok(record) => {
                self.invalidated.remove(&key);
                let (record, _) = self.commit(record, Some(started_at), Origin::Local).await;
                SkinLookup::ok(record)
            }
            Err(error) => {
                if error == ResolutionError::NotFound {
                    self.negative.insert(key.clone(), ());
                }

                let record = match last_known {
                    Some(record) => self.install(record),
                    None => self
                        .default_for(&key)
                        .await
                        .reassign(&key, SkinSource::Default, self.config.negative_ttl),
                };
                warn!(
                    "Resolution for {} failed ({}), serving {:?} fallback",
                    key, error, record.source
                );

                SkinLookup {
                    record,
                    error: Some(error.into()),
                }
            }
        }
    }

    /// Current record from memory, else from the store.
    async fn last_known(&self, key: &str) -> Option<SkinRecord> {
        if let Some(record) = self.records.get(&key.to_string()) {
            return Some(record);
        }

        match self.store.get(key).await {
            Ok(record) => record,
            Err(e) => {
                warn!("Failed to read stored skin for {}: {:#}", key, e);
                None
            }
        }
    }

    /// Put a record into memory unless memory already has a newer one.
    /// Returns the record held afterwards.
    fn install(&self, record: SkinRecord) -> SkinRecord {
        self.records
            .compute(record.owner_key.clone(), |current| match current {
                Some(existing) if !record.supersedes(existing) => Compute::Keep,
                _ => Compute::Put(record.clone()),
            })
            .unwrap_or(record)
    }

    /// Last-write-wins installation, then persist, notify and broadcast.
    ///
    /// `flight_started` marks a resolution result: anything installed after
    /// the flight began wins over it.
    async fn commit(
        &self,
        record: SkinRecord,
        flight_started: Option<DateTime<Utc>>,
        origin: Origin,
    ) -> (SkinRecord, bool) {
        let key = record.owner_key.clone();

        // evicted from memory: the store is the reference for ordering
        if !self.records.contains(&key)
            && let Ok(Some(stored)) = self.store.get(&key).await
        {
            self.install(stored);
        }

        let mut accepted = false;
        let current = self.records.compute(key.clone(), |current| match current {
            Some(existing) if !record.supersedes(existing) => Compute::Keep,
            Some(existing) if flight_started.is_some_and(|started| existing.resolved_at > started) => {
                Compute::Keep
            }
            _ => {
                accepted = true;
                Compute::Put(record.clone())
            }
        });

        if !accepted {
            return (current.unwrap_or(record), false);
        }

        match self.store.upsert(&record).await {
            Ok(true) => {}
            Ok(false) => debug!("Store already holds a newer skin for {}", key),
            Err(e) => warn!("Failed to persist skin for {}: {:#}", key, e),
        }

        let _ = self.updates.send(record.clone());

        if origin == Origin::Local
            && let Some(sync) = &self.sync
        {
            sync.broadcast(&key, &record);
        }

        debug!("Installed {:?} skin for {}", record.source, key);
        (record, true)
    }

    /// Assign the texture of `source` to `key` as an explicit choice.
    ///
    /// The new record is stamped after whatever the key currently holds, so
    /// it wins even against a record from a node whose clock runs ahead.
    async fn set_explicit(
        &self,
        key: &str,
        source: SkinRecord,
        kind: SkinSource,
    ) -> Result<SkinRecord, SkinError> {
        let mut record = source.reassign(key, kind, self.config.explicit_ttl);
        if let Some(held) = self.last_known(key).await
            && !record.supersedes(&held)
        {
            record = record.with_resolved_at(
                held.resolved_at + ChronoDuration::milliseconds(1),
                self.config.explicit_ttl,
            );
        }

        self.forget_failures(key);
        match self.commit(record, None, Origin::Local).await {
            (record, true) => Ok(record),
            (held, false) => {
                warn!(
                    "Skin for {} was replaced concurrently ({:?} at {})",
                    key, held.source, held.resolved_at
                );
                Err(SkinError::Superseded)
            }
        }
    }

    /// Identity lookup of a player whose skin is copied elsewhere.
    ///
    /// Shares the negative cache and deduplicates concurrent lookups of the
    /// same name.
    async fn resolve_player(&self, key: &str) -> Result<SkinRecord, SkinError> {
        if let Some(record) = self.records.get(&key.to_string())
            && record.is_fresh()
            && record.source == SkinSource::Mojang
        {
            return Ok(record);
        }
        if self.negative.contains(&key.to_string()) {
            debug!("Negative cache hit for {}", key);
            return Err(ResolutionError::NotFound.into());
        }

        let resolver = Arc::clone(&self.resolver);
        let name = key.to_string();
        let result = self
            .lookups
            .run(key.to_string(), move || async move { resolver.resolve(&name).await })
            .await
            .map_err(|_| SkinError::Aborted)?;

        if result == Err(ResolutionError::NotFound) {
            self.negative.insert(key.to_string(), ());
        }
        result.map_err(SkinError::from)
    }

    fn forget_failures(&self, key: &str) {
        self.negative.invalidate(&key.to_string());
        self.invalidated.remove(key);
    }

    /// The default skin assigned to a key.
    ///
    /// Keys map onto the configured defaults by hash so a player keeps the
    /// same default; if that one cannot be resolved the others are tried in
    /// order, then the built-in empty skin.
    async fn default_for(&self, key: &str) -> SkinRecord {
        let sources = &self.config.default_skins;
        if sources.is_empty() {
            return SkinRecord::empty_default(key, self.config.negative_ttl);
        }

        let start = default_index(key, sources.len());
        for offset in 0..sources.len() {
            let source = &sources[(start + offset) % sources.len()];
            if let Some(record) = self.load_default(source).await {
                return record;
            }
        }

        SkinRecord::empty_default(key, self.config.negative_ttl)
    }

    /// Resolve one configured default skin source, memoized.
    async fn load_default(&self, source: &str) -> Option<SkinRecord> {
        if let Some(record) = self.defaults.get(&source.to_string()) {
            return Some(record);
        }

        let result = if looks_like_url(source) {
            self.generator.generate(source).await.map_err(SkinError::from)
        } else {
            self.resolver.resolve(source).await.map_err(SkinError::from)
        };

        match result {
            Ok(record) => {
                self.defaults.insert(source.to_string(), record.clone());
                Some(record)
            }
            Err(e) => {
                warn!("Default skin {} unavailable: {}", source, e);
                None
            }
        }
    }
}

/// Position of a key's default among `count` configured defaults.
///
/// Derived from SHA-256 so every node and every build agrees.
fn default_index(key: &str, count: usize) -> usize {
    let digest = Sha256::digest(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % count as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemorySkinStore;
    use crate::generator::{GeneratorConfig, JobStatus};
    use crate::resolver::ResolverConfig;
    use crate::skins::Texture;
    use crate::testing::{DelayedStore, FakeGeneratorApi, FakeIdentityApi};

    struct Harness {
        cache: SkinCache,
        identity: Arc<FakeIdentityApi>,
        generator: Arc<FakeGeneratorApi>,
        store: Arc<MemorySkinStore>,
    }

    fn harness(identity: FakeIdentityApi, generator: FakeGeneratorApi, config: SkinCacheConfig) -> Harness {
        let identity = Arc::new(identity);
        let generator = Arc::new(generator);
        let store = Arc::new(MemorySkinStore::new());

        let cache = SkinCache::new(
            &CacheRegistry::new(),
            store.clone(),
            Arc::new(IdentityResolver::new(identity.clone(), ResolverConfig::default())),
            Arc::new(SkinGenerator::new(generator.clone(), GeneratorConfig::default())),
            None,
            config,
        );

        Harness {
            cache,
            identity,
            generator,
            store,
        }
    }

    fn stale(name: &str, value: &str) -> SkinRecord {
        SkinRecord::resolved_at(
            name,
            value,
            "sig",
            SkinSource::Mojang,
            Utc::now() - ChronoDuration::hours(2),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn test_concurrent_cold_gets_resolve_once() {
        let h = harness(
            FakeIdentityApi::new()
                .with_player("alice")
                .with_delay(Duration::from_millis(50)),
            FakeGeneratorApi::new(),
            SkinCacheConfig::default(),
        );

        let mut handles = Vec::new();
        for name in ["alice", "Alice", "ALICE", " alice "].into_iter().cycle().take(32) {
            let cache = h.cache.clone();
            handles.push(tokio::spawn(async move { cache.get(name).await }));
        }

        for handle in handles {
            let lookup = handle.await.unwrap();
            assert!(!lookup.is_degraded());
            assert_eq!(lookup.record.texture_value, "texture-alice");
        }
        assert_eq!(h.identity.uuid_calls(), 1);
        assert_eq!(h.cache.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_fresh_hit_does_no_io() {
        let h = harness(
            FakeIdentityApi::new().with_player("alice"),
            FakeGeneratorApi::new(),
            SkinCacheConfig::default(),
        );

        h.cache.get("alice").await;
        h.cache.get("alice").await;
        h.cache.get("Alice").await;

        assert_eq!(h.identity.uuid_calls(), 1);
        assert_eq!(h.store.get("alice").await.unwrap().unwrap().source, SkinSource::Mojang);
    }

    #[tokio::test]
    async fn test_expired_record_is_resolved_again() {
        let h = harness(
            FakeIdentityApi::new().with_player("alice"),
            FakeGeneratorApi::new(),
            SkinCacheConfig::default(),
        );
        assert!(h.cache.put("alice", stale("alice", "old")).await);

        let lookup = h.cache.get("alice").await;

        assert_eq!(lookup.record.texture_value, "texture-alice");
        assert_eq!(h.identity.uuid_calls(), 1);
    }

    #[tokio::test]
    async fn test_fresh_stored_record_skips_upstream() {
        let h = harness(
            FakeIdentityApi::new().with_player("alice"),
            FakeGeneratorApi::new(),
            SkinCacheConfig::default(),
        );
        let stored = SkinRecord::new("alice", "stored", "sig", SkinSource::Mojang, Duration::from_secs(60));
        h.store.upsert(&stored).await.unwrap();

        let lookup = h.cache.get("alice").await;

        assert_eq!(lookup.record, stored);
        assert_eq!(h.identity.uuid_calls(), 0);
        assert_eq!(h.cache.resolved("alice"), Some(stored));
    }

    #[tokio::test]
    async fn test_older_put_is_ignored() {
        let h = harness(FakeIdentityApi::new(), FakeGeneratorApi::new(), SkinCacheConfig::default());
        let now = Utc::now();
        let newer = SkinRecord::resolved_at("alice", "new", "s", SkinSource::Manual, now, Duration::from_secs(60));
        let older = SkinRecord::resolved_at(
            "alice",
            "old",
            "s",
            SkinSource::Manual,
            now - ChronoDuration::seconds(10),
            Duration::from_secs(60),
        );

        assert!(h.cache.put("alice", newer.clone()).await);
        assert!(!h.cache.put("alice", older).await);
        assert!(!h.cache.put("alice", newer.clone()).await);

        assert_eq!(h.cache.resolved("alice"), Some(newer.clone()));
        assert_eq!(h.store.get("alice").await.unwrap(), Some(newer));
    }

    #[tokio::test]
    async fn test_not_found_serves_default() {
        let h = harness(FakeIdentityApi::new(), FakeGeneratorApi::new(), SkinCacheConfig::default());

        let lookup = h.cache.get("ghost").await;

        assert_eq!(lookup.record.source, SkinSource::Default);
        assert_eq!(lookup.record.owner_key, "ghost");
        assert_eq!(
            lookup.error,
            Some(SkinError::Resolution(ResolutionError::NotFound))
        );

        // remembered briefly: no second upstream call
        let again = h.cache.get("ghost").await;
        assert_eq!(again.record.source, SkinSource::Default);
        assert_eq!(h.identity.uuid_calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_serves_last_known() {
        let h = harness(
            FakeIdentityApi::new().with_player("alice").with_failures([
                ResolutionError::Transport("down".into()),
                ResolutionError::Transport("down".into()),
                ResolutionError::Transport("down".into()),
            ]),
            FakeGeneratorApi::new(),
            SkinCacheConfig::default(),
        );
        let old = stale("alice", "old");
        h.store.upsert(&old).await.unwrap();

        let lookup = h.cache.get("alice").await;

        assert_eq!(lookup.record, old);
        assert!(matches!(
            lookup.error,
            Some(SkinError::Resolution(ResolutionError::Transport(_)))
        ));
    }

    #[tokio::test]
    async fn test_put_during_flight_wins() {
        let h = harness(
            FakeIdentityApi::new()
                .with_player("alice")
                .with_delay(Duration::from_millis(100)),
            FakeGeneratorApi::new(),
            SkinCacheConfig::default(),
        );

        let pending = {
            let cache = h.cache.clone();
            tokio::spawn(async move { cache.get("alice").await })
        };
        while h.identity.uuid_calls() == 0 {
            tokio::task::yield_now().await;
        }

        let manual = SkinRecord::new("alice", "manual", "s", SkinSource::Manual, Duration::from_secs(60));
        assert!(h.cache.put("alice", manual.clone()).await);

        let lookup = pending.await.unwrap();
        assert_eq!(lookup.record, manual);
        assert_eq!(h.cache.resolved("alice"), Some(manual));
    }

    #[tokio::test]
    async fn test_invalidate_forces_resolution() {
        let h = harness(
            FakeIdentityApi::new().with_player("alice"),
            FakeGeneratorApi::new(),
            SkinCacheConfig::default(),
        );
        h.cache.get("alice").await;

        h.cache.invalidate("alice");
        assert_eq!(h.cache.resolved("alice"), None);
        h.cache.get("alice").await;

        assert_eq!(h.identity.uuid_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_skin_from_url() {
        let h = harness(
            FakeIdentityApi::new(),
            FakeGeneratorApi::new().with_script([
                JobStatus::Pending,
                JobStatus::Ready(Texture {
                    value: "custom".into(),
                    signature: "sig".into(),
                }),
            ]),
            SkinCacheConfig::default(),
        );
        let mut updates = h.cache.subscribe();

        let record = h
            .cache
            .set_custom_skin("Bob", "https://textures.example.com/bob.png")
            .await
            .unwrap();

        assert_eq!(record.owner_key, "bob");
        assert_eq!(record.source, SkinSource::Generated);
        assert_eq!(h.generator.polls(), 2);
        assert_eq!(h.cache.get("bob").await.record, record);
        assert_eq!(updates.recv().await.unwrap(), record);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_skin_errors_surface() {
        let h = harness(FakeIdentityApi::new(), FakeGeneratorApi::new(), SkinCacheConfig::default());

        let err = h.cache.set_custom_skin("bob", "not a url").await.unwrap_err();

        assert!(matches!(err, SkinError::Generation(_)));
        assert_eq!(h.cache.resolved("bob"), None);
    }

    #[tokio::test]
    async fn test_skin_from_other_player() {
        let h = harness(
            FakeIdentityApi::new().with_player("notch"),
            FakeGeneratorApi::new(),
            SkinCacheConfig::default(),
        );

        let record = h.cache.set_skin_from_player("alice", "Notch").await.unwrap();
        assert_eq!(record.owner_key, "alice");
        assert_eq!(record.source, SkinSource::Manual);
        assert_eq!(record.texture_value, "texture-notch");

        let err = h.cache.set_skin_from_player("alice", "ghost").await.unwrap_err();
        assert_eq!(err, SkinError::Resolution(ResolutionError::NotFound));
        assert_eq!(h.cache.resolved("alice"), Some(record));
    }

    #[tokio::test]
    async fn test_reset_and_configured_defaults() {
        let h = harness(
            FakeIdentityApi::new().with_player("steve"),
            FakeGeneratorApi::new(),
            SkinCacheConfig {
                default_skins: vec!["Steve".into()],
                ..Default::default()
            },
        );
        assert_eq!(h.cache.preload_default_skins().await, 1);

        let record = h.cache.reset_to_default("alice").await.unwrap();
        assert_eq!(record.source, SkinSource::Default);
        assert_eq!(record.texture_value, "texture-steve");
        assert!(record.is_fresh());
        assert_eq!(h.store.get("alice").await.unwrap(), Some(record));

        let fallback = h.cache.get("ghost").await;
        assert_eq!(fallback.record.texture_value, "texture-steve");
        // steve once, ghost once
        assert_eq!(h.identity.uuid_calls(), 2);
    }

    #[tokio::test]
    async fn test_empty_default_without_configured_skins() {
        let h = harness(FakeIdentityApi::new(), FakeGeneratorApi::new(), SkinCacheConfig::default());

        let record = h.cache.reset_to_default("alice").await.unwrap();

        assert!(record.is_empty());
        assert_eq!(record.source, SkinSource::Default);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_older_write_does_not_overwrite_store() {
        let memory = Arc::new(MemorySkinStore::new());
        let store = Arc::new(DelayedStore::new(memory.clone(), "old", Duration::from_millis(100)));
        let identity = Arc::new(FakeIdentityApi::new().with_player("alice"));
        let cache = SkinCache::new(
            &CacheRegistry::new(),
            store.clone(),
            Arc::new(IdentityResolver::new(identity.clone(), ResolverConfig::default())),
            Arc::new(SkinGenerator::new(Arc::new(FakeGeneratorApi::new()), GeneratorConfig::default())),
            None,
            SkinCacheConfig::default(),
        );

        let now = Utc::now();
        let old = SkinRecord::resolved_at("alice", "old", "s", SkinSource::Manual, now, Duration::from_secs(60));
        let new = SkinRecord::resolved_at(
            "alice",
            "new",
            "s",
            SkinSource::Manual,
            now + ChronoDuration::seconds(1),
            Duration::from_secs(60),
        );

        let pending = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.put("alice", old).await })
        };
        while !store.stalled() {
            tokio::task::yield_now().await;
        }
        assert!(cache.put("alice", new.clone()).await);
        assert!(pending.await.unwrap());

        assert_eq!(memory.get("alice").await.unwrap(), Some(new.clone()));

        // evicted from memory: the store answers
        cache.inner.records.invalidate(&"alice".to_string());
        assert_eq!(cache.get("alice").await.record, new);
        assert_eq!(identity.uuid_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_set_wins_over_record_from_the_future() {
        let h = harness(FakeIdentityApi::new(), FakeGeneratorApi::new(), SkinCacheConfig::default());
        let ahead = SkinRecord::resolved_at(
            "bob",
            "remote",
            "s",
            SkinSource::Manual,
            Utc::now() + ChronoDuration::minutes(5),
            Duration::from_secs(3600),
        );
        assert!(h.cache.apply_remote(SyncMessage::new("bob", ahead.clone(), "node-b")).await);

        let record = h
            .cache
            .set_custom_skin("bob", "https://textures.example.com/bob.png")
            .await
            .unwrap();

        assert_eq!(record.texture_value, "generated");
        assert!(record.resolved_at > ahead.resolved_at);
        assert_eq!(h.cache.resolved("bob"), Some(record.clone()));
        assert_eq!(h.store.get("bob").await.unwrap(), Some(record));
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_pool_bounds_resolutions() {
        let h = harness(
            FakeIdentityApi::new()
                .with_player("alice")
                .with_player("bob")
                .with_delay(Duration::from_millis(50)),
            FakeGeneratorApi::new(),
            SkinCacheConfig {
                workers: 1,
                ..Default::default()
            },
        );

        let (alice, bob) = tokio::join!(h.cache.get("alice"), h.cache.get("bob"));
        assert!(!alice.is_degraded());
        assert!(!bob.is_degraded());

        // uuid then textures for the first key before anything for the second
        let times = h.identity.call_times();
        assert_eq!(times.len(), 4);
        assert!(times[2] - times[0] >= Duration::from_millis(100));
        let names = h.identity.uuid_names();
        assert_eq!(names.len(), 2);
        assert_ne!(names[0], names[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skin_from_player_shares_lookups() {
        let h = harness(
            FakeIdentityApi::new()
                .with_player("notch")
                .with_delay(Duration::from_millis(50)),
            FakeGeneratorApi::new(),
            SkinCacheConfig::default(),
        );

        let mut handles = Vec::new();
        for target in ["alice", "bob", "carol"] {
            let cache = h.cache.clone();
            handles.push(tokio::spawn(async move { cache.set_skin_from_player(target, "Notch").await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().texture_value, "texture-notch");
        }
        assert_eq!(h.identity.uuid_calls(), 1);

        for _ in 0..2 {
            let err = h.cache.set_skin_from_player("alice", "ghost").await.unwrap_err();
            assert_eq!(err, SkinError::Resolution(ResolutionError::NotFound));
        }
        // ghost asked upstream once, then remembered
        assert_eq!(h.identity.uuid_calls(), 2);
    }

    #[test]
    fn test_default_index_is_stable() {
        assert_eq!(default_index("alice", 3), 2);
        assert_eq!(default_index("alice", 2), 1);
        assert_eq!(default_index("alice", 5), 2);
        assert_eq!(default_index("bob", 3), 2);
        assert_eq!(default_index("bob", 2), 0);
        assert_eq!(default_index("bob", 5), 0);
        assert_eq!(default_index("steve", 3), 0);
        assert_eq!(default_index("steve", 5), 3);
        assert_eq!(default_index("steve", 1), 0);
    }
}
