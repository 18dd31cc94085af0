//! Typed cache wrapper around Moka.

use std::hash::Hash;
use std::sync::Arc;

use moka::ops::compute::Op;
use moka::sync::Cache;

use super::CacheConfig;

/// Outcome of a per-key [`TypedCache::compute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compute<V> {
    /// Store the value.
    Put(V),
    /// Leave the entry as it is.
    Keep,
    /// Drop the entry.
    Remove,
}

/// A typed cache wrapper that provides a clean API over Moka.
///
/// This cache is:
/// - Thread-safe (uses Arc internally)
/// - Bounded by capacity with optional TTL/TTI
/// - Clone-friendly (cloning is cheap, shares the same underlying cache)
pub struct TypedCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    inner: Arc<Cache<K, V>>,
    name: Arc<str>,
}

// Manual Clone implementation that doesn't require K: Clone, V: Clone
impl<K, V> Clone for TypedCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            name: Arc::clone(&self.name),
        }
    }
}

impl<K, V> TypedCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a new typed cache with the given name and config.
    pub fn new(name: impl Into<Arc<str>>, config: CacheConfig) -> Self {
        let mut builder = Cache::builder().max_capacity(config.max_capacity);

        if let Some(ttl) = config.ttl {
            builder = builder.time_to_live(ttl);
        }

        if let Some(tti) = config.tti {
            builder = builder.time_to_idle(tti);
        }

        Self {
            inner: Arc::new(builder.build()),
            name: name.into(),
        }
    }

    /// Insert a key-value pair into the cache.
    pub fn insert(&self, key: K, value: V) {
        self.inner.insert(key, value);
    }

    /// Get a value from the cache.
    ///
    /// Returns `Some(value)` if the key exists and hasn't been evicted.
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.get(key)
    }

    /// Check if a key exists in the cache.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    /// Remove a key from the cache.
    pub fn invalidate(&self, key: &K) {
        self.inner.invalidate(key);
    }

    /// Atomically decide the new state of a single entry.
    ///
    /// `f` sees the current value and runs inside the entry's critical
    /// section; other keys are unaffected. Returns the value held after
    /// the operation.
    pub fn compute<F>(&self, key: K, f: F) -> Option<V>
    where
        F: FnOnce(Option<&V>) -> Compute<V>,
        K: Clone,
    {
        let mut after = None;

        self.inner.entry(key).and_compute_with(|current| {
            let current = current.map(|entry| entry.into_value());
            match f(current.as_ref()) {
                Compute::Put(value) => {
                    after = Some(value.clone());
                    Op::Put(value)
                }
                Compute::Keep => {
                    after = current;
                    Op::Nop
                }
                Compute::Remove => Op::Remove,
            }
        });

        after
    }

    /// Get the number of entries in the cache.
    ///
    /// Note: This may not be perfectly accurate due to concurrent operations.
    pub fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }
}

impl<K, V> std::fmt::Debug for TypedCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedCache")
            .field("name", &self.name)
            .field("entry_count", &self.inner.entry_count())
            .finish()
    }
}
