//! Cache registry - Central management for all caches.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use super::{CacheConfig, TypedCache};

/// Central registry for managing multiple typed caches.
///
/// Components create and access their caches by name, so two components
/// asking for `"skin_records"` share the same underlying cache.
///
/// ## Example
///
/// ```rust,ignore
/// let registry = CacheRegistry::new();
/// let records: TypedCache<String, SkinRecord> =
///     registry.get_or_create("skin_records", CacheConfig::skin_records());
/// ```
#[derive(Clone)]
pub struct CacheRegistry {
    caches: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

/// Internal cache entry storing type-erased cache.
struct CacheEntry {
    cache: Box<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl CacheRegistry {
    /// Create a new empty cache registry.
    pub fn new() -> Self {
        info!("Cache registry initialized");
        Self {
            caches: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get an existing cache by name.
    ///
    /// # Panics
    /// Panics if the cache exists but with different types.
    pub fn get<K, V>(&self, name: &str) -> Option<TypedCache<K, V>>
    where
        K: Hash + Eq + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let caches = self.caches.read();
        caches.get(name).map(|entry| Self::downcast(name, entry))
    }

    /// Get an existing cache or create a new one if it doesn't exist.
    ///
    /// # Panics
    /// Panics if a cache with the same name but different types already exists.
    pub fn get_or_create<K, V>(&self, name: &str, config: CacheConfig) -> TypedCache<K, V>
    where
        K: Hash + Eq + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let mut caches = self.caches.write();

        if let Some(existing) = caches.get(name) {
            return Self::downcast(name, existing);
        }

        debug!("Creating cache: {}", name);
        let cache = TypedCache::new(name, config);
        caches.insert(
            name.to_string(),
            CacheEntry {
                cache: Box::new(cache.clone()),
                type_name: std::any::type_name::<TypedCache<K, V>>(),
            },
        );

        cache
    }

    /// Get a list of all registered cache names.
    pub fn cache_names(&self) -> Vec<String> {
        self.caches.read().keys().cloned().collect()
    }

    fn downcast<K, V>(name: &str, entry: &CacheEntry) -> TypedCache<K, V>
    where
        K: Hash + Eq + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        match entry.cache.downcast_ref::<TypedCache<K, V>>() {
            Some(cache) => cache.clone(),
            None => panic!(
                "Cache '{}' type mismatch: expected {}, got {} ({:?})",
                name,
                std::any::type_name::<TypedCache<K, V>>(),
                entry.type_name,
                TypeId::of::<TypedCache<K, V>>(),
            ),
        }
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let caches = self.caches.read();
        f.debug_struct("CacheRegistry")
            .field("cache_count", &caches.len())
            .field("cache_names", &caches.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_name_shares_cache() {
        let registry = CacheRegistry::new();
        let a: TypedCache<String, u32> = registry.get_or_create("shared", CacheConfig::default());
        let b: TypedCache<String, u32> = registry.get_or_create("shared", CacheConfig::default());

        a.insert("k".into(), 1);
        assert_eq!(b.get(&"k".to_string()), Some(1));
        assert_eq!(registry.cache_names(), vec!["shared".to_string()]);
    }

    #[test]
    #[should_panic(expected = "type mismatch")]
    fn test_type_mismatch_panics() {
        let registry = CacheRegistry::new();
        let _: TypedCache<String, u32> = registry.get_or_create("c", CacheConfig::default());
        let _: Option<TypedCache<String, String>> = registry.get("c");
    }
}
