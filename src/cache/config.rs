//! Cache configuration.

use std::time::Duration;

/// Configuration for a cache instance.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries in the cache.
    pub max_capacity: u64,

    /// Time-to-live for cache entries.
    /// After this duration, entries are automatically evicted.
    pub ttl: Option<Duration>,

    /// Time-to-idle for cache entries.
    /// Entries are evicted if not accessed within this duration.
    pub tti: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
            ttl: Some(Duration::from_secs(300)), // 5 minutes
            tti: None,
        }
    }
}

impl CacheConfig {
    /// Config for resolved skin records.
    ///
    /// Freshness is decided by each record's own `expires_at`, so there is
    /// no TTL here; stale records must stay around as fallbacks. Idle
    /// entries are dropped to bound memory, the store still has them.
    pub fn skin_records() -> Self {
        Self {
            max_capacity: 50_000,
            ttl: None,
            tti: Some(Duration::from_secs(6 * 3600)), // 6 hours idle
        }
    }

    /// Config for remembering names the identity service does not know.
    pub fn negative_lookups(ttl: Duration) -> Self {
        Self {
            max_capacity: 10_000,
            ttl: Some(ttl),
            tti: None,
        }
    }

    /// Config for resolved default skins, keyed by their source.
    pub fn default_skins() -> Self {
        Self {
            max_capacity: 64,
            ttl: None,
            tti: None,
        }
    }
}
