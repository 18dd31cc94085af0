//! Cache module - Modular caching system using Moka.
//!
//! ## Architecture
//!
//! - `CacheRegistry` - Central registry holding all named caches
//! - `TypedCache` - Typed wrapper with a per-key compute for atomic updates
//! - `CacheConfig` - Capacity and expiry presets
//!
//! ## Usage
//!
//! ```rust,ignore
//! let records = registry.get_or_create::<String, SkinRecord>(
//!     "skin_records",
//!     CacheConfig::skin_records(),
//! );
//!
//! records.insert(owner_key, record);
//! let record = records.get(&owner_key);
//! ```

mod config;
mod registry;
mod typed;

pub use config::CacheConfig;
pub use registry::CacheRegistry;
pub use typed::{Compute, TypedCache};
