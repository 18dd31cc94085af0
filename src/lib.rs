//! skinsync - skin resolution and cluster-wide skin cache for proxy nodes.
//!
//! ## Architecture
//!
//! - `config` - Environment configuration
//! - `cache` - Typed caches with Moka
//! - `database` - Skin store (MongoDB or in-memory)
//! - `skins` - Skin records, single-flight and the skin cache
//! - `resolver` - Mojang identity resolution behind a rate gate
//! - `generator` - Custom skins from texture URLs via MineSkin
//! - `sync` - Propagation of skin changes between nodes
//! - `applier` - Hand-off to the host platform
//! - `context` - Service wiring

pub mod applier;
pub mod cache;
pub mod config;
pub mod context;
pub mod database;
pub mod generator;
pub mod resolver;
pub mod skins;
pub mod sync;

#[cfg(test)]
mod testing;
