//! Persistent skin storage.
//!
//! - `store` - `SkinStore` trait and the in-memory store
//! - `mongo` - MongoDB connection
//! - `skin_repository` - MongoDB-backed `SkinStore`

mod mongo;
mod skin_repository;
mod store;

pub use mongo::Database;
pub use skin_repository::{MongoSkinStore, StoredSkin};
pub use store::{MemorySkinStore, SkinStore};
