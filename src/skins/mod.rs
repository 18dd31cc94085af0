//! Skin resolution core.
//!
//! - `record` - `SkinRecord` and friends
//! - `cache` - `SkinCache`, the single-flight TTL cache over the store
//! - `flight` - generic single-flight primitive
//! - `error` - error taxonomy

mod cache;
mod error;
pub mod flight;
mod record;

pub use cache::{SkinCache, SkinCacheConfig, SkinLookup};
pub use error::{GenerationError, ResolutionError, SkinError};
pub use flight::{FlightAborted, SingleFlight};
pub use record::{SkinRecord, SkinSource, Texture, normalize_key};
