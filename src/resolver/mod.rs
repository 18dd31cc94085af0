//! Identity resolution against the Mojang services.
//!
//! - `mojang` - HTTP client and the `IdentityApi` seam
//! - `ratelimit` - FIFO rate gate with exponential backoff
//! - `identity` - `IdentityResolver`, retries and time budget

mod identity;
pub mod mojang;
mod ratelimit;

pub use identity::{IdentityResolver, ResolverConfig, is_valid_player_name};
pub use mojang::{IdentityApi, MojangClient};
pub use ratelimit::{RateGate, RateGateConfig, Ticket};
