//! Error taxonomy for skin resolution.

use thiserror::Error;

/// Failure of the identity service lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    /// No such player upstream. Terminal.
    #[error("player not found")]
    NotFound,

    /// Upstream kept rate limiting until the time budget ran out.
    #[error("rate limited by identity service")]
    RateLimited,

    /// Network failure, timeout or malformed response.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Failure of the texture generation service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("invalid skin source: {0}")]
    InvalidSource(String),

    #[error("skin generation timed out")]
    Timeout,

    #[error("generation service error: {0}")]
    Service(String),
}

/// Errors surfaced to callers of explicit skin-set operations, and reported
/// as soft errors on degraded lookups.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkinError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// The resolution task was aborted (panic or shutdown).
    #[error("resolution aborted")]
    Aborted,

    /// A newer record for the player was installed while setting this one.
    #[error("a newer skin is already set")]
    Superseded,
}
