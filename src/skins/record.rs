//! Skin record model.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where a skin record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkinSource {
    /// Resolved from the identity service by player name.
    Mojang,
    /// Produced by the texture generation service from a URL.
    Generated,
    /// Fallback skin.
    Default,
    /// Explicitly set by a player or an operator.
    Manual,
}

/// A signed texture property as returned by the upstream services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Texture {
    pub value: String,
    pub signature: String,
}

/// A resolved, signed texture payload plus provenance and timing metadata.
///
/// Records are never mutated after construction; a re-resolution replaces
/// the whole value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkinRecord {
    /// Case-normalized player name.
    pub owner_key: String,
    /// Base64 texture property value, passed through opaquely.
    pub texture_value: String,
    /// Base64 signature over `texture_value`.
    pub signature: String,
    pub source: SkinSource,
    pub resolved_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Normalize a player name into a cache key.
pub fn normalize_key(name: &str) -> String {
    name.trim().to_lowercase()
}

impl SkinRecord {
    /// Build a record resolved now and valid for `ttl`.
    pub fn new(
        owner_key: &str,
        texture_value: impl Into<String>,
        signature: impl Into<String>,
        source: SkinSource,
        ttl: Duration,
    ) -> Self {
        Self::resolved_at(owner_key, texture_value, signature, source, Utc::now(), ttl)
    }

    /// Build a record with an explicit resolution time.
    pub fn resolved_at(
        owner_key: &str,
        texture_value: impl Into<String>,
        signature: impl Into<String>,
        source: SkinSource,
        resolved_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        let ttl = ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::MAX);
        let expires_at = resolved_at.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            owner_key: normalize_key(owner_key),
            texture_value: texture_value.into(),
            signature: signature.into(),
            source,
            resolved_at,
            expires_at,
        }
    }

    /// Build a record from an upstream texture.
    pub fn from_texture(owner_key: &str, texture: Texture, source: SkinSource, ttl: Duration) -> Self {
        Self::new(owner_key, texture.value, texture.signature, source, ttl)
    }

    /// The built-in default: an empty texture, which makes clients fall back
    /// to their stock skin.
    pub fn empty_default(owner_key: &str, ttl: Duration) -> Self {
        Self::new(owner_key, "", "", SkinSource::Default, ttl)
    }

    /// Copy the texture of `self` onto another owner under a new source.
    ///
    /// The copy is stamped with a fresh `resolved_at`.
    pub fn reassign(&self, owner_key: &str, source: SkinSource, ttl: Duration) -> Self {
        Self::new(
            owner_key,
            self.texture_value.clone(),
            self.signature.clone(),
            source,
            ttl,
        )
    }

    /// The same texture stamped with another resolution time.
    pub fn with_resolved_at(&self, resolved_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self::resolved_at(
            &self.owner_key,
            self.texture_value.clone(),
            self.signature.clone(),
            self.source,
            resolved_at,
            ttl,
        )
    }

    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Utc::now())
    }

    /// Last-write-wins: whether `self` should replace `other`.
    pub fn supersedes(&self, other: &SkinRecord) -> bool {
        self.resolved_at > other.resolved_at
    }

    /// Whether this record carries no texture (the built-in default).
    pub fn is_empty(&self) -> bool {
        self.texture_value.is_empty()
    }
}
