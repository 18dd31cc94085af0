//! Identity resolver: player name to signed skin record.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use super::mojang::IdentityApi;
use super::ratelimit::{RateGate, RateGateConfig, Ticket};
use crate::skins::{ResolutionError, SkinRecord, SkinSource};

/// Identity resolver settings.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub rate: RateGateConfig,
    /// Retries after a transport failure, per lookup step.
    pub max_retries: u32,
    /// Base delay between transport retries; jitter is added on top.
    pub retry_delay: Duration,
    /// Wall-clock budget for one whole resolution, queueing included.
    pub timeout: Duration,
    /// Freshness of resolved records.
    pub skin_ttl: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            rate: RateGateConfig::default(),
            max_retries: 2,
            retry_delay: Duration::from_millis(250),
            timeout: Duration::from_secs(10),
            skin_ttl: Duration::from_secs(3600),
        }
    }
}

/// Valid player names are 1-16 chars of `[A-Za-z0-9_]`.
pub fn is_valid_player_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 16
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Resolves player names through the identity service.
///
/// Both lookup steps share one [`RateGate`].
pub struct IdentityResolver {
    api: Arc<dyn IdentityApi>,
    gate: RateGate,
    config: ResolverConfig,
}

impl IdentityResolver {
    pub fn new(api: Arc<dyn IdentityApi>, config: ResolverConfig) -> Self {
        Self {
            api,
            gate: RateGate::new(config.rate.clone()),
            config,
        }
    }

    pub fn gate(&self) -> &RateGate {
        &self.gate
    }

    /// Resolve a player name into a `MOJANG` record.
    ///
    /// Rate limiting is absorbed by queueing; it is only reported when the
    /// time budget runs out while still backing off.
    pub async fn resolve(&self, player_name: &str) -> Result<SkinRecord, ResolutionError> {
        let name = player_name.trim();
        if !is_valid_player_name(name) {
            debug!("Rejecting invalid player name {:?}", name);
            return Err(ResolutionError::NotFound);
        }

        let limited = AtomicBool::new(false);
        match tokio::time::timeout(self.config.timeout, self.resolve_steps(name, &limited)).await {
            Ok(result) => result,
            Err(_) if limited.load(Ordering::Relaxed) => {
                warn!("Resolution of {} ran out of time while rate limited", name);
                Err(ResolutionError::RateLimited)
            }
            Err(_) => {
                warn!("Resolution of {} timed out after {:?}", name, self.config.timeout);
                Err(ResolutionError::Transport("resolution timed out".into()))
            }
        }
    }

    async fn resolve_steps(&self, name: &str, limited: &AtomicBool) -> Result<SkinRecord, ResolutionError> {
        let uuid = self.call(|| self.api.lookup_uuid(name), limited).await?;
        let texture = self.call(|| self.api.lookup_textures(&uuid), limited).await?;

        debug!("Resolved {} -> {}", name, uuid);
        Ok(SkinRecord::from_texture(
            name,
            texture,
            SkinSource::Mojang,
            self.config.skin_ttl,
        ))
    }

    /// One lookup step behind the gate, with rate-limit requeueing and
    /// bounded transport retries.
    async fn call<T, F, Fut>(&self, step: F, limited: &AtomicBool) -> Result<T, ResolutionError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ResolutionError>>,
    {
        let mut failures = 0;
        let mut requeue: Option<Ticket> = None;

        loop {
            let ticket = match requeue.take() {
                Some(ticket) => {
                    self.gate.reacquire(ticket).await;
                    ticket
                }
                None => self.gate.acquire().await,
            };

            match step().await {
                Ok(value) => {
                    self.gate.relax();
                    return Ok(value);
                }
                Err(ResolutionError::RateLimited) => {
                    limited.store(true, Ordering::Relaxed);
                    self.gate.trip();
                    requeue = Some(ticket);
                }
                Err(ResolutionError::NotFound) => {
                    self.gate.relax();
                    return Err(ResolutionError::NotFound);
                }
                Err(ResolutionError::Transport(reason)) => {
                    failures += 1;
                    if failures > self.config.max_retries {
                        warn!("Giving up after {} transport failures: {}", failures, reason);
                        return Err(ResolutionError::Transport(reason));
                    }
                    let delay = jittered(self.config.retry_delay, failures);
                    debug!("Transport failure ({}), retrying in {:?}", reason, delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

fn jittered(base: Duration, attempt: u32) -> Duration {
    let jitter_ms = rand::rng().random_range(0..=base.as_millis() as u64);
    base * attempt + Duration::from_millis(jitter_ms)
}
