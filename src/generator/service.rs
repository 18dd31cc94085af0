//! Skin generator: texture URL to signed skin record.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use url::Url;

use super::mineskin::{GeneratorApi, JobStatus};
use crate::skins::{GenerationError, SingleFlight, SkinRecord, SkinSource, Texture};

/// Skin generator settings.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Delay before each poll of a submitted job.
    pub poll_interval: Duration,
    /// Wall-clock budget from submission to a ready texture.
    pub timeout: Duration,
    /// Freshness of generated records.
    pub skin_ttl: Duration,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(60),
            skin_ttl: Duration::from_secs(365 * 24 * 3600),
        }
    }
}

/// Validate and canonicalize a texture source URL.
pub fn normalize_source(source: &str) -> Result<String, GenerationError> {
    let trimmed = source.trim();
    let url = Url::parse(trimmed)
        .map_err(|e| GenerationError::InvalidSource(format!("{trimmed}: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(GenerationError::InvalidSource(format!(
            "{trimmed}: expected an http(s) URL"
        )));
    }

    Ok(url.to_string())
}

/// Whether a configured skin source is a URL rather than a player name.
pub fn looks_like_url(source: &str) -> bool {
    let source = source.trim_start();
    source.starts_with("http://") || source.starts_with("https://")
}

/// Generates skins through the asynchronous generation service.
///
/// Concurrent requests for the same normalized source share one job.
pub struct SkinGenerator {
    api: Arc<dyn GeneratorApi>,
    flights: SingleFlight<String, Result<Texture, GenerationError>>,
    config: GeneratorConfig,
}

impl SkinGenerator {
    pub fn new(api: Arc<dyn GeneratorApi>, config: GeneratorConfig) -> Self {
        Self {
            api,
            flights: SingleFlight::new(),
            config,
        }
    }

    /// Generate a `GENERATED` record for a texture URL.
    ///
    /// The record is keyed by the normalized source; callers reassign it to
    /// the player it is meant for.
    pub async fn generate(&self, source: &str) -> Result<SkinRecord, GenerationError> {
        let source = normalize_source(source)?;
        let api = Arc::clone(&self.api);
        let config = self.config.clone();
        let job_source = source.clone();

        let texture = self
            .flights
            .run(source.clone(), move || async move {
                match tokio::time::timeout(
                    config.timeout,
                    run_job(api.as_ref(), &job_source, config.poll_interval),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => {
                        warn!("Generation for {} timed out after {:?}", job_source, config.timeout);
                        Err(GenerationError::Timeout)
                    }
                }
            })
            .await
            .unwrap_or_else(|aborted| Err(GenerationError::Service(aborted.to_string())))?;

        Ok(SkinRecord::from_texture(
            &source,
            texture,
            SkinSource::Generated,
            self.config.skin_ttl,
        ))
    }

    /// Wait for in-flight jobs up to `grace`.
    pub async fn shutdown(&self, grace: Duration) {
        self.flights.drain(grace).await;
    }
}

async fn run_job(
    api: &dyn GeneratorApi,
    source: &str,
    poll_interval: Duration,
) -> Result<Texture, GenerationError> {
    let job_id = api.submit(source).await?;
    info!("Generation job {} submitted for {}", job_id, source);

    loop {
        tokio::time::sleep(poll_interval).await;

        match api.poll(&job_id).await? {
            JobStatus::Pending => debug!("Job {} still pending", job_id),
            JobStatus::Ready(texture) => {
                info!("Generation job {} ready", job_id);
                return Ok(texture);
            }
            JobStatus::Failed(reason) => return Err(GenerationError::Service(reason)),
        }
    }
}
