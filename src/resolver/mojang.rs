//! HTTP client for the Mojang profile and session services.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::skins::{ResolutionError, Texture};

pub const MOJANG_API_URL: &str = "https://api.mojang.com";
pub const MOJANG_SESSION_URL: &str = "https://sessionserver.mojang.com";

/// The two lookups behind a name-to-texture resolution.
#[async_trait]
pub trait IdentityApi: Send + Sync {
    /// Player name to undashed UUID.
    async fn lookup_uuid(&self, name: &str) -> Result<String, ResolutionError>;

    /// UUID to the signed `textures` property.
    async fn lookup_textures(&self, uuid: &str) -> Result<Texture, ResolutionError>;
}

#[derive(Debug, Deserialize)]
struct ProfileResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SessionProfile {
    #[serde(default)]
    properties: Vec<ProfileProperty>,
}

#[derive(Debug, Deserialize)]
struct ProfileProperty {
    name: String,
    value: String,
    #[serde(default)]
    signature: Option<String>,
}

pub struct MojangClient {
    http: reqwest::Client,
    api_url: String,
    session_url: String,
}

impl fmt::Debug for MojangClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MojangClient")
            .field("api_url", &self.api_url)
            .field("session_url", &self.session_url)
            .finish()
    }
}

impl MojangClient {
    /// Build a client; `request_timeout` bounds each single HTTP exchange.
    pub fn new(api_url: &str, session_url: &str, request_timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("skinsync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            session_url: session_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ResolutionError> {
        debug!("GET {}", url);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ResolutionError::Transport(e.to_string()))?;

        match response.status() {
            status if status.is_success() && status != StatusCode::NO_CONTENT => response
                .json::<T>()
                .await
                .map_err(|e| ResolutionError::Transport(format!("malformed response: {e}"))),
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Err(ResolutionError::NotFound),
            StatusCode::TOO_MANY_REQUESTS => Err(ResolutionError::RateLimited),
            status => Err(ResolutionError::Transport(format!(
                "unexpected status {status} from {url}"
            ))),
        }
    }
}

#[async_trait]
impl IdentityApi for MojangClient {
    async fn lookup_uuid(&self, name: &str) -> Result<String, ResolutionError> {
        let url = format!("{}/users/profiles/minecraft/{}", self.api_url, name);
        let profile: ProfileResponse = self.get_json(&url).await?;
        Ok(profile.id)
    }

    async fn lookup_textures(&self, uuid: &str) -> Result<Texture, ResolutionError> {
        let url = format!(
            "{}/session/minecraft/profile/{}?unsigned=false",
            self.session_url, uuid
        );
        let profile: SessionProfile = self.get_json(&url).await?;

        let property = profile
            .properties
            .into_iter()
            .find(|p| p.name == "textures")
            .ok_or(ResolutionError::NotFound)?;

        let signature = property
            .signature
            .ok_or_else(|| ResolutionError::Transport("textures property is unsigned".into()))?;

        Ok(Texture {
            value: property.value,
            signature,
        })
    }
}
