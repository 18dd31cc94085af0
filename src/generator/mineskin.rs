//! HTTP client for the MineSkin texture generation queue.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::skins::{GenerationError, Texture};

pub const MINESKIN_API_URL: &str = "https://api.mineskin.org";

/// State of a submitted generation job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Ready(Texture),
    Failed(String),
}

/// Submit-then-poll generation API.
#[async_trait]
pub trait GeneratorApi: Send + Sync {
    /// Queue a texture URL; returns the job id.
    async fn submit(&self, url: &str) -> Result<String, GenerationError>;

    async fn poll(&self, job_id: &str) -> Result<JobStatus, GenerationError>;
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    url: &'a str,
    visibility: &'a str,
}

#[derive(Debug, Deserialize)]
struct JobEnvelope {
    job: JobInfo,
    #[serde(default)]
    skin: Option<SkinInfo>,
}

#[derive(Debug, Deserialize)]
struct JobInfo {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct SkinInfo {
    texture: TextureInfo,
}

#[derive(Debug, Deserialize)]
struct TextureInfo {
    data: Texture,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorItem>,
}

#[derive(Debug, Deserialize)]
struct ErrorItem {
    message: String,
}

impl JobEnvelope {
    fn into_status(self) -> Result<JobStatus, GenerationError> {
        match self.job.status.as_str() {
            "waiting" | "active" | "queued" | "processing" => Ok(JobStatus::Pending),
            "completed" => match self.skin {
                Some(skin) => Ok(JobStatus::Ready(skin.texture.data)),
                None => Err(GenerationError::Service(format!(
                    "job {} completed without a skin",
                    self.job.id
                ))),
            },
            "failed" => Ok(JobStatus::Failed(format!("job {} failed", self.job.id))),
            other => Err(GenerationError::Service(format!("unknown job status {other}"))),
        }
    }
}

pub struct MineSkinClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl fmt::Debug for MineSkinClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MineSkinClient")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl MineSkinClient {
    pub fn new(base_url: &str, api_key: Option<String>, request_timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("skinsync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn read_job(response: reqwest::Response) -> Result<JobEnvelope, GenerationError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<JobEnvelope>()
                .await
                .map_err(|e| GenerationError::Service(format!("malformed response: {e}")));
        }

        let message = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|body| body.errors.into_iter().next())
            .map(|e| e.message)
            .unwrap_or_else(|| format!("generation request failed with status {status}"));

        match status {
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                Err(GenerationError::InvalidSource(message))
            }
            _ => Err(GenerationError::Service(message)),
        }
    }
}

#[async_trait]
impl GeneratorApi for MineSkinClient {
    async fn submit(&self, url: &str) -> Result<String, GenerationError> {
        let request = self
            .http
            .post(format!("{}/v2/queue", self.base_url))
            .json(&SubmitRequest {
                url,
                visibility: "unlisted",
            });

        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| GenerationError::Service(e.to_string()))?;

        let envelope = Self::read_job(response).await?;
        debug!("Submitted generation job {} for {}", envelope.job.id, url);
        Ok(envelope.job.id)
    }

    async fn poll(&self, job_id: &str) -> Result<JobStatus, GenerationError> {
        let request = self.http.get(format!("{}/v2/queue/{}", self.base_url, job_id));

        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| GenerationError::Service(e.to_string()))?;

        Self::read_job(response).await?.into_status()
    }
}
