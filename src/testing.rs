//! Fakes for the upstream HTTP services and the record store.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::database::{MemorySkinStore, SkinStore};
use crate::generator::{GeneratorApi, JobStatus};
use crate::resolver::IdentityApi;
use crate::skins::{GenerationError, ResolutionError, SkinRecord, Texture};

/// Identity service fake. Known players get `uuid-<name>` and a texture
/// value of `texture-<name>`. Scripted failures are consumed by the next
/// calls of either step.
#[derive(Default)]
pub struct FakeIdentityApi {
    players: DashMap<String, String>,
    textures: DashMap<String, Texture>,
    failures: Mutex<VecDeque<ResolutionError>>,
    delay: Option<Duration>,
    uuid_calls: AtomicUsize,
    texture_calls: AtomicUsize,
    uuid_names: Mutex<Vec<String>>,
    call_times: Mutex<Vec<Instant>>,
}

impl FakeIdentityApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_player(self, name: &str) -> Self {
        let name = name.to_lowercase();
        let uuid = format!("uuid-{name}");
        self.textures.insert(
            uuid.clone(),
            Texture {
                value: format!("texture-{name}"),
                signature: format!("sig-{name}"),
            },
        );
        self.players.insert(name, uuid);
        self
    }

    pub fn with_failures(self, failures: impl IntoIterator<Item = ResolutionError>) -> Self {
        self.failures.lock().extend(failures);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn uuid_calls(&self) -> usize {
        self.uuid_calls.load(Ordering::SeqCst)
    }

    pub fn texture_calls(&self) -> usize {
        self.texture_calls.load(Ordering::SeqCst)
    }

    pub fn uuid_names(&self) -> Vec<String> {
        self.uuid_names.lock().clone()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().clone()
    }

    async fn enter(&self) -> Result<(), ResolutionError> {
        self.call_times.lock().push(Instant::now());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.failures.lock().pop_front();
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl IdentityApi for FakeIdentityApi {
    async fn lookup_uuid(&self, name: &str) -> Result<String, ResolutionError> {
        self.uuid_calls.fetch_add(1, Ordering::SeqCst);
        self.uuid_names.lock().push(name.to_lowercase());
        self.enter().await?;

        self.players
            .get(&name.to_lowercase())
            .map(|uuid| uuid.value().clone())
            .ok_or(ResolutionError::NotFound)
    }

    async fn lookup_textures(&self, uuid: &str) -> Result<Texture, ResolutionError> {
        self.texture_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;

        self.textures
            .get(uuid)
            .map(|texture| texture.value().clone())
            .ok_or(ResolutionError::NotFound)
    }
}

/// Generation service fake. Each poll consumes the next scripted status;
/// once the script is exhausted jobs report ready with a `generated`
/// texture.
#[derive(Default)]
pub struct FakeGeneratorApi {
    script: Mutex<VecDeque<JobStatus>>,
    submits: AtomicUsize,
    polls: AtomicUsize,
}

impl FakeGeneratorApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(self, statuses: impl IntoIterator<Item = JobStatus>) -> Self {
        self.script.lock().extend(statuses);
        self
    }

    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GeneratorApi for FakeGeneratorApi {
    async fn submit(&self, url: &str) -> Result<String, GenerationError> {
        let n = self.submits.fetch_add(1, Ordering::SeqCst);
        if url.is_empty() {
            return Err(GenerationError::InvalidSource(url.to_string()));
        }
        Ok(format!("job-{n}"))
    }

    async fn poll(&self, _job_id: &str) -> Result<JobStatus, GenerationError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().pop_front();
        Ok(next.unwrap_or_else(|| {
            JobStatus::Ready(Texture {
                value: "generated".into(),
                signature: "sig-generated".into(),
            })
        }))
    }
}

/// Store whose writes of one texture value stall for `delay` before
/// reaching the wrapped store.
pub struct DelayedStore {
    inner: Arc<MemorySkinStore>,
    texture_value: String,
    delay: Duration,
    stalled: AtomicBool,
}

impl DelayedStore {
    pub fn new(inner: Arc<MemorySkinStore>, texture_value: &str, delay: Duration) -> Self {
        Self {
            inner,
            texture_value: texture_value.to_string(),
            delay,
            stalled: AtomicBool::new(false),
        }
    }

    /// Whether a stalled write has started.
    pub fn stalled(&self) -> bool {
        self.stalled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SkinStore for DelayedStore {
    async fn get(&self, owner_key: &str) -> Result<Option<SkinRecord>> {
        self.inner.get(owner_key).await
    }

    async fn create(&self, record: &SkinRecord) -> Result<bool> {
        self.inner.create(record).await
    }

    async fn upsert(&self, record: &SkinRecord) -> Result<bool> {
        if record.texture_value == self.texture_value {
            self.stalled.store(true, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
        }
        self.inner.upsert(record).await
    }
}
