//! Configuration module for the skin sync service.
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::generator::GeneratorConfig;
use crate::generator::mineskin::MINESKIN_API_URL;
use crate::resolver::mojang::{MOJANG_API_URL, MOJANG_SESSION_URL};
use crate::resolver::{RateGateConfig, ResolverConfig};
use crate::skins::SkinCacheConfig;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Identity of this proxy process inside the cluster.
    pub node_id: String,

    // MongoDB
    /// Optional - skins are kept in memory only when unset.
    pub mongodb_uri: Option<String>,
    pub mongodb_database: String,

    // Cluster
    pub redis_url: Option<String>,
    pub multi_node: bool,
    pub sync_channel: String,

    // Skins
    pub skin_ttl: Duration,
    pub negative_ttl: Duration,
    pub resolution_workers: usize,
    /// Player names or texture URLs.
    pub default_skins: Vec<String>,

    // Mojang
    pub mojang_api_url: String,
    pub mojang_session_url: String,
    pub mojang_rate_limit: usize,
    pub mojang_rate_window: Duration,
    pub resolve_timeout: Duration,

    // MineSkin
    pub mineskin_url: String,
    pub mineskin_api_key: Option<String>,
    pub generate_timeout: Duration,

    pub shutdown_grace: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    /// Returns error if a numeric or boolean variable cannot be parsed.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let redis_url = optional("REDIS_URL");
        let multi_node = match optional("MULTI_NODE") {
            Some(value) => parse_bool(&value).context("MULTI_NODE")?,
            None => redis_url.is_some(),
        };

        Ok(Self {
            node_id: optional("NODE_ID").unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            mongodb_uri: optional("MONGODB_URI"),
            mongodb_database: optional("MONGODB_DATABASE").unwrap_or_else(|| "skinsync".to_string()),
            redis_url,
            multi_node,
            sync_channel: optional("SYNC_CHANNEL").unwrap_or_else(|| "sr:skinchange".to_string()),
            skin_ttl: seconds("SKIN_TTL_SECS", 3600)?,
            negative_ttl: seconds("NEGATIVE_TTL_SECS", 300)?,
            resolution_workers: number("RESOLUTION_WORKERS", 8)?,
            default_skins: parse_list(&env::var("DEFAULT_SKINS").unwrap_or_default()),
            mojang_api_url: optional("MOJANG_API_URL").unwrap_or_else(|| MOJANG_API_URL.to_string()),
            mojang_session_url: optional("MOJANG_SESSION_URL")
                .unwrap_or_else(|| MOJANG_SESSION_URL.to_string()),
            mojang_rate_limit: number("MOJANG_RATE_LIMIT", 600)?,
            mojang_rate_window: seconds("MOJANG_RATE_WINDOW_SECS", 600)?,
            resolve_timeout: seconds("RESOLVE_TIMEOUT_SECS", 10)?,
            mineskin_url: optional("MINESKIN_URL").unwrap_or_else(|| MINESKIN_API_URL.to_string()),
            mineskin_api_key: optional("MINESKIN_API_KEY"),
            generate_timeout: seconds("GENERATE_TIMEOUT_SECS", 60)?,
            shutdown_grace: seconds("SHUTDOWN_GRACE_SECS", 5)?,
        })
    }

    pub fn resolver(&self) -> ResolverConfig {
        ResolverConfig {
            rate: RateGateConfig {
                limit: self.mojang_rate_limit,
                window: self.mojang_rate_window,
                ..Default::default()
            },
            timeout: self.resolve_timeout,
            skin_ttl: self.skin_ttl,
            ..Default::default()
        }
    }

    pub fn generator(&self) -> GeneratorConfig {
        GeneratorConfig {
            timeout: self.generate_timeout,
            ..Default::default()
        }
    }

    pub fn skin_cache(&self) -> SkinCacheConfig {
        SkinCacheConfig {
            negative_ttl: self.negative_ttl,
            workers: self.resolution_workers,
            default_skins: self.default_skins.clone(),
            ..Default::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: uuid::Uuid::new_v4().to_string(),
            mongodb_uri: None,
            mongodb_database: "skinsync".to_string(),
            redis_url: None,
            multi_node: false,
            sync_channel: "sr:skinchange".to_string(),
            skin_ttl: Duration::from_secs(3600),
            negative_ttl: Duration::from_secs(300),
            resolution_workers: 8,
            default_skins: Vec::new(),
            mojang_api_url: MOJANG_API_URL.to_string(),
            mojang_session_url: MOJANG_SESSION_URL.to_string(),
            mojang_rate_limit: 600,
            mojang_rate_window: Duration::from_secs(600),
            resolve_timeout: Duration::from_secs(10),
            mineskin_url: MINESKIN_API_URL.to_string(),
            mineskin_api_key: None,
            generate_timeout: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Set and non-blank variable.
fn optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn number<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional(key) {
        Some(value) => value
            .parse()
            .with_context(|| format!("{key} must be a number, got {value:?}")),
        None => Ok(default),
    }
}

fn seconds(key: &str, default: u64) -> Result<Duration> {
    number(key, default).map(Duration::from_secs)
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("expected a boolean, got {other:?}"),
    }
}

/// Comma-separated list, blanks dropped.
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        assert_eq!(
            parse_list(" Steve, ,https://example.com/alex.png ,"),
            vec!["Steve".to_string(), "https://example.com/alex.png".to_string()]
        );
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("TRUE").unwrap());
        assert!(parse_bool("1").unwrap());
        assert!(!parse_bool("off").unwrap());
        assert!(parse_bool("maybe").is_err());
    }

    #[test]
    fn test_malformed_number_is_error() {
        // unique key so parallel tests don't race on the environment
        let key = "SKINSYNC_TEST_MALFORMED_SECS";
        unsafe { env::set_var(key, "ten") };
        let err = seconds(key, 5).unwrap_err();
        assert!(format!("{err:#}").contains(key));

        unsafe { env::set_var(key, " 42 ") };
        assert_eq!(seconds(key, 5).unwrap(), Duration::from_secs(42));

        unsafe { env::remove_var(key) };
        assert_eq!(seconds(key, 5).unwrap(), Duration::from_secs(5));
    }

    #[test]
    fn test_component_configs() {
        let config = Config {
            skin_ttl: Duration::from_secs(120),
            resolution_workers: 4,
            default_skins: vec!["Steve".into()],
            mojang_rate_limit: 10,
            mojang_rate_window: Duration::from_secs(60),
            generate_timeout: Duration::from_secs(20),
            ..Default::default()
        };

        let resolver = config.resolver();
        assert_eq!(resolver.rate.limit, 10);
        assert_eq!(resolver.rate.window, Duration::from_secs(60));
        assert_eq!(resolver.skin_ttl, Duration::from_secs(120));
        assert_eq!(config.generator().timeout, Duration::from_secs(20));

        let cache = config.skin_cache();
        assert_eq!(cache.workers, 4);
        assert_eq!(cache.default_skins, vec!["Steve".to_string()]);
    }
}
