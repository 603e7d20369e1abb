//! # Configuration
//!
//! Sources, lowest to highest precedence:
//!
//! 1. built-in defaults
//! 2. a TOML file (`--config`)
//! 3. environment variables named after the field in upper case
//!    (`DEVICE_REPO_URL`, `API_PORT`, ...); lists are comma separated,
//!    `CACHE_FAMILY_TTL_SECS` is `family=secs,...`
//! 4. command line flags

use crate::cache::{CacheConfig, Family};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid value for {name}: {reason}")]
    Env { name: String, reason: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Service configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device_repo_url: String,
    pub perm_search_url: String,
    pub import_repo_url: String,
    pub import_deploy_url: String,
    pub kafka_url: String,
    pub kafka_consumer_group: String,
    pub kafka_topics_for_cache_invalidation: Vec<String>,
    pub api_port: u16,
    pub debug: bool,
    pub request_timeout_secs: u64,
    pub max_parallel_upstream: usize,
    pub cache_capacity: usize,
    pub cache_ttl_secs: u64,
    /// Per-family TTL overrides, keyed by family name (`device-types`, ...).
    pub cache_family_ttl_secs: BTreeMap<String, u64>,
    pub cache_retry_attempts: u32,
    pub cache_retry_base_ms: u64,
    /// Requests per second across all clients, 0 disables.
    pub rate_limit: u32,
    /// Allowed CORS origins; `*` allows all, empty means localhost only.
    pub cors_origins: Vec<String>,
    /// Token required by `POST /invalidations`; empty lets any caller publish.
    /// Never printed.
    #[serde(skip_serializing)]
    pub invalidation_token: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_repo_url: "http://device-repository:8080".into(),
            perm_search_url: "http://permission-search:8080".into(),
            import_repo_url: "http://import-repository:8080".into(),
            import_deploy_url: "http://import-deploy:8080".into(),
            kafka_url: String::new(),
            kafka_consumer_group: "device-selection".into(),
            kafka_topics_for_cache_invalidation: [
                "device-types",
                "aspects",
                "functions",
                "concepts",
                "characteristics",
                "devices",
                "device-groups",
            ]
            .iter()
            .map(|t| t.to_string())
            .collect(),
            api_port: 8080,
            debug: false,
            request_timeout_secs: 30,
            max_parallel_upstream: 16,
            cache_capacity: 10_000,
            cache_ttl_secs: 60,
            cache_family_ttl_secs: BTreeMap::new(),
            cache_retry_attempts: 3,
            cache_retry_base_ms: 100,
            rate_limit: 100,
            cors_origins: Vec::new(),
            invalidation_token: String::new(),
        }
    }
}

fn env_err(name: &str, reason: impl ToString) -> ConfigError {
    ConfigError::Env {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: ToString,
{
    value.trim().parse().map_err(|e: T::Err| env_err(name, e))
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    /// Defaults, then `path` (if any), then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Override fields from `(NAME, value)` pairs. Unknown names are ignored.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let n = name.as_str();
            match n {
                "DEVICE_REPO_URL" => self.device_repo_url = value,
                "PERM_SEARCH_URL" => self.perm_search_url = value,
                "IMPORT_REPO_URL" => self.import_repo_url = value,
                "IMPORT_DEPLOY_URL" => self.import_deploy_url = value,
                "KAFKA_URL" => self.kafka_url = value,
                "KAFKA_CONSUMER_GROUP" => self.kafka_consumer_group = value,
                "KAFKA_TOPICS_FOR_CACHE_INVALIDATION" => {
                    self.kafka_topics_for_cache_invalidation = parse_list(&value);
                }
                "API_PORT" => self.api_port = parse_env(n, &value)?,
                "DEBUG" => self.debug = parse_env(n, &value.to_ascii_lowercase())?,
                "REQUEST_TIMEOUT_SECS" => self.request_timeout_secs = parse_env(n, &value)?,
                "MAX_PARALLEL_UPSTREAM" => self.max_parallel_upstream = parse_env(n, &value)?,
                "CACHE_CAPACITY" => self.cache_capacity = parse_env(n, &value)?,
                "CACHE_TTL_SECS" => self.cache_ttl_secs = parse_env(n, &value)?,
                "CACHE_FAMILY_TTL_SECS" => {
                    let mut ttls = BTreeMap::new();
                    for item in parse_list(&value) {
                        let (family, secs) = item
                            .split_once('=')
                            .ok_or_else(|| env_err(n, format!("expected family=secs, got '{}'", item)))?;
                        ttls.insert(family.trim().to_string(), parse_env(n, secs)?);
                    }
                    self.cache_family_ttl_secs = ttls;
                }
                "CACHE_RETRY_ATTEMPTS" => self.cache_retry_attempts = parse_env(n, &value)?,
                "CACHE_RETRY_BASE_MS" => self.cache_retry_base_ms = parse_env(n, &value)?,
                "RATE_LIMIT" => self.rate_limit = parse_env(n, &value)?,
                "CORS_ORIGINS" => self.cors_origins = parse_list(&value),
                "INVALIDATION_TOKEN" => self.invalidation_token = value.trim().to_string(),
                _ => {}
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("request_timeout_secs must be positive".into()));
        }
        if self.max_parallel_upstream == 0 {
            return Err(ConfigError::Invalid("max_parallel_upstream must be positive".into()));
        }
        self.cache_config().map(|_| ())
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn cache_config(&self) -> Result<CacheConfig, ConfigError> {
        let mut family_ttl = HashMap::new();
        for (name, secs) in &self.cache_family_ttl_secs {
            let family = Family::from_str(name).map_err(ConfigError::Invalid)?;
            family_ttl.insert(family, Duration::from_secs(*secs));
        }
        Ok(CacheConfig {
            capacity: self.cache_capacity,
            ttl: Duration::from_secs(self.cache_ttl_secs),
            family_ttl,
            retry_attempts: self.cache_retry_attempts,
            retry_base: Duration::from_millis(self.cache_retry_base_ms),
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
