//! Client configuration.
//!
//! Precedence, lowest to highest:
//! 1. Programmatic defaults
//! 2. An optional YAML file
//! 3. `SPACETRADERS_*` environment variables (`__` separates nested keys)

use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::bucket::BucketConfig;
use crate::error::ClientError;

/// Production SpaceTraders v2 API.
pub const DEFAULT_BASE_URL: &str = "https://api.spacetraders.io/v2/";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    /// Rate-limit windows; an admission must fit all of them.
    pub buckets: Vec<BucketConfig>,
    pub timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            buckets: vec![
                BucketConfig::new(2, Duration::from_secs(1)),
                BucketConfig::new(10, Duration::from_secs(10)),
            ],
            timeout_secs: 30,
        }
    }
}

impl ClientConfig {
    /// Defaults with another base URL.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Loads defaults, then `path` if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ClientError> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config: Self = figment
            .merge(Env::prefixed("SPACETRADERS_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// The parsed base URL every endpoint template is resolved against.
    pub fn base_url(&self) -> Result<Url, ClientError> {
        let url = Url::parse(&self.base_url)
            .map_err(|e| ClientError::Config(format!("invalid base_url {:?}: {e}", self.base_url)))?;
        if url.cannot_be_a_base() {
            return Err(ClientError::Config(format!(
                "base_url {url} cannot be used as a base"
            )));
        }
        Ok(url)
    }

    /// Checks the base URL, the timeout and every bucket.
    pub fn validate(&self) -> Result<(), ClientError> {
        self.base_url()?;
        if self.timeout_secs == 0 {
            return Err(ClientError::Config("timeout_secs must be at least 1".to_string()));
        }
        for (index, bucket) in self.buckets.iter().enumerate() {
            bucket.validate(index)?;
        }
        Ok(())
    }

    /// Per-request network timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
