//! Run configuration: the feed list plus the pipeline tunables.
//!
//! The config file is TOML. Tunables are optional and default to sensible
//! values; the `[[feeds]]` list is what the whole run is about, and every
//! entry is validated up front so the fetch pipeline only ever sees feeds it
//! can actually request.
use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Feed \"{name}\": {reason}")]
    InvalidFeed { name: String, reason: String },

    #[error("Invalid setting: {0}")]
    InvalidSetting(&'static str),

    #[error("Duplicate feed name \"{0}\" (feed names are identity keys)")]
    DuplicateName(String),
}

/// One feed to fetch. The name is the identity key throughout the pipeline:
/// cache entries, error reporting, and article attribution all use it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FeedConfig {
    pub name: String,
    pub url: String,
}

/// Top-level configuration.
///
/// All tunables use `#[serde(default)]` so any subset of keys can be
/// specified. They are carried as explicit fields and handed to the fetch
/// orchestrator rather than living as module-level constants.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Per-feed deadline covering the entire HTTP transaction, in seconds.
    pub fetch_timeout_secs: u64,

    /// Maximum excerpt length in characters, measured after HTML stripping.
    pub excerpt_max_chars: usize,

    /// Upper bound on concurrent fetches, independent of feed count.
    pub max_concurrent_fetches: usize,

    /// The feeds to fetch, in output order.
    pub feeds: Vec<FeedConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: 60,
            excerpt_max_chars: 300,
            max_concurrent_fetches: 10,
            feeds: Vec::new(),
        }
    }
}

impl Config {
    /// Load and validate configuration from a TOML file.
    ///
    /// Unlike the tunables, the file itself is not optional: without it
    /// there is no feed list and nothing to do.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(
            path = %path.display(),
            feeds = config.feeds.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_fetches == 0 {
            return Err(ConfigError::InvalidSetting(
                "max_concurrent_fetches must be at least 1",
            ));
        }
        let mut seen = HashSet::new();
        for feed in &self.feeds {
            if feed.name.trim().is_empty() {
                return Err(ConfigError::InvalidFeed {
                    name: feed.url.clone(),
                    reason: "feed name is empty".to_string(),
                });
            }
            if !seen.insert(feed.name.as_str()) {
                return Err(ConfigError::DuplicateName(feed.name.clone()));
            }
            let url = Url::parse(&feed.url).map_err(|e| ConfigError::InvalidFeed {
                name: feed.name.clone(),
                reason: format!("invalid URL: {e}"),
            })?;
            match url.scheme() {
                "http" | "https" => {}
                other => {
                    return Err(ConfigError::InvalidFeed {
                        name: feed.name.clone(),
                        reason: format!("unsupported URL scheme \"{other}\""),
                    });
                }
            }
        }
        Ok(())
    }
}
