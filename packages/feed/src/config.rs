//! Feed endpoint and proxy chain configuration.
//!
//! A default configuration is embedded at compile time from
//! `config/feed.toml`. A TOML file on disk can replace it, and
//! `VICALERT_FEED_URL` / `VICALERT_PROXIES` override individual fields.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::FeedError;

/// Environment variable overriding [`FeedConfig::feed_url`].
pub const FEED_URL_ENV: &str = "VICALERT_FEED_URL";

/// Environment variable overriding [`FeedConfig::proxies`]
/// (comma-separated list of templates).
pub const PROXIES_ENV: &str = "VICALERT_PROXIES";

/// Placeholder in a proxy template that is replaced by the feed URL.
pub const URL_PLACEHOLDER: &str = "{url}";

const EMBEDDED_CONFIG: &str = include_str!("../config/feed.toml");

/// Where the feed lives and how to reach it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedConfig {
    /// The upstream plain-text feed.
    pub feed_url: String,
    /// Ordered proxy templates, tried first to last.
    pub proxies: Vec<String>,
    /// `Origin` header sent to relays that validate it.
    #[serde(default)]
    pub origin: Option<String>,
    /// Responses shorter than this many characters are treated as failures.
    #[serde(default = "default_min_response_len")]
    pub min_response_len: usize,
    /// Per-request timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// `User-Agent` header for outbound requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

const fn default_min_response_len() -> usize {
    100
}

const fn default_request_timeout_secs() -> u64 {
    15
}

fn default_user_agent() -> String {
    "VicAlert/1.0".to_string()
}

impl FeedConfig {
    /// Returns the configuration embedded in the binary.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Config`] if the embedded TOML is invalid.
    pub fn embedded() -> Result<Self, FeedError> {
        Self::from_toml_str(EMBEDDED_CONFIG)
    }

    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Config`] if the TOML is invalid or the proxy
    /// chain is empty.
    pub fn from_toml_str(text: &str) -> Result<Self, FeedError> {
        let config: Self = toml::from_str(text).map_err(|e| FeedError::Config {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Config`] if the file cannot be read or parsed.
    pub fn from_path(path: &Path) -> Result<Self, FeedError> {
        let text = std::fs::read_to_string(path).map_err(|e| FeedError::Config {
            message: format!("{}: {e}", path.display()),
        })?;
        Self::from_toml_str(&text)
    }

    /// Applies `VICALERT_FEED_URL` and `VICALERT_PROXIES` when set.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(
            std::env::var(FEED_URL_ENV).ok(),
            std::env::var(PROXIES_ENV).ok(),
        )
    }

    fn with_overrides(mut self, feed_url: Option<String>, proxies: Option<String>) -> Self {
        if let Some(url) = feed_url.filter(|u| !u.trim().is_empty()) {
            self.feed_url = url.trim().to_string();
        }

        if let Some(list) = proxies {
            let parsed: Vec<String> = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            if parsed.is_empty() {
                log::warn!("{PROXIES_ENV} is set but empty, keeping configured proxies");
            } else {
                self.proxies = parsed;
            }
        }

        self
    }

    /// Resolves the proxy templates into concrete request URLs, in order.
    #[must_use]
    pub fn endpoint_urls(&self) -> Vec<String> {
        self.proxies
            .iter()
            .map(|template| template.replace(URL_PLACEHOLDER, &self.feed_url))
            .collect()
    }

    /// Per-request timeout as a [`Duration`].
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn validate(&self) -> Result<(), FeedError> {
        if self.proxies.is_empty() {
            return Err(FeedError::Config {
                message: "at least one proxy endpoint is required".to_string(),
            });
        }
        if self.feed_url.trim().is_empty() {
            return Err(FeedError::Config {
                message: "feed_url must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_config_parses() {
        let config = FeedConfig::embedded().unwrap();
        assert!(!config.proxies.is_empty());
        assert_eq!(config.min_response_len, 100);
    }

    #[test]
    fn templates_substitute_feed_url() {
        let config = FeedConfig::from_toml_str(
            r#"
            feed_url = "https://feed.example/all"
            proxies = ["https://relay.example/proxy", "https://cors.example/?{url}"]
            "#,
        )
        .unwrap();

        assert_eq!(
            config.endpoint_urls(),
            vec![
                "https://relay.example/proxy".to_string(),
                "https://cors.example/?https://feed.example/all".to_string(),
            ]
        );
        assert_eq!(config.user_agent, "VicAlert/1.0");
    }

    #[test]
    fn rejects_empty_proxy_chain() {
        let result = FeedConfig::from_toml_str(
            r#"
            feed_url = "https://feed.example/all"
            proxies = []
            "#,
        );
        assert!(matches!(result, Err(FeedError::Config { .. })));
    }

    #[test]
    fn overrides_replace_fields() {
        let config = FeedConfig::embedded().unwrap().with_overrides(
            Some("https://other.example/feed".to_string()),
            Some(" https://a.example/?{url} , ,https://b.example ".to_string()),
        );
        assert_eq!(config.feed_url, "https://other.example/feed");
        assert_eq!(
            config.proxies,
            vec!["https://a.example/?{url}", "https://b.example"]
        );
    }

    #[test]
    fn blank_proxy_override_is_ignored() {
        let original = FeedConfig::embedded().unwrap();
        let config = original.clone().with_overrides(None, Some(" , ".to_string()));
        assert_eq!(config.proxies, original.proxies);
    }
}
