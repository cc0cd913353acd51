//! Feed fetching through a chain of CORS proxy endpoints.
//!
//! The feed is only reachable through third-party relays, any of which
//! may be down, rate limiting, or returning garbage. [`ProxyFetchClient`]
//! tries each configured endpoint in order and moves to the next one on
//! any failure:
//!
//! - connection errors and timeouts,
//! - non-2xx status codes,
//! - bodies shorter than the configured minimum length (empty pages,
//!   error stubs, captive portals).
//!
//! A successful body is written to the [`ResponseCache`] and recorded with
//! the [`RateLimiter`] before it is returned. Exhausting the chain yields
//! [`FeedError::ProxyExhausted`].

use std::sync::Arc;

use crate::cache::ResponseCache;
use crate::config::FeedConfig;
use crate::rate_limit::RateLimiter;
use crate::FeedError;

/// Maximum length of the response body preview included in logs.
const BODY_PREVIEW_LEN: usize = 120;

/// Why a single proxy attempt was rejected.
#[derive(Debug)]
enum AttemptFailure {
    Transport(reqwest::Error),
    Status(reqwest::StatusCode),
    TooShort { len: usize, preview: String },
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "request failed: {e}"),
            Self::Status(status) => write!(f, "HTTP {status}"),
            Self::TooShort { len, preview } => {
                write!(f, "response too short ({len} chars): {preview:?}")
            }
        }
    }
}

/// Fetches raw feed text through the proxy chain.
#[derive(Debug)]
pub struct ProxyFetchClient {
    client: reqwest::Client,
    feed_url: String,
    endpoints: Vec<String>,
    origin: Option<String>,
    min_response_len: usize,
    cache: Arc<ResponseCache>,
    limiter: Arc<RateLimiter>,
}

impl ProxyFetchClient {
    /// Builds a client for the endpoints in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Http`] if the HTTP client cannot be built.
    pub fn new(
        config: &FeedConfig,
        cache: Arc<ResponseCache>,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self::with_http_client(config, client, cache, limiter))
    }

    /// Builds a client around an existing [`reqwest::Client`].
    #[must_use]
    pub fn with_http_client(
        config: &FeedConfig,
        client: reqwest::Client,
        cache: Arc<ResponseCache>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            client,
            feed_url: config.feed_url.clone(),
            endpoints: config.endpoint_urls(),
            origin: config.origin.clone(),
            min_response_len: config.min_response_len,
            cache,
            limiter,
        }
    }

    /// The resolved endpoint URLs, in the order they are tried.
    #[must_use]
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Returns the raw feed text.
    ///
    /// Served from the response cache when a fresh copy exists. Otherwise
    /// the rate limiter is consulted and the proxy chain walked once, in
    /// order.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::RateLimited`] if the limiter refuses the
    /// request, or [`FeedError::ProxyExhausted`] if every endpoint fails.
    pub async fn fetch_feed_text(&self) -> Result<String, FeedError> {
        if let Some(text) = self.cache.get(&self.feed_url) {
            log::debug!("Serving feed from cache ({} chars)", text.len());
            return Ok(text);
        }

        if !self.limiter.can_make_request() {
            log::debug!("Rate limiter refused feed request");
            return Err(FeedError::RateLimited);
        }

        for (index, endpoint) in self.endpoints.iter().enumerate() {
            match self.try_endpoint(endpoint).await {
                Ok(text) => {
                    if index > 0 {
                        log::info!(
                            "Feed fetched via fallback proxy {}/{}: {endpoint}",
                            index + 1,
                            self.endpoints.len()
                        );
                    }
                    self.cache.set(&self.feed_url, text.clone());
                    self.limiter.record_request();
                    return Ok(text);
                }
                Err(failure) => {
                    log::warn!(
                        "Proxy {}/{} failed ({endpoint}): {failure}",
                        index + 1,
                        self.endpoints.len()
                    );
                }
            }
        }

        log::error!("All {} proxy endpoints failed", self.endpoints.len());
        Err(FeedError::ProxyExhausted {
            attempts: self.endpoints.len(),
        })
    }

    async fn try_endpoint(&self, endpoint: &str) -> Result<String, AttemptFailure> {
        let mut request = self
            .client
            .get(endpoint)
            .header(reqwest::header::ACCEPT, "text/plain");
        if let Some(origin) = &self.origin {
            request = request.header(reqwest::header::ORIGIN, origin);
        }

        let response = request.send().await.map_err(AttemptFailure::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttemptFailure::Status(status));
        }

        let text = response.text().await.map_err(AttemptFailure::Transport)?;
        let len = text.chars().count();
        if len < self.min_response_len {
            let preview: String = text.chars().take(BODY_PREVIEW_LEN).collect();
            return Err(AttemptFailure::TooShort { len, preview });
        }

        Ok(text)
    }
}
