#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Feed ingestion for vicalert.
//!
//! Raw pager text is fetched through a chain of CORS proxies
//! ([`proxy`]), gated by a [`rate_limit::RateLimiter`] and memoised in a
//! [`cache::ResponseCache`], then parsed into incidents ([`parser`]) and
//! enriched with coordinates. [`FeedPipeline`] wires the stages together
//! behind the [`IncidentSource`] trait the aggregator consumes.

pub mod cache;
pub mod config;
pub mod parser;
pub mod proxy;
pub mod rate_limit;

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt as _;
use moka::sync::Cache;
use thiserror::Error;
use vicalert_geocoder::Geocoder;
use vicalert_incident_models::{Coordinates, Incident};

use crate::proxy::ProxyFetchClient;

/// Number of geocoding lookups in flight at once.
const GEOCODE_CONCURRENCY: usize = 4;

/// Distinct addresses remembered by one pipeline.
pub const GEOCODE_MEMO_CAPACITY: u64 = 2_048;

/// Errors from fetching or interpreting the feed.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Every proxy endpoint failed for one fetch attempt.
    #[error("All {attempts} proxy endpoints failed")]
    ProxyExhausted {
        /// Number of endpoints tried.
        attempts: usize,
    },

    /// The payload does not match the feed grammar.
    #[error("Malformed feed: {message}")]
    MalformedFeed {
        /// Description of the problem.
        message: String,
    },

    /// The rate limiter refused the request.
    #[error("Rate limited")]
    RateLimited,

    /// HTTP client error outside of a single proxy attempt.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid feed configuration.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },
}

/// Produces the current list of incidents.
#[async_trait]
pub trait IncidentSource: Send + Sync {
    /// Fetches, parses and enriches one snapshot of the feed.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError`] if the feed could not be fetched or parsed.
    /// Geocoding failures are never errors.
    async fn fetch_incidents(&self) -> Result<Vec<Incident>, FeedError>;
}

/// Fetch → parse → geocode.
pub struct FeedPipeline {
    client: ProxyFetchClient,
    geocoder: Arc<dyn Geocoder>,
    geocoded: Cache<String, Coordinates>,
}

impl std::fmt::Debug for FeedPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedPipeline")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

impl FeedPipeline {
    /// Creates a pipeline from a fetch client and a geocoder.
    #[must_use]
    pub fn new(client: ProxyFetchClient, geocoder: Arc<dyn Geocoder>) -> Self {
        Self {
            client,
            geocoder,
            geocoded: Cache::new(GEOCODE_MEMO_CAPACITY),
        }
    }

    /// Fills in [`Incident::coordinates`], keeping feed order.
    ///
    /// Up to [`GEOCODE_MEMO_CAPACITY`] distinct addresses are remembered,
    /// hits and definite misses alike. A provider failure is not
    /// remembered, so the address is looked up again next cycle.
    pub async fn enrich(&self, incidents: Vec<Incident>) -> Vec<Incident> {
        futures::stream::iter(incidents)
            .map(|mut incident| async move {
                incident.coordinates = self.coordinates_for(&incident).await;
                incident
            })
            .buffered(GEOCODE_CONCURRENCY)
            .collect()
            .await
    }

    async fn coordinates_for(&self, incident: &Incident) -> Coordinates {
        let key = match &incident.location.cross_street {
            Some(cross) => format!("{}/{cross}", incident.location.address),
            None => incident.location.address.clone(),
        };

        if let Some(known) = self.geocoded.get(&key) {
            return known;
        }

        match self.geocoder.lookup(&incident.location).await {
            Ok(found) => {
                let coordinates = found.unwrap_or(Coordinates::UNKNOWN);
                if !coordinates.is_known() {
                    log::debug!("No coordinates for {:?}", incident.location.address);
                }
                self.geocoded.insert(key, coordinates);
                coordinates
            }
            Err(e) => {
                log::warn!(
                    "{} failed to geocode {:?}, will retry: {e}",
                    self.geocoder.name(),
                    incident.location.address
                );
                Coordinates::UNKNOWN
            }
        }
    }
}

#[async_trait]
impl IncidentSource for FeedPipeline {
    async fn fetch_incidents(&self) -> Result<Vec<Incident>, FeedError> {
        let text = self.client.fetch_feed_text().await?;
        let incidents = parser::parse(&text)?;
        log::info!("Fetched {} incidents", incidents.len());
        Ok(self.enrich(incidents).await)
    }
}
