#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Coordinates for incident locations.
//!
//! Feed addresses are free text such as `"12 SMITH ST BALLARAT"`. Lookup
//! runs through a chain of providers configured via TOML files in
//! `services/`:
//!
//! 1. **Gazetteer** (priority 1): an embedded table of Victorian locality
//!    centroids. Offline, instant, locality-level precision.
//! 2. **Nominatim / OpenStreetMap** (priority 2, disabled by default):
//!    free-form search restricted to Australia, 1 req/sec.
//!
//! A location nobody can place is reported as `None`; callers store
//! [`Coordinates::UNKNOWN`] in that case.

pub mod address;
pub mod gazetteer;
pub mod nominatim;
pub mod service_registry;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use vicalert_incident_models::{Coordinates, Location};

use crate::gazetteer::GazetteerGeocoder;
use crate::nominatim::NominatimGeocoder;
use crate::service_registry::{GeocodingService, ProviderConfig};

/// Errors from geocoding operations.
#[derive(Debug, Error)]
pub enum GeocodeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response or data file parsing failed.
    #[error("Parse error: {message}")]
    Parse {
        /// Description of the parsing failure.
        message: String,
    },

    /// Rate limit exceeded.
    #[error("Rate limit exceeded")]
    RateLimited,
}

/// Resolves an incident location to a point.
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Short provider name used in logs.
    fn name(&self) -> &str;

    /// Looks up `location`. `Ok(None)` means the provider has no match.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError`] if the provider itself failed.
    async fn lookup(&self, location: &Location) -> Result<Option<Coordinates>, GeocodeError>;

    /// Looks up `location`, logging and swallowing provider failures.
    async fn geocode(&self, location: &Location) -> Option<Coordinates> {
        match self.lookup(location).await {
            Ok(found) => found,
            Err(e) => {
                log::warn!("{} failed to geocode {:?}: {e}", self.name(), location.address);
                None
            }
        }
    }
}

/// Tries each provider in order and returns the first match.
///
/// A provider error is logged and the next provider is tried. When no
/// provider matches and at least one failed, the last error is returned
/// so callers can tell a transient failure from a definite miss.
#[derive(Clone, Default)]
pub struct ChainGeocoder {
    providers: Vec<Arc<dyn Geocoder>>,
}

impl std::fmt::Debug for ChainGeocoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.providers.iter().map(|p| p.name()).collect();
        f.debug_struct("ChainGeocoder")
            .field("providers", &names)
            .finish()
    }
}

impl ChainGeocoder {
    /// Creates a chain from providers in the order they should be tried.
    #[must_use]
    pub fn new(providers: Vec<Arc<dyn Geocoder>>) -> Self {
        Self { providers }
    }

    /// Builds the chain described by `services`, in priority order.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError`] if a provider cannot be constructed.
    pub fn from_services(services: &[GeocodingService]) -> Result<Self, GeocodeError> {
        let mut sorted: Vec<&GeocodingService> = services.iter().filter(|s| s.enabled).collect();
        sorted.sort_by_key(|s| s.priority);

        let mut providers: Vec<Arc<dyn Geocoder>> = Vec::with_capacity(sorted.len());
        for service in sorted {
            log::debug!("Enabling geocoder '{}' ({})", service.id, service.name);
            match &service.provider {
                ProviderConfig::Gazetteer => {
                    providers.push(Arc::new(GazetteerGeocoder::embedded()?));
                }
                ProviderConfig::Nominatim {
                    base_url,
                    rate_limit_ms,
                    country_code,
                } => {
                    providers.push(Arc::new(NominatimGeocoder::new(
                        base_url,
                        country_code,
                        std::time::Duration::from_millis(*rate_limit_ms),
                    )?));
                }
            }
        }

        Ok(Self::new(providers))
    }

    /// Number of providers in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether the chain has no providers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[async_trait]
impl Geocoder for ChainGeocoder {
    fn name(&self) -> &'static str {
        "chain"
    }

    async fn lookup(&self, location: &Location) -> Result<Option<Coordinates>, GeocodeError> {
        let mut last_error = None;
        for provider in &self.providers {
            match provider.lookup(location).await {
                Ok(Some(coordinates)) => return Ok(Some(coordinates)),
                Ok(None) => {}
                Err(e) => {
                    log::warn!("Geocoder '{}' failed, trying next: {e}", provider.name());
                    last_error = Some(e);
                }
            }
        }
        last_error.map_or(Ok(None), Err)
    }
}
