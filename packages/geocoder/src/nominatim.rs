//! Nominatim / OpenStreetMap geocoder client.
//!
//! Used as a fallback when the gazetteer has no locality match. The
//! public instance allows **1 request per second**; this client enforces
//! the configured spacing itself.
//!
//! See <https://nominatim.org/release-docs/develop/api/Search/>

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use vicalert_incident_models::{Coordinates, Location};

use crate::address::clean_location;
use crate::{GeocodeError, Geocoder};

/// State suffix appended to every free-form query.
const REGION_SUFFIX: &str = "VICTORIA, AUSTRALIA";

/// Free-form Nominatim search restricted to one country.
#[derive(Debug)]
pub struct NominatimGeocoder {
    client: reqwest::Client,
    base_url: String,
    country_code: String,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl NominatimGeocoder {
    /// Creates a client for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::Http`] if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        country_code: &str,
        min_interval: Duration,
    ) -> Result<Self, GeocodeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("VicAlert/1.0")
            .build()?;
        Ok(Self::with_http_client(
            client,
            base_url,
            country_code,
            min_interval,
        ))
    }

    /// Creates a client around an existing [`reqwest::Client`].
    #[must_use]
    pub fn with_http_client(
        client: reqwest::Client,
        base_url: &str,
        country_code: &str,
        min_interval: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
            country_code: country_code.to_string(),
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    /// Waits until `min_interval` has passed since the previous request.
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Geocodes a free-form query.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError`] if the HTTP request or response parsing fails.
    pub async fn geocode_freeform(&self, query: &str) -> Result<Option<Coordinates>, GeocodeError> {
        self.throttle().await;

        let resp = self
            .client
            .get(&self.base_url)
            .query(&[
                ("q", query),
                ("countrycodes", self.country_code.as_str()),
                ("format", "jsonv2"),
                ("limit", "1"),
            ])
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(GeocodeError::RateLimited);
        }

        let body: serde_json::Value = resp.error_for_status()?.json().await?;
        parse_response(&body)
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    fn name(&self) -> &'static str {
        "nominatim"
    }

    async fn lookup(&self, location: &Location) -> Result<Option<Coordinates>, GeocodeError> {
        let Some(query) = clean_location(location).query_text() else {
            return Ok(None);
        };
        self.geocode_freeform(&format!("{query}, {REGION_SUFFIX}"))
            .await
    }
}

/// Parses Nominatim JSON response.
fn parse_response(body: &serde_json::Value) -> Result<Option<Coordinates>, GeocodeError> {
    let results = body.as_array().ok_or_else(|| GeocodeError::Parse {
        message: "Nominatim response is not an array".to_string(),
    })?;

    let Some(first) = results.first() else {
        return Ok(None);
    };

    let lat = first["lat"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| GeocodeError::Parse {
            message: "Missing lat in Nominatim response".to_string(),
        })?;

    let lon = first["lon"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| GeocodeError::Parse {
            message: "Missing lon in Nominatim response".to_string(),
        })?;

    if let Some(name) = first["display_name"].as_str() {
        log::trace!("Nominatim matched {name}");
    }

    Ok(Some(Coordinates::new(lat, lon)))
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
    use tokio::net::TcpListener;

    use super::*;

    #[test]
    fn parses_nominatim_result() {
        let body = serde_json::json!([{
            "lat": "-37.5622",
            "lon": "143.8503",
            "display_name": "Ballarat, City of Ballarat, Victoria, Australia"
        }]);
        let result = parse_response(&body).unwrap().unwrap();
        assert!((result.lat - -37.5622).abs() < 1e-4);
        assert!((result.lon - 143.8503).abs() < 1e-4);
    }

    #[test]
    fn parses_nominatim_empty() {
        let body = serde_json::json!([]);
        assert!(parse_response(&body).unwrap().is_none());
    }

    #[test]
    fn rejects_non_array() {
        let body = serde_json::json!({"error": "bad"});
        assert!(matches!(
            parse_response(&body),
            Err(GeocodeError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn too_many_requests_is_rate_limited() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 429 Too Many Requests\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await;
        });

        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        let geocoder = NominatimGeocoder::with_http_client(
            client,
            &format!("http://{addr}/search"),
            "au",
            Duration::ZERO,
        );
        let location = Location {
            address: "12 SMITH ST BALLARAT".to_string(),
            cross_street: None,
        };

        assert!(matches!(
            geocoder.lookup(&location).await,
            Err(GeocodeError::RateLimited)
        ));
    }
}
