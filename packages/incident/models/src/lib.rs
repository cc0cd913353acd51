#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Incident types shared across the vicalert pipeline.
//!
//! Every stage of the pipeline (parser, geocoder, pin engine, aggregator)
//! speaks in terms of [`Incident`]. The serialized shape (camelCase keys,
//! coordinates as a `[lat, lon]` pair) is also the persisted shape used by
//! the pin snapshot store, so field renames here are storage migrations.

pub mod clock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Severity of an incident, ordered from least to most severe.
///
/// Derived from the number of responding appliances (stations) in the
/// feed line. An incident with no responders yet is [`Severity::Pending`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    /// No appliances assigned yet
    Pending,
    /// 1-2 appliances
    Low,
    /// 3-4 appliances
    Medium,
    /// 5-6 appliances
    High,
    /// 7-8 appliances
    Extreme,
    /// 9 or more appliances
    Critical,
}

impl Severity {
    /// Maps a responding appliance count to a severity.
    #[must_use]
    pub const fn from_appliance_count(count: usize) -> Self {
        match count {
            0 => Self::Pending,
            1..=2 => Self::Low,
            3..=4 => Self::Medium,
            5..=6 => Self::High,
            7..=8 => Self::Extreme,
            _ => Self::Critical,
        }
    }

    /// Returns all variants of this enum, least severe first.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Pending,
            Self::Low,
            Self::Medium,
            Self::High,
            Self::Extreme,
            Self::Critical,
        ]
    }
}

/// Where an incident is, as reported by the feed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    /// Street address including locality (e.g. "12 SMITH ST BALLARAT").
    pub address: String,
    /// Cross street text, if the feed supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cross_street: Option<String>,
}

/// A geocoded position (WGS84).
///
/// Serialized as a `[lat, lon]` pair. The `(0, 0)` value is a sentinel for
/// "geocoding failed" and must never be treated as a real location; use
/// [`Coordinates::is_known`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Coordinates {
    /// Latitude.
    pub lat: f64,
    /// Longitude.
    pub lon: f64,
}

impl Coordinates {
    /// Sentinel for an address that could not be geocoded.
    pub const UNKNOWN: Self = Self { lat: 0.0, lon: 0.0 };

    /// Creates a new coordinate pair.
    #[must_use]
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Returns `false` for the [`Coordinates::UNKNOWN`] sentinel.
    #[must_use]
    pub fn is_known(&self) -> bool {
        self.lat != 0.0 || self.lon != 0.0
    }
}

impl Default for Coordinates {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

impl From<[f64; 2]> for Coordinates {
    fn from([lat, lon]: [f64; 2]) -> Self {
        Self { lat, lon }
    }
}

impl From<Coordinates> for [f64; 2] {
    fn from(c: Coordinates) -> Self {
        [c.lat, c.lon]
    }
}

/// One emergency event as reported by the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    /// Identifier unique within one fetch cycle. The feed may reissue a
    /// different id for the same event on a later cycle.
    pub id: String,
    /// External case number (e.g. `F240512345`). Empty when the feed line
    /// carries none. Stable across reissues, so it is the secondary
    /// dedup key.
    #[serde(default)]
    pub reference: String,
    /// Event time.
    pub timestamp: DateTime<Utc>,
    /// Severity derived from appliance count.
    pub severity: Severity,
    /// Reported location.
    pub location: Location,
    /// Responding station codes, primary station first.
    #[serde(default)]
    pub stations: Vec<String>,
    /// Subset of [`Incident::stations`] that are not the primary responder.
    #[serde(default)]
    pub additional_stations: Vec<String>,
    /// Alert code (e.g. `BALL1`). The trailing digit is the response code.
    pub alert_code: String,
    /// Alert type (e.g. `Emergency`, `Non-Emergency`).
    pub alert_type: String,
    /// Free-text incident description.
    pub description: String,
    /// The feed line this incident was parsed from.
    #[serde(default)]
    pub raw_text: String,
    /// District code (the letters of the alert code).
    #[serde(default)]
    pub district: String,
    /// Derived tags (e.g. `medical`, `code1`).
    #[serde(default)]
    pub tags: Vec<String>,
    /// Geocoded position, [`Coordinates::UNKNOWN`] when geocoding failed.
    #[serde(default)]
    pub coordinates: Coordinates,
}

impl Incident {
    /// Returns the reference when it is non-empty.
    #[must_use]
    pub fn reference_key(&self) -> Option<&str> {
        if self.reference.is_empty() {
            None
        } else {
            Some(&self.reference)
        }
    }

    /// Whether this is a code 1 (lights and sirens) response.
    #[must_use]
    pub fn is_code1(&self) -> bool {
        self.alert_code.ends_with('1')
    }

    /// Whether the incident carries the given tag.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// A visibility guarantee: the incident with `id` stays displayed until
/// `pinned_at + duration`, whether or not it is still in the live feed.
///
/// Times are epoch milliseconds, matching the persisted format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinnedIncident {
    /// Id of the pinned incident.
    pub id: String,
    /// When the pin was created (epoch ms).
    pub pinned_at: i64,
    /// How long the pin lasts (ms).
    pub duration: i64,
}

impl PinnedIncident {
    /// Epoch ms at which this pin stops being valid.
    #[must_use]
    pub const fn expires_at(&self) -> i64 {
        self.pinned_at.saturating_add(self.duration)
    }

    /// Whether the pin is still valid at `now_ms`.
    #[must_use]
    pub const fn is_valid_at(&self, now_ms: i64) -> bool {
        now_ms < self.expires_at()
    }
}
