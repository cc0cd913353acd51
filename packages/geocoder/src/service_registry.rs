//! Compile-time registry of geocoding service configurations.
//!
//! Each provider is defined in a TOML file under `services/`. The registry
//! embeds these at compile time and exposes them via [`all_services`] and
//! [`enabled_services`]. Setting `VICALERT_NOMINATIM=1` enables the
//! network fallback, which ships disabled.

use serde::Deserialize;

/// Environment variable that enables the Nominatim provider.
pub const NOMINATIM_ENV: &str = "VICALERT_NOMINATIM";

/// A geocoding service configuration loaded from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct GeocodingService {
    /// Unique identifier (e.g., `"gazetteer"`, `"nominatim"`).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Whether this service is active in the lookup chain.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Execution order; lower values run first.
    pub priority: u32,
    /// Provider-specific configuration.
    pub provider: ProviderConfig,
}

/// Provider-specific configuration, tagged by `type` in TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Embedded locality table.
    Gazetteer,
    /// Nominatim / `OpenStreetMap` geocoder.
    Nominatim {
        /// API base URL (e.g., `"https://nominatim.openstreetmap.org/search"`).
        base_url: String,
        /// Minimum delay between requests in milliseconds.
        rate_limit_ms: u64,
        /// ISO country code results are restricted to.
        country_code: String,
    },
}

const fn default_true() -> bool {
    true
}

// ── Compile-time embedded TOML files ────────────────────────────────

const SERVICE_TOMLS: &[(&str, &str)] = &[
    ("gazetteer", include_str!("../services/gazetteer.toml")),
    ("nominatim", include_str!("../services/nominatim.toml")),
];

/// Returns all geocoding service configurations (enabled and disabled).
///
/// # Panics
///
/// Panics if any TOML config is malformed (this is a compile-time guarantee
/// since the configs are embedded).
#[must_use]
pub fn all_services() -> Vec<GeocodingService> {
    SERVICE_TOMLS
        .iter()
        .map(|(name, toml_str)| {
            toml::de::from_str(toml_str)
                .unwrap_or_else(|e| panic!("Failed to parse geocoding service '{name}': {e}"))
        })
        .collect()
}

/// Returns only enabled services, sorted by priority (ascending).
///
/// `VICALERT_NOMINATIM` set to `1` or `true` force-enables Nominatim.
#[must_use]
pub fn enabled_services() -> Vec<GeocodingService> {
    let force_nominatim = std::env::var(NOMINATIM_ENV)
        .is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));
    select_enabled(all_services(), force_nominatim)
}

fn select_enabled(services: Vec<GeocodingService>, force_nominatim: bool) -> Vec<GeocodingService> {
    let mut services: Vec<GeocodingService> = services
        .into_iter()
        .map(|mut s| {
            if force_nominatim && matches!(s.provider, ProviderConfig::Nominatim { .. }) {
                s.enabled = true;
            }
            s
        })
        .filter(|s| s.enabled)
        .collect();
    services.sort_by_key(|s| s.priority);
    services
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn loads_all_services() {
        assert_eq!(all_services().len(), SERVICE_TOMLS.len());
    }

    #[test]
    fn service_ids_are_unique() {
        let mut seen = BTreeSet::new();
        for svc in &all_services() {
            assert!(seen.insert(svc.id.clone()), "Duplicate service ID: {}", svc.id);
        }
    }

    #[test]
    fn nominatim_ships_disabled() {
        let enabled = select_enabled(all_services(), false);
        assert_eq!(
            enabled.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            vec!["gazetteer"]
        );
    }

    #[test]
    fn forced_nominatim_runs_after_gazetteer() {
        let enabled = select_enabled(all_services(), true);
        assert_eq!(
            enabled.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            vec!["gazetteer", "nominatim"]
        );
    }
}
