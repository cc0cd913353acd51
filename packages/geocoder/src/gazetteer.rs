//! Embedded table of Victorian locality centroids.
//!
//! Feed addresses almost always end with the locality name, so matching
//! the trailing words of the cleaned address against a fixed table places
//! most incidents without any network access. Multi-word names such as
//! `KANGAROO FLAT` win over a shorter match on their last word.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use vicalert_incident_models::{Coordinates, Location};

use crate::address::{CleanedAddress, clean_location};
use crate::{GeocodeError, Geocoder};

const EMBEDDED_LOCALITIES: &str = include_str!("../data/localities.toml");

#[derive(Debug, Deserialize)]
struct GazetteerFile {
    locality: Vec<LocalityEntry>,
}

/// One row of the gazetteer.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalityEntry {
    /// Upper-case locality name.
    pub name: String,
    /// Latitude (WGS84).
    pub lat: f64,
    /// Longitude (WGS84).
    pub lon: f64,
}

/// Locality name → centroid lookup table.
#[derive(Debug, Clone)]
pub struct Gazetteer {
    by_name: BTreeMap<String, Coordinates>,
    max_words: usize,
}

impl Gazetteer {
    /// Loads the table embedded in the binary.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::Parse`] if the embedded TOML is invalid.
    pub fn embedded() -> Result<Self, GeocodeError> {
        Self::from_toml_str(EMBEDDED_LOCALITIES)
    }

    /// Parses a table from TOML text with `[[locality]]` entries.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::Parse`] if the TOML is invalid.
    pub fn from_toml_str(text: &str) -> Result<Self, GeocodeError> {
        let file: GazetteerFile = toml::from_str(text).map_err(|e| GeocodeError::Parse {
            message: format!("gazetteer: {e}"),
        })?;
        Ok(Self::from_entries(file.locality))
    }

    /// Builds a table from entries. Later duplicates replace earlier ones.
    #[must_use]
    pub fn from_entries(entries: Vec<LocalityEntry>) -> Self {
        let mut by_name = BTreeMap::new();
        let mut max_words = 0;
        for entry in entries {
            let name = entry.name.trim().to_uppercase();
            max_words = max_words.max(name.split_whitespace().count());
            by_name.insert(name, Coordinates::new(entry.lat, entry.lon));
        }
        Self { by_name, max_words }
    }

    /// Number of localities in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Exact lookup by locality name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Coordinates> {
        self.by_name.get(&name.trim().to_uppercase()).copied()
    }

    /// Finds the locality mentioned closest to the end of `text`.
    ///
    /// Scans word windows from the last word backwards, preferring the
    /// longest name that ends at each position.
    #[must_use]
    pub fn find_locality(&self, text: &str) -> Option<(String, Coordinates)> {
        let upper = text.to_uppercase();
        let words: Vec<&str> = upper
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|w| !w.is_empty())
            .collect();

        for end in (1..=words.len()).rev() {
            for len in (1..=self.max_words.min(end)).rev() {
                let candidate = words[end - len..end].join(" ");
                if let Some(coordinates) = self.by_name.get(&candidate) {
                    return Some((candidate, *coordinates));
                }
            }
        }

        None
    }
}

/// [`Geocoder`] backed by a [`Gazetteer`].
#[derive(Debug, Clone)]
pub struct GazetteerGeocoder {
    gazetteer: Gazetteer,
}

impl GazetteerGeocoder {
    /// Wraps an existing table.
    #[must_use]
    pub const fn new(gazetteer: Gazetteer) -> Self {
        Self { gazetteer }
    }

    /// Uses the embedded table.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::Parse`] if the embedded TOML is invalid.
    pub fn embedded() -> Result<Self, GeocodeError> {
        Ok(Self::new(Gazetteer::embedded()?))
    }

    fn locate(&self, text: &str) -> Option<Coordinates> {
        self.gazetteer
            .find_locality(text)
            .map(|(name, coordinates)| {
                log::trace!("Gazetteer matched {name} in {text:?}");
                coordinates
            })
    }
}

#[async_trait]
impl Geocoder for GazetteerGeocoder {
    fn name(&self) -> &'static str {
        "gazetteer"
    }

    async fn lookup(&self, location: &Location) -> Result<Option<Coordinates>, GeocodeError> {
        let found = match clean_location(location) {
            CleanedAddress::Street(street) => self.locate(&street),
            CleanedAddress::Intersection { street1, street2 } => self
                .locate(&street2)
                .or_else(|| self.locate(&street1)),
            CleanedAddress::NotGeocodable => None,
        };

        // The locality is sometimes only on the cross street.
        Ok(found.or_else(|| {
            location
                .cross_street
                .as_deref()
                .and_then(|cross| self.locate(cross))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gazetteer() -> Gazetteer {
        Gazetteer::embedded().unwrap()
    }

    #[test]
    fn embedded_table_loads() {
        let table = gazetteer();
        assert!(table.len() > 50);
        assert!(table.get("ballarat").is_some());
    }

    #[test]
    fn matches_trailing_locality() {
        let (name, _) = gazetteer().find_locality("12 SMITH ST BALLARAT").unwrap();
        assert_eq!(name, "BALLARAT");
    }

    #[test]
    fn prefers_multi_word_name() {
        let (name, _) = gazetteer().find_locality("HIGH ST KANGAROO FLAT").unwrap();
        assert_eq!(name, "KANGAROO FLAT");
    }

    #[test]
    fn prefers_name_closest_to_end() {
        let (name, _) = gazetteer().find_locality("BALLARAT RD CORIO").unwrap();
        assert_eq!(name, "CORIO");
    }

    #[test]
    fn no_match_is_none() {
        assert!(gazetteer().find_locality("1 NOWHERE LANE").is_none());
        assert!(gazetteer().find_locality("").is_none());
    }

    #[test]
    fn duplicate_entries_keep_last() {
        let table = Gazetteer::from_entries(vec![
            LocalityEntry {
                name: "sale".to_string(),
                lat: 1.0,
                lon: 2.0,
            },
            LocalityEntry {
                name: "SALE".to_string(),
                lat: -38.1,
                lon: 147.0,
            },
        ]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("SALE"), Some(Coordinates::new(-38.1, 147.0)));
    }

    #[tokio::test]
    async fn geocodes_from_cross_street() {
        let geocoder = GazetteerGeocoder::new(gazetteer());
        let location = Location {
            address: "FREEWAY ON RAMP".to_string(),
            cross_street: Some("MIDLAND HWY BENDIGO".to_string()),
        };
        let found = geocoder.lookup(&location).await.unwrap().unwrap();
        assert_eq!(found, gazetteer().get("BENDIGO").unwrap());
    }

    #[tokio::test]
    async fn geocodes_corner() {
        let geocoder = GazetteerGeocoder::new(gazetteer());
        let location = Location {
            address: "CNR SMITH ST & MAIN RD WENDOUREE".to_string(),
            cross_street: None,
        };
        let found = geocoder.lookup(&location).await.unwrap().unwrap();
        assert_eq!(found, gazetteer().get("WENDOUREE").unwrap());
    }
}
