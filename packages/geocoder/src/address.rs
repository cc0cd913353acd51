//! Address cleaning for pager feed locations.
//!
//! Feed addresses come in a handful of shapes:
//! - Street addresses: `"12 SMITH ST BALLARAT"`
//! - With unit prefixes: `"UNIT 3 12 SMITH ST"`, `"3/12 SMITH ST"`
//! - Corners: `"CNR SMITH ST & MAIN RD WENDOUREE"`
//! - Bare localities: `"KANGAROO FLAT"`
//! - With a trailing map book reference: `"12 SMITH ST M 62 D7"`
//!
//! This module normalizes these into a form suitable for lookup.

use std::sync::LazyLock;

use regex::Regex;
use vicalert_incident_models::Location;

/// Map book reference left in an address (e.g., "M 62 D7", "SVC 512 H4").
static MAP_REF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+(?:M|SVC)\s+\d+\s+[A-Z]\d+\b.*$").expect("valid regex"));

/// Leading unit designator: "UNIT 3 ", "U3 ", "FLAT 2A ", "APT 7 ".
static UNIT_WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:UNIT|U|FLAT|APT)\s*\d+[A-Z]?\s+").expect("valid regex"));

/// Slash unit notation: "3/12 SMITH ST" → "12 SMITH ST".
static UNIT_SLASH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+[A-Z]?\s*/\s*(\d)").expect("valid regex"));

/// Corner prefix.
static CORNER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:CNR|CORNER|COR)\.?\s+").expect("valid regex"));

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Non-geocodable address patterns.
static SKIP_PATTERNS: &[&str] = &[
    "UNKNOWN",
    "N/A",
    "NA",
    "NONE",
    "TBA",
    "TBC",
    "NOT KNOWN",
];

/// Result of cleaning an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanedAddress {
    /// A street address or bare locality.
    Street(String),
    /// A corner of two streets.
    Intersection {
        /// First street.
        street1: String,
        /// Second street, usually carrying the locality.
        street2: String,
    },
    /// The address is not geocodable (empty, unknown, garbage).
    NotGeocodable,
}

impl CleanedAddress {
    /// Free-form search text for this address, or `None` if there is
    /// nothing to search for.
    #[must_use]
    pub fn query_text(&self) -> Option<String> {
        match self {
            Self::Street(street) => Some(street.clone()),
            Self::Intersection { street1, street2 } => Some(format!("{street1} & {street2}")),
            Self::NotGeocodable => None,
        }
    }
}

/// Uppercases, collapses whitespace and strips map references.
#[must_use]
pub fn normalize(raw: &str) -> String {
    let upper = raw.trim().to_uppercase();
    let collapsed = WHITESPACE_RE.replace_all(&upper, " ");
    MAP_REF_RE.replace(&collapsed, "").trim().to_string()
}

/// Cleans a raw address string.
#[must_use]
pub fn clean_address(raw: &str) -> CleanedAddress {
    let addr = normalize(raw);

    if addr.is_empty() || SKIP_PATTERNS.iter().any(|p| addr == *p) {
        return CleanedAddress::NotGeocodable;
    }

    if CORNER_RE.is_match(&addr) {
        let rest = CORNER_RE.replace(&addr, "");
        for sep in [" & ", " AND ", " / "] {
            if let Some(idx) = rest.find(sep) {
                let street1 = rest[..idx].trim().to_string();
                let street2 = rest[idx + sep.len()..].trim().to_string();
                if !street1.is_empty() && !street2.is_empty() {
                    return CleanedAddress::Intersection { street1, street2 };
                }
            }
        }
        let rest = rest.trim();
        if rest.is_empty() {
            return CleanedAddress::NotGeocodable;
        }
        return CleanedAddress::Street(rest.to_string());
    }

    let addr = UNIT_WORD_RE.replace(&addr, "");
    let addr = UNIT_SLASH_RE.replace(&addr, "$1");
    let addr = addr.trim();

    if addr.is_empty() {
        return CleanedAddress::NotGeocodable;
    }

    CleanedAddress::Street(addr.to_string())
}

/// Cleans the address of `location`, falling back to the cross street
/// when the address itself is unusable.
#[must_use]
pub fn clean_location(location: &Location) -> CleanedAddress {
    match clean_address(&location.address) {
        CleanedAddress::NotGeocodable => location
            .cross_street
            .as_deref()
            .map_or(CleanedAddress::NotGeocodable, clean_address),
        cleaned => cleaned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_plain_address() {
        assert_eq!(
            clean_address("12 SMITH ST BALLARAT"),
            CleanedAddress::Street("12 SMITH ST BALLARAT".to_string())
        );
    }

    #[test]
    fn normalizes_case_and_spacing() {
        assert_eq!(
            clean_address("  12  smith st\tballarat "),
            CleanedAddress::Street("12 SMITH ST BALLARAT".to_string())
        );
    }

    #[test]
    fn strips_map_reference() {
        assert_eq!(
            clean_address("12 SMITH ST BALLARAT M 62 D7"),
            CleanedAddress::Street("12 SMITH ST BALLARAT".to_string())
        );
        assert_eq!(
            clean_address("1 MAIN RD LARA SVC 512 H4"),
            CleanedAddress::Street("1 MAIN RD LARA".to_string())
        );
    }

    #[test]
    fn strips_unit_prefixes() {
        assert_eq!(
            clean_address("UNIT 3 12 SMITH ST"),
            CleanedAddress::Street("12 SMITH ST".to_string())
        );
        assert_eq!(
            clean_address("3/12 SMITH ST"),
            CleanedAddress::Street("12 SMITH ST".to_string())
        );
        assert_eq!(
            clean_address("U2A 40 HIGH ST KYNETON"),
            CleanedAddress::Street("40 HIGH ST KYNETON".to_string())
        );
    }

    #[test]
    fn detects_corners() {
        assert_eq!(
            clean_address("CNR SMITH ST & MAIN RD WENDOUREE"),
            CleanedAddress::Intersection {
                street1: "SMITH ST".to_string(),
                street2: "MAIN RD WENDOUREE".to_string(),
            }
        );
        assert_eq!(
            clean_address("CNR HIGH ST"),
            CleanedAddress::Street("HIGH ST".to_string())
        );
    }

    #[test]
    fn skips_unknown() {
        assert_eq!(clean_address("UNKNOWN"), CleanedAddress::NotGeocodable);
        assert_eq!(clean_address("   "), CleanedAddress::NotGeocodable);
    }

    #[test]
    fn location_falls_back_to_cross_street() {
        let location = Location {
            address: "N/A".to_string(),
            cross_street: Some("HIGH ST BENDIGO".to_string()),
        };
        assert_eq!(
            clean_location(&location),
            CleanedAddress::Street("HIGH ST BENDIGO".to_string())
        );
    }

    #[test]
    fn query_text_joins_corner() {
        let cleaned = clean_address("CNR A ST & B RD");
        assert_eq!(cleaned.query_text().as_deref(), Some("A ST & B RD"));
        assert_eq!(CleanedAddress::NotGeocodable.query_text(), None);
    }
}
