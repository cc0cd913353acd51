//! Pager feed line grammar.
//!
//! The feed is plain text, one dispatch message per line:
//!
//! ```text
//! 2024-05-12 14:23:11 @@ALERT F240512345 BALL3 STRUCTURE FIRE - 12 SMITH ST BALLARAT /LYDIARD ST M 62 D7 (123456) CBALL CWEN [BALL]
//! ```
//!
//! | Part | Meaning |
//! |---|---|
//! | `2024-05-12 14:23:11` | dispatch time |
//! | `@@` / `Hb` / `QD` + `ALERT` | emergency / non-emergency / administrative |
//! | `F240512345` | case reference (optional) |
//! | `BALL3` | district letters plus response code digit |
//! | `STRUCTURE FIRE - 12 SMITH ST BALLARAT` | description, then address after the last `" - "` |
//! | `/LYDIARD ST` | cross street(s) |
//! | `M 62 D7` | map book reference (optional) |
//! | `(123456)` | dispatch event number (optional) |
//! | `CBALL CWEN` | responding stations, `C` prefixed |
//! | `[BALL]` | the paged (primary) station (optional) |
//!
//! Station tokens are only recognised after an event number or before a
//! primary marker. Lines that do not fit the grammar are skipped. A
//! payload made entirely of unparseable lines is
//! [`FeedError::MalformedFeed`]; an empty payload is zero incidents.

use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::Regex;
use sha2::{Digest as _, Sha256};
use vicalert_incident_models::{Coordinates, Incident, Location, Severity};

use crate::FeedError;

/// Tag for medical assist calls.
pub const TAG_MEDICAL: &str = "medical";
/// Tag for appliance relocation messages.
pub const TAG_STATION_MOVE: &str = "station-move";
/// Tag for code 1 (urgent) responses.
pub const TAG_CODE1: &str = "code1";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Number of hex characters of the line hash used as the incident id.
const ID_LEN: usize = 16;

static LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<ts>\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2})\s+(?P<prefix>@@|Hb|QD)ALERT\s+(?:(?P<reference>F\d{9})\s+)?(?P<code>[A-Z]{2,}\d)\s+(?P<body>.+)$",
    )
    .expect("valid regex")
});

static TAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<text>.*?)(?:\s+M\s+\d+\s+[A-Z]\d+)?(?:\s+\((?P<event>\d+)\))?(?P<stations>(?:\s+C[A-Z0-9]{2,})*)(?:\s+\[(?P<primary>[A-Z0-9]+)\])?\s*$",
    )
    .expect("valid regex")
});

static MEDICAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:MEDICAL|ASSIST AMBULANCE|CARDIAC|EMR|RESUS)\b").expect("valid regex")
});

static PEG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)PEG[:.]?\s*[A-Z0-9]+").expect("valid regex"));

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b04\d{8}\b").expect("valid regex"));

/// Parses a whole feed payload into incidents, in feed order.
///
/// # Errors
///
/// Returns [`FeedError::MalformedFeed`] if the payload has content but not
/// a single line matches the grammar.
pub fn parse(raw: &str) -> Result<Vec<Incident>, FeedError> {
    let mut incidents = Vec::new();
    let mut content_lines = 0usize;

    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        content_lines += 1;

        match parse_line(line) {
            Some(incident) => incidents.push(incident),
            None => log::debug!("Skipping unparseable feed line: {line}"),
        }
    }

    if content_lines > 0 && incidents.is_empty() {
        return Err(FeedError::MalformedFeed {
            message: format!("none of {content_lines} lines matched the feed grammar"),
        });
    }

    log::debug!(
        "Parsed {} incidents from {content_lines} feed lines",
        incidents.len()
    );

    Ok(incidents)
}

/// Parses one feed line. Returns `None` if it does not fit the grammar.
#[must_use]
pub fn parse_line(line: &str) -> Option<Incident> {
    let caps = LINE_RE.captures(line)?;

    let timestamp = NaiveDateTime::parse_from_str(&caps["ts"], TIMESTAMP_FORMAT)
        .ok()?
        .and_utc();
    let alert_type = alert_type(&caps["prefix"]).to_string();
    let reference = caps
        .name("reference")
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();
    let alert_code = caps["code"].to_string();
    let district = alert_code
        .trim_end_matches(|c: char| c.is_ascii_digit())
        .to_string();

    let tail = TAIL_RE.captures(&caps["body"])?;
    let station_tokens = tail.name("stations").map_or("", |m| m.as_str());
    let primary = tail.name("primary").map(|m| m.as_str());

    // Station tokens only count when anchored by an event number or a
    // primary marker; otherwise a trailing locality such as "CORIO" would
    // be read as a station.
    let anchored = tail.name("event").is_some() || primary.is_some();
    let (text, station_tokens) = if anchored {
        (tail["text"].trim().to_string(), station_tokens)
    } else {
        (format!("{}{station_tokens}", &tail["text"]).trim().to_string(), "")
    };
    if text.is_empty() {
        return None;
    }

    let (stations, additional_stations) = stations(station_tokens, primary);
    let (description, location) = split_text(&text);
    let tags = derive_tags(&description, &alert_code);

    Some(Incident {
        id: line_id(line),
        reference,
        timestamp,
        severity: Severity::from_appliance_count(stations.len()),
        location,
        stations,
        additional_stations,
        alert_code,
        alert_type,
        description,
        raw_text: line.to_string(),
        district,
        tags,
        coordinates: Coordinates::UNKNOWN,
    })
}

/// Masks pager access codes and mobile numbers for display.
#[must_use]
pub fn mask_sensitive(text: &str) -> String {
    let masked = PEG_RE.replace_all(text, "PEG ********");
    PHONE_RE.replace_all(&masked, "04********").into_owned()
}

fn alert_type(prefix: &str) -> &'static str {
    match prefix {
        "@@" => "Emergency",
        "Hb" => "Non-Emergency",
        _ => "Administrative",
    }
}

fn line_id(line: &str) -> String {
    let digest = Sha256::digest(line.as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(ID_LEN);
    id
}

/// Returns `(stations, additional_stations)`, primary station first.
fn stations(tokens: &str, primary: Option<&str>) -> (Vec<String>, Vec<String>) {
    let mut all: Vec<String> = Vec::new();

    if let Some(primary) = primary {
        all.push(primary.to_string());
    }

    for token in tokens.split_whitespace() {
        let code = token.strip_prefix('C').unwrap_or(token).to_string();
        if !all.contains(&code) {
            all.push(code);
        }
    }

    let additional = all.iter().skip(1).cloned().collect();
    (all, additional)
}

/// Splits the free text into a description and a location.
fn split_text(text: &str) -> (String, Location) {
    let (description, place) = match text.rfind(" - ") {
        Some(idx) => (text[..idx].trim(), text[idx + 3..].trim()),
        None => (text, text),
    };

    let (address, cross_street) = match place.find('/') {
        Some(idx) => {
            let cross = place[idx..].trim_start_matches('/').trim();
            (
                place[..idx].trim(),
                (!cross.is_empty()).then(|| cross.to_string()),
            )
        }
        None => (place, None),
    };

    // Without a " - " separator the description is the whole text, minus
    // any cross street suffix.
    let description = if description == place {
        address
    } else {
        description
    };

    (
        description.to_string(),
        Location {
            address: address.to_string(),
            cross_street,
        },
    )
}

fn derive_tags(description: &str, alert_code: &str) -> Vec<String> {
    let mut tags = Vec::new();
    if MEDICAL_RE.is_match(description) {
        tags.push(TAG_MEDICAL.to_string());
    }
    if description.to_uppercase().contains("MOVE TO STATION") {
        tags.push(TAG_STATION_MOVE.to_string());
    }
    if alert_code.ends_with('1') {
        tags.push(TAG_CODE1.to_string());
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE: &str = "2024-05-12 14:23:11 @@ALERT F240512345 BALL3 STRUCTURE FIRE - 12 SMITH ST BALLARAT /LYDIARD ST //DAWSON ST M 62 D7 (123456) CBALL CWEN CSEB [BALL]";

    #[test]
    fn parses_full_line() {
        let incident = parse_line(LINE).unwrap();

        assert_eq!(incident.reference, "F240512345");
        assert_eq!(incident.alert_code, "BALL3");
        assert_eq!(incident.district, "BALL");
        assert_eq!(incident.alert_type, "Emergency");
        assert_eq!(incident.description, "STRUCTURE FIRE");
        assert_eq!(incident.location.address, "12 SMITH ST BALLARAT");
        assert_eq!(
            incident.location.cross_street.as_deref(),
            Some("LYDIARD ST //DAWSON ST")
        );
        assert_eq!(incident.stations, vec!["BALL", "WEN", "SEB"]);
        assert_eq!(incident.additional_stations, vec!["WEN", "SEB"]);
        assert_eq!(incident.severity, Severity::Medium);
        assert_eq!(incident.timestamp.to_string(), "2024-05-12 14:23:11 UTC");
        assert!(!incident.coordinates.is_known());
        assert_eq!(incident.id.len(), ID_LEN);
    }

    #[test]
    fn reference_is_optional() {
        let incident = parse_line(
            "2024-05-12 14:23:11 HbALERT CFAFS1 ALARM OPERATING - 1 MAIN RD GEELONG (99) CGEEL",
        )
        .unwrap();
        assert_eq!(incident.reference, "");
        assert_eq!(incident.alert_type, "Non-Emergency");
        assert_eq!(incident.stations, vec!["GEEL"]);
        assert!(incident.additional_stations.is_empty());
        assert!(incident.has_tag(TAG_CODE1));
    }

    #[test]
    fn no_stations_is_pending() {
        let incident =
            parse_line("2024-05-12 14:23:11 QDALERT F240500001 BEND3 GRASS FIRE - KANGAROO FLAT")
                .unwrap();
        assert_eq!(incident.severity, Severity::Pending);
        assert_eq!(incident.location.address, "KANGAROO FLAT");
    }

    #[test]
    fn description_without_separator_keeps_cross_street_apart() {
        let incident = parse_line(
            "2024-05-12 14:23:11 @@ALERT F240500002 WODO1 ASSIST AMBULANCE 5 HIGH ST WODONGA /ELGIN BVD (12) CWODO",
        )
        .unwrap();
        assert_eq!(incident.description, "ASSIST AMBULANCE 5 HIGH ST WODONGA");
        assert_eq!(incident.location.address, "ASSIST AMBULANCE 5 HIGH ST WODONGA");
        assert_eq!(incident.location.cross_street.as_deref(), Some("ELGIN BVD"));
        assert!(incident.has_tag(TAG_MEDICAL));
    }

    #[test]
    fn identical_lines_share_an_id() {
        let a = parse_line(LINE).unwrap();
        let b = parse_line(LINE).unwrap();
        assert_eq!(a.id, b.id);

        let reissued = parse_line(&LINE.replace("CSEB", "CSEB CMTC")).unwrap();
        assert_ne!(reissued.id, a.id);
        assert_eq!(reissued.reference, a.reference);
    }

    #[test]
    fn severity_tracks_station_count() {
        let line = "2024-05-12 14:23:11 @@ALERT F240500003 MELB1 STRUCTURE FIRE - 1 COLLINS ST MELBOURNE (1) CAAA CBBB CCCC CDDD CEEE CFFF CGGG CHHH CIII [ZZZ]";
        let incident = parse_line(line).unwrap();
        assert_eq!(incident.stations.len(), 10);
        assert_eq!(incident.severity, Severity::Critical);
    }

    #[test]
    fn unanchored_trailing_word_is_not_a_station() {
        let incident =
            parse_line("2024-05-12 14:23:11 @@ALERT F240500004 GEEL3 GRASS FIRE - SHELL PDE CORIO")
                .unwrap();
        assert!(incident.stations.is_empty());
        assert_eq!(incident.location.address, "SHELL PDE CORIO");
    }

    #[test]
    fn empty_payload_is_zero_incidents() {
        assert!(parse("").unwrap().is_empty());
        assert!(parse("\n  \n").unwrap().is_empty());
    }

    #[test]
    fn garbage_payload_is_malformed() {
        let result = parse("<html><body>Service Unavailable</body></html>\nplease retry");
        assert!(matches!(result, Err(FeedError::MalformedFeed { .. })));
    }

    #[test]
    fn bad_lines_are_skipped() {
        let raw = format!("header junk\n{LINE}\n\n");
        let incidents = parse(&raw).unwrap();
        assert_eq!(incidents.len(), 1);
    }

    #[test]
    fn masks_sensitive_text() {
        assert_eq!(
            mask_sensitive("CALLER 0412345678 PEG: AB12 ON SITE"),
            "CALLER 04******** PEG ******** ON SITE"
        );
    }
}
