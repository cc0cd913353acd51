//! Combining live incidents with pinned ones.
//!
//! Invariant of every [`Merged`]: no two entries across both lists share a
//! non-empty reference, and each list is sorted newest first.

use std::collections::BTreeSet;

use vicalert_incident_models::{Incident, PinnedIncident};

/// Pinned and unpinned incidents, each sorted newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Merged {
    /// Incidents held on screen by a valid pin.
    pub pinned: Vec<Incident>,
    /// Everything else from the live feed.
    pub unpinned: Vec<Incident>,
}

/// Sorts newest first. Ties keep their relative order.
pub fn sort_newest_first(incidents: &mut [Incident]) {
    incidents.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}

/// Drops repeated ids and repeated non-empty references from one fetch,
/// keeping the most recent incident of each group. Output is newest first.
#[must_use]
pub fn dedup_fresh(mut incidents: Vec<Incident>) -> Vec<Incident> {
    sort_newest_first(&mut incidents);

    let mut ids = BTreeSet::new();
    let mut references = BTreeSet::new();
    incidents.retain(|incident| {
        if !ids.insert(incident.id.clone()) {
            return false;
        }
        match incident.reference_key() {
            Some(reference) => references.insert(reference.to_string()),
            None => true,
        }
    });
    incidents
}

/// Merges `fresh` with the currently valid pins.
///
/// Each pin resolves to the live incident with the same id, or to its
/// snapshot when the feed no longer carries it. Pins that resolve to
/// nothing are dropped. The pinned list keeps the first incident per
/// reference; the unpinned list excludes anything pinned by id or
/// reference.
pub fn merge<'a>(
    fresh: &[Incident],
    valid_pins: &[PinnedIncident],
    snapshot: impl Fn(&str) -> Option<&'a Incident>,
) -> Merged {
    let mut pinned_refs = BTreeSet::new();
    let mut pinned = Vec::with_capacity(valid_pins.len());

    for pin in valid_pins {
        let resolved = fresh
            .iter()
            .find(|incident| incident.id == pin.id)
            .or_else(|| snapshot(&pin.id));
        let Some(incident) = resolved else {
            log::debug!("Pin {} has neither a live incident nor a snapshot", pin.id);
            continue;
        };
        if let Some(reference) = incident.reference_key()
            && !pinned_refs.insert(reference.to_string())
        {
            continue;
        }
        pinned.push(incident.clone());
    }

    let pinned_ids: BTreeSet<&str> = valid_pins.iter().map(|p| p.id.as_str()).collect();
    let mut unpinned: Vec<Incident> = fresh
        .iter()
        .filter(|incident| !pinned_ids.contains(incident.id.as_str()))
        .filter(|incident| {
            incident
                .reference_key()
                .is_none_or(|r| !pinned_refs.contains(r))
        })
        .cloned()
        .collect();

    sort_newest_first(&mut pinned);
    sort_newest_first(&mut unpinned);

    Merged { pinned, unpinned }
}
