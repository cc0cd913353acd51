//! What the presentation layer sees.

use std::time::Duration;

use serde::Serialize;
use vicalert_incident_models::Incident;

use crate::Phase;

/// Unpinned incidents shown per page.
pub const PAGE_SIZE: usize = 50;

/// A consistent snapshot of the aggregator's output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentView {
    /// Unpinned incidents, newest first.
    pub incidents: Vec<Incident>,
    /// Pinned incidents, newest first. Always shown in full.
    pub pinned: Vec<Incident>,
    /// Current state machine phase.
    pub phase: Phase,
    /// Whether a loading indicator should be shown.
    pub is_loading: bool,
    /// Whether retries are exhausted and a manual retry is offered.
    pub is_error: bool,
    /// Whether the current load has outlasted the loading timeout.
    pub is_stalled: bool,
    /// Time left before the next automatic refresh.
    #[serde(serialize_with = "serialize_secs")]
    pub time_until_refresh: Duration,
    /// Message of the failure that put the aggregator in the error phase.
    pub last_error: Option<String>,
}

fn serialize_secs<S: serde::Serializer>(
    value: &Duration,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_secs())
}

/// One page of a view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Page<'a> {
    /// All pinned incidents.
    pub pinned: &'a [Incident],
    /// The unpinned incidents on this page.
    pub incidents: &'a [Incident],
    /// Zero-based page index actually shown.
    pub page: usize,
    /// Number of pages, at least one.
    pub total_pages: usize,
}

impl IncidentView {
    /// Number of unpinned pages. An empty list still has one (empty) page.
    #[must_use]
    pub fn total_pages(&self) -> usize {
        if self.incidents.is_empty() {
            1
        } else {
            self.incidents.len().div_ceil(PAGE_SIZE)
        }
    }

    /// Returns page `page` (zero-based), clamped to the last page.
    #[must_use]
    pub fn page(&self, page: usize) -> Page<'_> {
        let total_pages = self.total_pages();
        let page = page.min(total_pages - 1);
        let start = (page * PAGE_SIZE).min(self.incidents.len());
        let end = (start + PAGE_SIZE).min(self.incidents.len());

        Page {
            pinned: &self.pinned,
            incidents: &self.incidents[start..end],
            page,
            total_pages,
        }
    }

    /// Pinned incidents followed by unpinned ones.
    pub fn all(&self) -> impl Iterator<Item = &Incident> {
        self.pinned.iter().chain(&self.incidents)
    }
}
