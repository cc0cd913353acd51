//! Plain-text rendering of incidents and views.

use std::fmt::Write as _;

use vicalert_aggregator::view::{IncidentView, Page};
use vicalert_feed::parser::mask_sensitive;
use vicalert_incident_models::Incident;

/// One incident per line: time, severity, reference, description, place.
pub fn incident_line(incident: &Incident) -> String {
    let mut line = format!(
        "{} {:<8} {:<10} {}",
        incident.timestamp.format("%H:%M:%S"),
        incident.severity.as_ref(),
        incident.reference_key().unwrap_or("-"),
        mask_sensitive(&incident.description),
    );

    if incident.location.address != incident.description {
        let _ = write!(line, " @ {}", incident.location.address);
    }
    if let Some(cross) = &incident.location.cross_street {
        let _ = write!(line, " / {cross}");
    }
    if !incident.stations.is_empty() {
        let _ = write!(line, " [{}]", incident.stations.join(" "));
    }

    line
}

/// Summary of the aggregator state for the header line.
pub fn status_line(view: &IncidentView) -> String {
    if view.is_error {
        let message = view.last_error.as_deref().unwrap_or("unknown error");
        return format!("Feed unavailable: {message}. Press r to retry.");
    }
    if view.is_stalled {
        return "Still loading... the feed is taking longer than usual.".to_string();
    }
    if view.is_loading {
        return "Loading incidents...".to_string();
    }
    format!(
        "{} incidents, {} pinned. Next refresh in {}s.",
        view.incidents.len(),
        view.pinned.len(),
        view.time_until_refresh.as_secs()
    )
}

/// Writes a page of `view` as text.
pub fn page_text(view: &IncidentView, page: &Page<'_>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", status_line(view));

    if !page.pinned.is_empty() {
        let _ = writeln!(out, "\nPinned");
        for incident in page.pinned {
            let _ = writeln!(out, "  {}", incident_line(incident));
        }
    }

    if !page.incidents.is_empty() {
        let _ = writeln!(
            out,
            "\nIncidents (page {}/{})",
            page.page + 1,
            page.total_pages
        );
        for incident in page.incidents {
            let _ = writeln!(out, "  {}", incident_line(incident));
        }
    }

    out
}

/// Prints page `page` of `view` to stdout.
pub fn print_page(view: &IncidentView, page: usize) {
    print!("{}", page_text(view, &view.page(page)));
}
