//! Which incidents get pinned, and for how long.

use std::time::Duration;

use vicalert_incident_models::{Incident, Severity};

/// Pin window for high severity incidents.
pub const HIGH_PIN: Duration = Duration::from_secs(15 * 60);
/// Pin window for extreme severity incidents.
pub const EXTREME_PIN: Duration = Duration::from_secs(30 * 60);
/// Pin window for critical severity incidents.
pub const CRITICAL_PIN: Duration = Duration::from_secs(60 * 60);
/// Pin window for code 1 emergency structure fires below high severity.
pub const STRUCTURE_FIRE_PIN: Duration = Duration::from_secs(15 * 60);

/// Decides pinning for a single incident.
pub trait PinPolicy: Send + Sync {
    /// How long `incident` should stay pinned, or `None` if it should not
    /// be pinned at all.
    fn pin_duration(&self, incident: &Incident) -> Option<Duration>;

    /// Whether `incident` should be pinned.
    fn should_pin(&self, incident: &Incident) -> bool {
        self.pin_duration(incident).is_some()
    }
}

/// Pins high, extreme and critical incidents, plus code 1 emergency
/// structure fires of any severity.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPinPolicy;

impl DefaultPinPolicy {
    fn is_urgent_structure_fire(incident: &Incident) -> bool {
        incident.is_code1()
            && incident.alert_type == "Emergency"
            && incident.description.to_uppercase().contains("STRUCTURE FIRE")
    }
}

impl PinPolicy for DefaultPinPolicy {
    fn pin_duration(&self, incident: &Incident) -> Option<Duration> {
        match incident.severity {
            Severity::Critical => Some(CRITICAL_PIN),
            Severity::Extreme => Some(EXTREME_PIN),
            Severity::High => Some(HIGH_PIN),
            Severity::Pending | Severity::Low | Severity::Medium => {
                Self::is_urgent_structure_fire(incident).then_some(STRUCTURE_FIRE_PIN)
            }
        }
    }
}
