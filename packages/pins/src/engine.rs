//! Pin lifecycle: creation, persistence, expiry.
//!
//! Pins and the incident snapshot captured for each pin live in the
//! durable store under [`keys::PINNED_INCIDENTS`] and
//! [`keys::PINNED_INCIDENTS_DATA`]. Storage that is missing or corrupt at
//! startup means "no pins". Write failures are logged and the in-memory
//! state stays authoritative for the session.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use vicalert_incident_models::{Incident, PinnedIncident};
use vicalert_storage::{KeyValueStore, keys, load_or_default, save};

use crate::policy::PinPolicy;

/// Minimum spacing between pin-application writes.
pub const UPDATE_THROTTLE: Duration = Duration::from_secs(1);

/// Owns the pin set and its durable representation.
pub struct PinEngine {
    store: Arc<dyn KeyValueStore>,
    policy: Arc<dyn PinPolicy>,
    pins: Vec<PinnedIncident>,
    snapshots: BTreeMap<String, Incident>,
    last_write_ms: Option<i64>,
}

impl std::fmt::Debug for PinEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinEngine")
            .field("pins", &self.pins)
            .field("snapshots", &self.snapshots.len())
            .field("last_write_ms", &self.last_write_ms)
            .finish_non_exhaustive()
    }
}

impl PinEngine {
    /// Restores pin state from `store`.
    #[must_use]
    pub fn load(store: Arc<dyn KeyValueStore>, policy: Arc<dyn PinPolicy>) -> Self {
        let pins: Vec<PinnedIncident> = load_or_default(store.as_ref(), keys::PINNED_INCIDENTS);
        let snapshots: BTreeMap<String, Incident> =
            load_or_default(store.as_ref(), keys::PINNED_INCIDENTS_DATA);

        if !pins.is_empty() {
            log::info!("Restored {} pinned incidents", pins.len());
        }

        Self {
            store,
            policy,
            pins,
            snapshots,
            last_write_ms: None,
        }
    }

    /// All pins, valid or not, in creation order.
    #[must_use]
    pub fn pins(&self) -> &[PinnedIncident] {
        &self.pins
    }

    /// The incident captured when `id` was pinned.
    #[must_use]
    pub fn snapshot(&self, id: &str) -> Option<&Incident> {
        self.snapshots.get(id)
    }

    /// Pins every incident the policy selects that is not already pinned
    /// by id or by non-empty reference.
    ///
    /// New pins from one pass are persisted as one write. A pass that
    /// starts within [`UPDATE_THROTTLE`] of the previous write is skipped
    /// entirely. Returns the number of pins created.
    pub fn apply(&mut self, incidents: &[Incident], now_ms: i64) -> usize {
        if let Some(last) = self.last_write_ms
            && now_ms - last < duration_ms(UPDATE_THROTTLE)
        {
            log::debug!("Skipping pin update, last write {}ms ago", now_ms - last);
            return 0;
        }

        let mut pinned_ids: BTreeSet<String> = self.pins.iter().map(|p| p.id.clone()).collect();
        let mut pinned_refs: BTreeSet<String> = self
            .pins
            .iter()
            .filter_map(|p| self.snapshots.get(&p.id))
            .filter_map(|i| i.reference_key().map(String::from))
            .collect();

        let mut created = 0;
        for incident in incidents {
            if pinned_ids.contains(&incident.id)
                || incident
                    .reference_key()
                    .is_some_and(|r| pinned_refs.contains(r))
            {
                continue;
            }
            let Some(duration) = self.policy.pin_duration(incident) else {
                continue;
            };

            log::info!(
                "Pinning {} ({}) for {}s",
                incident.id,
                incident.reference,
                duration.as_secs()
            );
            self.pins.push(PinnedIncident {
                id: incident.id.clone(),
                pinned_at: now_ms,
                duration: duration_ms(duration),
            });
            self.snapshots
                .insert(incident.id.clone(), incident.clone());
            pinned_ids.insert(incident.id.clone());
            if let Some(reference) = incident.reference_key() {
                pinned_refs.insert(reference.to_string());
            }
            created += 1;
        }

        if created > 0 {
            self.persist();
            self.last_write_ms = Some(now_ms);
        }

        created
    }

    /// Removes every pin with `now_ms >= pinned_at + duration`, along with
    /// its snapshot. Returns the number of pins removed.
    pub fn sweep_expired(&mut self, now_ms: i64) -> usize {
        let before = self.pins.len();
        let mut expired = Vec::new();
        self.pins.retain(|pin| {
            let keep = pin.is_valid_at(now_ms);
            if !keep {
                expired.push(pin.id.clone());
            }
            keep
        });

        for id in &expired {
            self.snapshots.remove(id);
            log::debug!("Pin expired: {id}");
        }

        let removed = before - self.pins.len();
        if removed > 0 {
            self.persist();
        }
        removed
    }

    /// Pins still valid at `now_ms`, in creation order, keeping only the
    /// first pin for any non-empty reference.
    #[must_use]
    pub fn current_valid_pins(&self, now_ms: i64) -> Vec<PinnedIncident> {
        let mut seen_refs = BTreeSet::new();
        self.pins
            .iter()
            .filter(|pin| pin.is_valid_at(now_ms))
            .filter(|pin| {
                self.snapshots
                    .get(&pin.id)
                    .and_then(Incident::reference_key)
                    .is_none_or(|r| seen_refs.insert(r.to_string()))
            })
            .cloned()
            .collect()
    }

    fn persist(&self) {
        if let Err(e) = save(self.store.as_ref(), keys::PINNED_INCIDENTS, &self.pins) {
            log::warn!("Failed to persist pins: {e}");
        }
        if let Err(e) = save(
            self.store.as_ref(),
            keys::PINNED_INCIDENTS_DATA,
            &self.snapshots,
        ) {
            log::warn!("Failed to persist pin snapshots: {e}");
        }
    }
}

fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}
