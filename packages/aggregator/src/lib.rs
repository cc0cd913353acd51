#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! The refresh-cycle state machine.
//!
//! [`Aggregator`] is synchronous and clock driven: the caller starts
//! cycles, hands back fetch results tagged with the cycle generation, and
//! ticks it once per second. [`runner`] drives it from a tokio task.
//!
//! ```text
//! Idle ──begin──▶ Loading ──ok──▶ Ready ──tick/refresh──▶ Loading
//!                  │   ▲
//!             fail │   │ retry (up to MAX_RETRIES)
//!                  ▼   │
//!                (backoff) ──exhausted──▶ Error ──tick/refresh──▶ Loading
//! ```

pub mod merge;
pub mod notify;
pub mod runner;
pub mod view;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum_macros::{AsRefStr, Display};
use vicalert_feed::FeedError;
use vicalert_incident_models::Incident;
use vicalert_incident_models::clock::Clock;
use vicalert_pins::PinEngine;

use crate::merge::{dedup_fresh, merge};
use crate::notify::NotificationSink;
use crate::view::IncidentView;

/// Interval between automatic refreshes.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(30);
/// Failed fetches retried before the error phase.
pub const MAX_RETRIES: u32 = 3;
/// Backoff unit; retry `n` waits `n * RETRY_DELAY`.
pub const RETRY_DELAY: Duration = Duration::from_millis(500);
/// Loading longer than this is reported as stalled.
pub const LOADING_TIMEOUT: Duration = Duration::from_secs(10);

/// Externally visible phase of the refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    /// No cycle has started yet.
    Idle,
    /// A fetch is outstanding or a retry is pending.
    Loading,
    /// The last cycle succeeded.
    Ready,
    /// Retries are exhausted.
    Error,
}

/// Timing knobs, defaulting to the production constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// See [`REFRESH_INTERVAL`]. Whole seconds; the countdown ticks per second.
    pub refresh_interval: Duration,
    /// See [`MAX_RETRIES`].
    pub max_retries: u32,
    /// See [`RETRY_DELAY`].
    pub retry_delay: Duration,
    /// See [`LOADING_TIMEOUT`].
    pub loading_timeout: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            refresh_interval: REFRESH_INTERVAL,
            max_retries: MAX_RETRIES,
            retry_delay: RETRY_DELAY,
            loading_timeout: LOADING_TIMEOUT,
        }
    }
}

/// What became of a fetch result handed to [`Aggregator::complete_cycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A newer cycle was started meanwhile; the result was discarded.
    Superseded,
    /// The incident list was replaced.
    Updated {
        /// Incidents newer than anything in the previous cycle.
        new_incidents: usize,
        /// Pins created from this result.
        pinned: usize,
    },
    /// The fetch failed; call [`Aggregator::retry`] after `delay`.
    RetryScheduled {
        /// Failure count so far, starting at 1.
        attempt: u32,
        /// Backoff before the retry.
        delay: Duration,
    },
    /// The fetch failed and retries are exhausted.
    Failed,
}

/// Merges fetch results with pin state and tracks refresh timing.
pub struct Aggregator {
    clock: Arc<dyn Clock>,
    pins: PinEngine,
    notifier: Arc<dyn NotificationSink>,
    timing: Timing,
    phase: Phase,
    generation: u64,
    in_flight: Option<u64>,
    retry_pending: bool,
    retry_count: u32,
    loading_since_ms: Option<i64>,
    initial_load_pending: bool,
    incidents: Vec<Incident>,
    previous_max: Option<DateTime<Utc>>,
    countdown_secs: u64,
    last_error: Option<String>,
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("phase", &self.phase)
            .field("generation", &self.generation)
            .field("in_flight", &self.in_flight)
            .field("retry_count", &self.retry_count)
            .field("incidents", &self.incidents.len())
            .field("countdown_secs", &self.countdown_secs)
            .finish_non_exhaustive()
    }
}

impl Aggregator {
    /// Creates an aggregator with the production timing.
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        pins: PinEngine,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self::with_timing(clock, pins, notifier, Timing::default())
    }

    /// Creates an aggregator with custom timing.
    #[must_use]
    pub fn with_timing(
        clock: Arc<dyn Clock>,
        pins: PinEngine,
        notifier: Arc<dyn NotificationSink>,
        timing: Timing,
    ) -> Self {
        Self {
            clock,
            pins,
            notifier,
            timing,
            phase: Phase::Idle,
            generation: 0,
            in_flight: None,
            retry_pending: false,
            retry_count: 0,
            loading_since_ms: None,
            initial_load_pending: true,
            incidents: Vec::new(),
            previous_max: None,
            countdown_secs: timing.refresh_interval.as_secs(),
            last_error: None,
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Consecutive failures within the current cycle.
    #[must_use]
    pub const fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// The pin engine, for read access.
    #[must_use]
    pub const fn pins(&self) -> &PinEngine {
        &self.pins
    }

    /// Starts a cycle unless one is already in flight. Returns the
    /// generation the fetch result must be tagged with.
    ///
    /// Every new cycle gets the full retry budget; only [`Self::retry`]
    /// continues counting failures.
    pub fn begin_cycle(&mut self) -> Option<u64> {
        if self.in_flight.is_some() {
            log::debug!("Cycle already in flight, not starting another");
            return None;
        }
        self.retry_count = 0;
        Some(self.start_cycle())
    }

    /// Manual refresh: resets the countdown and the retry counter and
    /// starts a cycle, superseding any cycle in flight.
    pub fn refresh(&mut self) -> u64 {
        if let Some(previous) = self.in_flight {
            log::debug!("Manual refresh supersedes cycle {previous}");
        }
        self.retry_count = 0;
        self.countdown_secs = self.timing.refresh_interval.as_secs();
        self.in_flight = None;
        self.start_cycle()
    }

    /// Starts the retry scheduled by the last failure, if still pending.
    pub fn retry(&mut self) -> Option<u64> {
        if !self.retry_pending || self.in_flight.is_some() {
            return None;
        }
        log::debug!("Retrying fetch (attempt {})", self.retry_count + 1);
        Some(self.start_cycle())
    }

    fn start_cycle(&mut self) -> u64 {
        self.generation += 1;
        self.in_flight = Some(self.generation);
        self.retry_pending = false;
        self.phase = Phase::Loading;
        if self.loading_since_ms.is_none() {
            self.loading_since_ms = Some(self.clock.now_millis());
        }
        self.generation
    }

    /// Applies the result of cycle `generation`.
    pub fn complete_cycle(
        &mut self,
        generation: u64,
        result: Result<Vec<Incident>, FeedError>,
    ) -> CycleOutcome {
        if self.in_flight != Some(generation) {
            log::debug!("Discarding result of superseded cycle {generation}");
            return CycleOutcome::Superseded;
        }
        self.in_flight = None;

        match result {
            Ok(fresh) => self.accept(fresh),
            Err(e) => self.fail(&e),
        }
    }

    fn accept(&mut self, fresh: Vec<Incident>) -> CycleOutcome {
        let fresh = dedup_fresh(fresh);
        let now_ms = self.clock.now_millis();

        let new_incidents = self.previous_max.map_or(0, |max| {
            fresh.iter().filter(|i| i.timestamp > max).count()
        });
        if new_incidents > 0 {
            self.notifier.notify_new_incidents(new_incidents);
        }
        if let Some(max) = fresh.iter().map(|i| i.timestamp).max() {
            self.previous_max = Some(max);
        }

        let pinned = self.pins.apply(&fresh, now_ms);

        if !fresh.is_empty() {
            self.initial_load_pending = false;
        }
        self.incidents = fresh;
        self.phase = Phase::Ready;
        self.retry_count = 0;
        self.loading_since_ms = None;
        self.last_error = None;

        CycleOutcome::Updated {
            new_incidents,
            pinned,
        }
    }

    fn fail(&mut self, error: &FeedError) -> CycleOutcome {
        self.retry_count += 1;

        if self.retry_count <= self.timing.max_retries {
            let delay = self.timing.retry_delay * self.retry_count;
            log::warn!(
                "Fetch failed (attempt {}), retrying in {}ms: {error}",
                self.retry_count,
                delay.as_millis()
            );
            self.retry_pending = true;
            return CycleOutcome::RetryScheduled {
                attempt: self.retry_count,
                delay,
            };
        }

        log::error!(
            "Fetch failed after {} attempts: {error}",
            self.retry_count
        );
        self.phase = Phase::Error;
        self.retry_pending = false;
        self.loading_since_ms = None;
        self.initial_load_pending = false;
        self.last_error = Some(error.to_string());
        CycleOutcome::Failed
    }

    /// One-second heartbeat: sweeps expired pins and advances the
    /// countdown. Returns a generation when the countdown reached zero and
    /// a cycle was started.
    pub fn tick(&mut self) -> Option<u64> {
        self.pins.sweep_expired(self.clock.now_millis());

        self.countdown_secs = self.countdown_secs.saturating_sub(1);
        if self.countdown_secs > 0 {
            return None;
        }

        self.countdown_secs = self.timing.refresh_interval.as_secs();
        log::debug!("Automatic refresh");
        self.begin_cycle()
    }

    /// The merged, sorted view at the current time.
    #[must_use]
    pub fn view(&self) -> IncidentView {
        let now_ms = self.clock.now_millis();
        let valid_pins = self.pins.current_valid_pins(now_ms);
        let merged = merge(&self.incidents, &valid_pins, |id| self.pins.snapshot(id));

        let is_stalled = self.loading_since_ms.is_some_and(|since| {
            u128::try_from(now_ms - since)
                .is_ok_and(|elapsed| elapsed > self.timing.loading_timeout.as_millis())
        });

        IncidentView {
            incidents: merged.unpinned,
            pinned: merged.pinned,
            phase: self.phase,
            is_loading: self.phase == Phase::Loading
                || (self.initial_load_pending && self.phase != Phase::Error),
            is_error: self.phase == Phase::Error,
            is_stalled,
            time_until_refresh: Duration::from_secs(self.countdown_secs),
            last_error: self.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    use chrono::TimeZone as _;
    use vicalert_incident_models::clock::ManualClock;
    use vicalert_incident_models::{Coordinates, Location, Severity};
    use vicalert_pins::DefaultPinPolicy;
    use vicalert_storage::MemoryStore;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        signals: Mutex<Vec<usize>>,
    }

    impl NotificationSink for Recorder {
        fn notify_new_incidents(&self, count: usize) {
            self.signals.lock().unwrap().push(count);
        }
    }

    impl Recorder {
        fn signals(&self) -> Vec<usize> {
            self.signals.lock().unwrap().clone()
        }
    }

    fn incident(id: &str, reference: &str, minute: i64, severity: Severity) -> Incident {
        Incident {
            id: id.to_string(),
            reference: reference.to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 12, 12, 0, 0).unwrap()
                + chrono::Duration::minutes(minute),
            severity,
            location: Location::default(),
            stations: vec![],
            additional_stations: vec![],
            alert_code: "BALL3".to_string(),
            alert_type: "Emergency".to_string(),
            description: "GRASS FIRE".to_string(),
            raw_text: String::new(),
            district: "BALL".to_string(),
            tags: vec![],
            coordinates: Coordinates::UNKNOWN,
        }
    }

    fn aggregator() -> (Arc<ManualClock>, Arc<Recorder>, Aggregator) {
        let clock = Arc::new(ManualClock::at_millis(1_000_000));
        let recorder = Arc::new(Recorder::default());
        let pins = PinEngine::load(Arc::new(MemoryStore::new()), Arc::new(DefaultPinPolicy));
        let aggregator = Aggregator::new(clock.clone(), pins, recorder.clone());
        (clock, recorder, aggregator)
    }

    fn exhausted() -> FeedError {
        FeedError::ProxyExhausted { attempts: 4 }
    }

    #[test]
    fn starts_idle_and_loading() {
        let (_, _, aggregator) = aggregator();
        let view = aggregator.view();
        assert_eq!(view.phase, Phase::Idle);
        assert!(view.is_loading);
        assert_eq!(view.time_until_refresh, REFRESH_INTERVAL);
    }

    #[test]
    fn duplicate_references_collapse_to_most_recent() {
        let (_, _, mut aggregator) = aggregator();
        // 60 incidents in scrambled order, three sharing F123.
        let mut fresh: Vec<Incident> = (0..57)
            .map(|i| {
                let minute = (i * 37) % 57;
                incident(&format!("id{i}"), &format!("F{i:09}"), minute, Severity::Low)
            })
            .collect();
        fresh.insert(10, incident("f123-old", "F123", 5, Severity::Low));
        fresh.insert(30, incident("f123-new", "F123", 70, Severity::Low));
        fresh.push(incident("f123-mid", "F123", 20, Severity::Low));

        let generation = aggregator.begin_cycle().unwrap();
        aggregator.complete_cycle(generation, Ok(fresh));
        let view = aggregator.view();

        let f123: Vec<&Incident> = view.all().filter(|i| i.reference == "F123").collect();
        assert_eq!(f123.len(), 1);
        assert_eq!(f123[0].id, "f123-new");
        assert_eq!(view.all().count(), 58);

        let mut refs = BTreeSet::new();
        assert!(view.all().all(|i| refs.insert(i.reference.clone())));
        assert!(
            view.incidents
                .windows(2)
                .all(|w| w[0].timestamp >= w[1].timestamp)
        );
    }

    #[test]
    fn retries_then_errors_then_manual_refresh_resets() {
        let (_, _, mut aggregator) = aggregator();
        let mut generation = aggregator.begin_cycle().unwrap();

        for (attempt, millis) in [(1, 500), (2, 1_000), (3, 1_500)] {
            assert_eq!(
                aggregator.complete_cycle(generation, Err(exhausted())),
                CycleOutcome::RetryScheduled {
                    attempt,
                    delay: Duration::from_millis(millis),
                }
            );
            assert!(aggregator.view().is_loading);
            assert!(!aggregator.view().is_error);
            generation = aggregator.retry().unwrap();
        }

        assert_eq!(
            aggregator.complete_cycle(generation, Err(exhausted())),
            CycleOutcome::Failed
        );
        let view = aggregator.view();
        assert!(view.is_error);
        assert!(!view.is_loading);
        assert!(view.last_error.unwrap().contains("proxy"));
        assert_eq!(aggregator.retry(), None);

        let generation = aggregator.refresh();
        assert_eq!(aggregator.retry_count(), 0);
        assert_eq!(aggregator.phase(), Phase::Loading);
        assert_eq!(
            aggregator.complete_cycle(generation, Err(exhausted())),
            CycleOutcome::RetryScheduled {
                attempt: 1,
                delay: RETRY_DELAY,
            }
        );
    }

    #[test]
    fn scheduled_refresh_after_error_retries_again() {
        let (_, _, mut aggregator) = aggregator();
        let mut generation = aggregator.begin_cycle().unwrap();
        for _ in 0..MAX_RETRIES {
            aggregator.complete_cycle(generation, Err(exhausted()));
            generation = aggregator.retry().unwrap();
        }
        assert_eq!(
            aggregator.complete_cycle(generation, Err(exhausted())),
            CycleOutcome::Failed
        );
        assert_eq!(aggregator.phase(), Phase::Error);

        let mut scheduled = None;
        for _ in 0..REFRESH_INTERVAL.as_secs() {
            scheduled = scheduled.or(aggregator.tick());
        }
        let generation = scheduled.unwrap();
        assert_eq!(aggregator.phase(), Phase::Loading);
        assert_eq!(aggregator.retry_count(), 0);

        assert_eq!(
            aggregator.complete_cycle(generation, Err(exhausted())),
            CycleOutcome::RetryScheduled {
                attempt: 1,
                delay: RETRY_DELAY,
            }
        );
        assert!(!aggregator.view().is_error);
    }

    #[test]
    fn superseded_result_is_discarded() {
        let (_, recorder, mut aggregator) = aggregator();
        let first = aggregator.begin_cycle().unwrap();
        assert_eq!(aggregator.begin_cycle(), None);
        let second = aggregator.refresh();

        let stale = vec![incident("stale", "", 1, Severity::Low)];
        assert_eq!(
            aggregator.complete_cycle(first, Ok(stale)),
            CycleOutcome::Superseded
        );
        assert_eq!(aggregator.phase(), Phase::Loading);

        let fresh = vec![incident("fresh", "", 2, Severity::Low)];
        aggregator.complete_cycle(second, Ok(fresh));
        assert_eq!(aggregator.view().incidents[0].id, "fresh");
        assert!(recorder.signals().is_empty());
    }

    #[test]
    fn superseded_failure_does_not_count() {
        let (_, _, mut aggregator) = aggregator();
        let first = aggregator.begin_cycle().unwrap();
        aggregator.refresh();
        assert_eq!(
            aggregator.complete_cycle(first, Err(exhausted())),
            CycleOutcome::Superseded
        );
        assert_eq!(aggregator.retry_count(), 0);
    }

    #[test]
    fn one_signal_per_cycle_with_newer_incidents() {
        let (_, recorder, mut aggregator) = aggregator();

        let g = aggregator.begin_cycle().unwrap();
        aggregator.complete_cycle(g, Ok(vec![incident("a", "", 10, Severity::Low)]));
        assert!(recorder.signals().is_empty());

        let g = aggregator.refresh();
        let outcome = aggregator.complete_cycle(
            g,
            Ok(vec![
                incident("a", "", 10, Severity::Low),
                incident("b", "", 11, Severity::Low),
                incident("c", "", 12, Severity::Low),
            ]),
        );
        assert_eq!(
            outcome,
            CycleOutcome::Updated {
                new_incidents: 2,
                pinned: 0,
            }
        );
        assert_eq!(recorder.signals(), vec![2]);

        let g = aggregator.refresh();
        aggregator.complete_cycle(g, Ok(vec![incident("b", "", 11, Severity::Low)]));
        assert_eq!(recorder.signals(), vec![2]);
    }

    #[test]
    fn first_load_stays_loading_until_non_empty() {
        let (_, _, mut aggregator) = aggregator();
        let g = aggregator.begin_cycle().unwrap();
        aggregator.complete_cycle(g, Ok(vec![]));

        let view = aggregator.view();
        assert_eq!(view.phase, Phase::Ready);
        assert!(view.is_loading);

        let g = aggregator.refresh();
        aggregator.complete_cycle(g, Ok(vec![incident("a", "", 1, Severity::Low)]));
        assert!(!aggregator.view().is_loading);

        // Later empty results do not bring the indicator back.
        let g = aggregator.refresh();
        aggregator.complete_cycle(g, Ok(vec![]));
        assert!(!aggregator.view().is_loading);
    }

    #[test]
    fn countdown_triggers_refresh() {
        let (_, _, mut aggregator) = aggregator();
        let g = aggregator.begin_cycle().unwrap();
        aggregator.complete_cycle(g, Ok(vec![]));

        for _ in 0..29 {
            assert_eq!(aggregator.tick(), None);
        }
        assert_eq!(aggregator.view().time_until_refresh, Duration::from_secs(1));
        assert!(aggregator.tick().is_some());
        assert_eq!(aggregator.view().time_until_refresh, REFRESH_INTERVAL);

        // In flight at the next zero: countdown resets, no second cycle.
        for _ in 0..29 {
            aggregator.tick();
        }
        assert_eq!(aggregator.tick(), None);
        assert_eq!(aggregator.view().time_until_refresh, REFRESH_INTERVAL);
    }

    #[test]
    fn manual_refresh_resets_countdown() {
        let (_, _, mut aggregator) = aggregator();
        for _ in 0..10 {
            aggregator.tick();
        }
        aggregator.refresh();
        assert_eq!(aggregator.view().time_until_refresh, REFRESH_INTERVAL);
    }

    #[test]
    fn pinned_incident_outlives_feed_until_expiry() {
        let (clock, _, mut aggregator) = aggregator();
        let g = aggregator.begin_cycle().unwrap();
        let outcome = aggregator.complete_cycle(
            g,
            Ok(vec![
                incident("big", "F500", 1, Severity::High),
                incident("small", "F501", 2, Severity::Low),
            ]),
        );
        assert!(matches!(outcome, CycleOutcome::Updated { pinned: 1, .. }));

        clock.advance(Duration::from_secs(60));
        let g = aggregator.refresh();
        aggregator.complete_cycle(g, Ok(vec![incident("next", "F502", 3, Severity::Low)]));

        let view = aggregator.view();
        assert_eq!(view.pinned.len(), 1);
        assert_eq!(view.pinned[0].id, "big");
        assert_eq!(view.incidents.len(), 1);

        clock.advance(Duration::from_secs(15 * 60));
        aggregator.tick();
        assert!(aggregator.view().pinned.is_empty());
        assert!(aggregator.pins().pins().is_empty());
    }

    #[test]
    fn reports_stalled_load() {
        let (clock, _, mut aggregator) = aggregator();
        aggregator.begin_cycle();
        clock.advance(Duration::from_secs(10));
        assert!(!aggregator.view().is_stalled);
        clock.advance(Duration::from_millis(1));
        assert!(aggregator.view().is_stalled);
    }

    #[test]
    fn rate_limited_is_retried_like_any_failure() {
        let (_, _, mut aggregator) = aggregator();
        let g = aggregator.begin_cycle().unwrap();
        assert!(matches!(
            aggregator.complete_cycle(g, Err(FeedError::RateLimited)),
            CycleOutcome::RetryScheduled { attempt: 1, .. }
        ));
    }
}
