//! Minimum-interval throttle for upstream feed requests.
//!
//! One request is allowed per [`MIN_INTERVAL`]. Inside that window a small
//! burst of follow-up requests (at most [`MAX_BURST_RETRIES`], each at
//! least [`BURST_COOLDOWN`] after the previous one) is still let through so
//! proxy failover within one logical poll is not fully blocked. The burst
//! counter resets once a request is allowed under the full interval.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use vicalert_incident_models::clock::Clock;

/// Minimum spacing between upstream requests.
pub const MIN_INTERVAL: Duration = Duration::from_secs(15);

/// Minimum spacing between burst requests inside [`MIN_INTERVAL`].
pub const BURST_COOLDOWN: Duration = Duration::from_secs(5);

/// Maximum number of burst requests inside [`MIN_INTERVAL`].
pub const MAX_BURST_RETRIES: u32 = 3;

#[derive(Debug, Default)]
struct LimiterState {
    last_request_ms: Option<i64>,
    burst_count: u32,
}

/// Throttles outbound requests against the upstream feed.
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    min_interval_ms: i64,
    cooldown_ms: i64,
    max_burst: u32,
    state: Mutex<LimiterState>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("min_interval_ms", &self.min_interval_ms)
            .field("cooldown_ms", &self.cooldown_ms)
            .field("max_burst", &self.max_burst)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Creates a limiter with the standard interval, cooldown and burst size.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_limits(clock, MIN_INTERVAL, BURST_COOLDOWN, MAX_BURST_RETRIES)
    }

    /// Creates a limiter with custom limits.
    #[must_use]
    pub fn with_limits(
        clock: Arc<dyn Clock>,
        min_interval: Duration,
        cooldown: Duration,
        max_burst: u32,
    ) -> Self {
        Self {
            clock,
            min_interval_ms: duration_ms(min_interval),
            cooldown_ms: duration_ms(cooldown),
            max_burst,
            state: Mutex::new(LimiterState::default()),
        }
    }

    /// Whether a request may be made now.
    ///
    /// Resets the burst counter when the full interval has elapsed.
    pub fn can_make_request(&self) -> bool {
        let now = self.clock.now_millis();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let Some(last) = state.last_request_ms else {
            state.burst_count = 0;
            return true;
        };

        let since = now - last;
        if since >= self.min_interval_ms {
            state.burst_count = 0;
            return true;
        }

        state.burst_count < self.max_burst && since >= self.cooldown_ms
    }

    /// Records that a request was made now.
    pub fn record_request(&self) {
        let now = self.clock.now_millis();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.last_request_ms = Some(now);
        state.burst_count += 1;
    }
}

fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}
