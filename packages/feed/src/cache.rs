//! Short-lived memo of raw feed responses.
//!
//! Entries live for [`CACHE_TTL`]. An entry whose age has reached the TTL
//! is treated as absent and dropped on the read that notices it. There is
//! no capacity bound; in practice the working set is the single feed URL.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use vicalert_incident_models::clock::Clock;

/// How long a cached response stays fresh.
pub const CACHE_TTL: Duration = Duration::from_secs(20);

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    stored_at_ms: i64,
}

/// TTL cache of raw response text keyed by request URL.
pub struct ResponseCache {
    clock: Arc<dyn Clock>,
    ttl_ms: i64,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("ttl_ms", &self.ttl_ms)
            .finish_non_exhaustive()
    }
}

impl ResponseCache {
    /// Creates a cache with the standard [`CACHE_TTL`].
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_ttl(clock, CACHE_TTL)
    }

    /// Creates a cache with a custom TTL.
    #[must_use]
    pub fn with_ttl(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            clock,
            ttl_ms: i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached value for `key` if it is younger than the TTL.
    pub fn get(&self, key: &str) -> Option<String> {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        let entry = entries.get(key)?;
        if now - entry.stored_at_ms >= self.ttl_ms {
            entries.remove(key);
            return None;
        }

        Some(entry.value.clone())
    }

    /// Stores `value` under `key`, stamped with the current time.
    pub fn set(&self, key: &str, value: String) {
        let stored_at_ms = self.clock.now_millis();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                stored_at_ms,
            },
        );
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of entries currently held, fresh or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use vicalert_incident_models::clock::ManualClock;

    use super::*;

    #[test]
    fn returns_value_before_ttl() {
        let clock = Arc::new(ManualClock::at_millis(0));
        let cache = ResponseCache::new(clock.clone());
        cache.set("feed", "body".to_string());

        clock.set_millis(19_999);
        assert_eq!(cache.get("feed").as_deref(), Some("body"));
    }

    #[test]
    fn evicts_at_ttl() {
        let clock = Arc::new(ManualClock::at_millis(0));
        let cache = ResponseCache::new(clock.clone());
        cache.set("feed", "body".to_string());

        clock.set_millis(20_000);
        assert_eq!(cache.get("feed"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn set_refreshes_timestamp() {
        let clock = Arc::new(ManualClock::at_millis(0));
        let cache = ResponseCache::new(clock.clone());
        cache.set("feed", "old".to_string());
        clock.set_millis(15_000);
        cache.set("feed", "new".to_string());
        clock.set_millis(30_000);
        assert_eq!(cache.get("feed").as_deref(), Some("new"));
    }

    #[test]
    fn missing_key_is_absent() {
        let cache = ResponseCache::new(Arc::new(ManualClock::at_millis(0)));
        assert_eq!(cache.get("nope"), None);
        cache.set("a", "x".to_string());
        cache.clear();
        assert_eq!(cache.get("a"), None);
    }
}
