//! Time-bounded in-memory cache for post insights
//!
//! Entries expire lazily: an entry older than the TTL is simply treated as
//! absent on lookup and replaced by the next successful fetch. Nothing sweeps
//! the map in the background.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::types::PostMetrics;

/// Source of "now" for cache expiry
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
///
/// Clones share the same time, so a test can keep one handle and pass
/// another into the client.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    metrics: PostMetrics,
    fetched_at: Instant,
}

/// Insights cache keyed by post id
pub struct InsightsCache {
    entries: HashMap<String, CacheEntry>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for InsightsCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InsightsCache")
            .field("entries", &self.entries.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl InsightsCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Metrics for `post_id` if fetched no longer than the TTL ago
    pub fn get(&self, post_id: &str) -> Option<PostMetrics> {
        let entry = self.entries.get(post_id)?;
        let age = self.clock.now().saturating_duration_since(entry.fetched_at);
        if age <= self.ttl {
            Some(entry.metrics.clone())
        } else {
            None
        }
    }

    /// Record freshly fetched metrics, stamped with the current time
    pub fn insert(&mut self, post_id: impl Into<String>, metrics: PostMetrics) {
        let fetched_at = self.clock.now();
        self.entries.insert(
            post_id.into(),
            CacheEntry {
                metrics,
                fetched_at,
            },
        );
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(views: u64) -> PostMetrics {
        PostMetrics {
            views,
            ..PostMetrics::default()
        }
    }

    fn cache_with_clock(ttl: Duration) -> (InsightsCache, ManualClock) {
        let clock = ManualClock::new();
        let cache = InsightsCache::with_clock(ttl, Arc::new(clock.clone()));
        (cache, clock)
    }

    #[test]
    fn test_miss_on_unknown_id() {
        let (cache, _clock) = cache_with_clock(Duration::from_secs(60));
        assert!(cache.get("missing").is_none());
    }

    #[test]
    fn test_hit_within_ttl() {
        let (mut cache, clock) = cache_with_clock(Duration::from_secs(60));
        cache.insert("a", metrics(10));

        clock.advance(Duration::from_secs(59));
        assert_eq!(cache.get("a"), Some(metrics(10)));
    }

    #[test]
    fn test_entry_at_exact_ttl_is_still_valid() {
        let (mut cache, clock) = cache_with_clock(Duration::from_secs(60));
        cache.insert("a", metrics(10));

        clock.advance(Duration::from_secs(60));
        assert!(cache.get("a").is_some());
    }

    #[test]
    fn test_expired_entry_is_absent_but_not_removed() {
        let (mut cache, clock) = cache_with_clock(Duration::from_secs(60));
        cache.insert("a", metrics(10));

        clock.advance(Duration::from_secs(61));
        assert!(cache.get("a").is_none());
        assert_eq!(cache.len(), 1, "Expiry is lazy, nothing is swept");
    }

    #[test]
    fn test_reinsert_refreshes_timestamp() {
        let (mut cache, clock) = cache_with_clock(Duration::from_secs(60));
        cache.insert("a", metrics(10));
        clock.advance(Duration::from_secs(61));

        cache.insert("a", metrics(20));
        clock.advance(Duration::from_secs(30));
        assert_eq!(cache.get("a"), Some(metrics(20)));
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::new();
        let other = clock.clone();
        let before = other.now();
        clock.advance(Duration::from_secs(5));
        assert_eq!(other.now() - before, Duration::from_secs(5));
    }
}
