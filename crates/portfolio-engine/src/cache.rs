use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Time source for cache expiry.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Used to exercise expiry without sleeping.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }
}

/// Internal cache entry with timestamp
struct CacheEntry<V> {
    data: V,
    cached_at: DateTime<Utc>,
}

/// Keyed cache whose entries expire `ttl` after insertion.
pub struct TtlCache<V> {
    entries: DashMap<String, CacheEntry<V>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh value for `key`, if any. Expired entries are treated as misses.
    pub fn get(&self, key: &str) -> Option<V> {
        let entry = self.entries.get(key)?;
        if self.clock.now() - entry.cached_at < self.ttl {
            Some(entry.data.clone())
        } else {
            None
        }
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                data: value,
                cached_at: self.clock.now(),
            },
        );
    }

    /// Drop expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| now - entry.cached_at < self.ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()))
    }

    #[test]
    fn test_hit_before_expiry() {
        let clock = clock();
        let cache: TtlCache<f64> = TtlCache::new(Duration::hours(24), clock.clone());
        cache.insert("SPY", 1.5);
        clock.advance(Duration::hours(23));
        assert_eq!(cache.get("SPY"), Some(1.5));
    }

    #[test]
    fn test_miss_after_expiry() {
        let clock = clock();
        let cache: TtlCache<f64> = TtlCache::new(Duration::days(7), clock.clone());
        cache.insert("AAPL", 1.2);
        clock.advance(Duration::days(7));
        assert_eq!(cache.get("AAPL"), None);
        assert_eq!(cache.get("MSFT"), None);
    }

    #[test]
    fn test_reinsert_refreshes_timestamp() {
        let clock = clock();
        let cache: TtlCache<u32> = TtlCache::new(Duration::hours(1), clock.clone());
        cache.insert("k", 1);
        clock.advance(Duration::minutes(50));
        cache.insert("k", 2);
        clock.advance(Duration::minutes(50));
        assert_eq!(cache.get("k"), Some(2));
    }

    #[test]
    fn test_purge_expired() {
        let clock = clock();
        let cache: TtlCache<u32> = TtlCache::new(Duration::hours(1), clock.clone());
        cache.insert("old", 1);
        clock.advance(Duration::hours(2));
        cache.insert("new", 2);
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("new"), Some(2));
        assert_eq!(cache.purge_expired(), 0);
    }
}
