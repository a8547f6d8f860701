//! Time-to-live memoization of data source results.
//!
//! Every key owns its own async mutex, so concurrent requests for the same
//! key collapse into a single fetch while other keys proceed independently.
//! Expired and empty slots are pruned whenever a key is looked up; there is
//! no background sweep.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::clock::Clock;
use crate::resolution::Bucket;
use crate::window::Window;

/// Ttl for windowed series.
pub const SERIES_TTL_SECS: i64 = 60;
/// Ttl for the latest-reading lookup.
pub const LATEST_TTL_SECS: i64 = 30;
/// Window lower bounds are floored to this many seconds when building keys.
pub const KEY_GRANULARITY_SECS: i64 = 60;

/// A stored value and when it was fetched.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub fetched_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    /// Valid only while `now - fetched_at < ttl`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now - self.fetched_at < self.ttl
    }
}

/// Cache key for a windowed series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeriesKey {
    pub lower_epoch: i64,
    pub unbounded: bool,
    /// End of a fixed custom range; sliding windows leave this empty.
    pub upper_epoch: Option<i64>,
    pub bucket: Bucket,
}

impl SeriesKey {
    pub fn new(window: &Window, bucket: Bucket) -> Self {
        Self {
            lower_epoch: floor_to(window.start().timestamp(), KEY_GRANULARITY_SECS),
            unbounded: window.is_unbounded(),
            upper_epoch: window
                .fixed_upper
                .then(|| floor_to(window.upper.timestamp(), KEY_GRANULARITY_SECS)),
            bucket,
        }
    }
}

fn floor_to(epoch: i64, granularity: i64) -> i64 {
    epoch.div_euclid(granularity) * granularity
}

type Slot<V> = Arc<tokio::sync::Mutex<Option<CacheEntry<V>>>>;

struct Slots<K, V> {
    generation: u64,
    entries: HashMap<K, Slot<V>>,
}

/// Keyed ttl cache with an injected clock.
pub struct QueryCache<K, V> {
    clock: Arc<dyn Clock>,
    ttl: Duration,
    slots: Mutex<Slots<K, V>>,
}

impl<K, V> QueryCache<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            clock,
            ttl,
            slots: Mutex::new(Slots {
                generation: 0,
                entries: HashMap::new(),
            }),
        }
    }

    /// Returns the live entry for `key`, or runs `fetch` and stores its result.
    ///
    /// Failed fetches are returned to the caller and leave nothing behind.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: K, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let (slot, generation) = self.slot(&key);
        let mut entry = slot.lock().await;

        if let Some(cached) = entry.as_ref() {
            if cached.is_live(self.clock.now()) {
                debug!(?key, "cache hit");
                return Ok(cached.value.clone());
            }
            debug!(?key, fetched_at = %cached.fetched_at, "cache entry expired");
            *entry = None;
        }

        debug!(?key, "cache miss, fetching");
        let value = fetch().await?;

        if self.generation() == generation {
            *entry = Some(CacheEntry {
                value: value.clone(),
                fetched_at: self.clock.now(),
                ttl: self.ttl,
            });
        } else {
            debug!(?key, "cache refreshed during fetch, result not stored");
        }

        Ok(value)
    }

    /// Drops every entry; the next access of any key fetches again.
    pub fn refresh(&self) {
        let mut slots = self.lock();
        slots.generation += 1;
        slots.entries.clear();
        debug!(generation = slots.generation, "cache cleared");
    }

    /// Number of live entries. Keys with a fetch in flight are not counted.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.lock()
            .entries
            .values()
            .filter(|slot| {
                slot.try_lock()
                    .map(|entry| entry.as_ref().is_some_and(|e| e.is_live(now)))
                    .unwrap_or(false)
            })
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, key: &K) -> (Slot<V>, u64) {
        let now = self.clock.now();
        let mut slots = self.lock();
        let generation = slots.generation;
        slots.entries.retain(|_, slot| is_occupied(slot, now));
        let slot = slots.entries.entry(key.clone()).or_default().clone();
        (slot, generation)
    }

    fn generation(&self) -> u64 {
        self.lock().generation
    }

    fn lock(&self) -> MutexGuard<'_, Slots<K, V>> {
        // The map holds no invariants a panicking holder could break.
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// False for slots nobody else holds whose entry is missing or expired.
///
/// Handles are only cloned under the map lock, so a slot with no other
/// holder cannot be picked up while it is being dropped.
fn is_occupied<V>(slot: &Slot<V>, now: DateTime<Utc>) -> bool {
    if Arc::strong_count(slot) > 1 {
        return true;
    }
    slot.try_lock()
        .map(|entry| entry.as_ref().is_some_and(|e| e.is_live(now)))
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::window::WindowSelection;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap()
    }

    fn cache(clock: &ManualClock) -> QueryCache<&'static str, u32> {
        QueryCache::new(Arc::new(clock.clone()), Duration::seconds(SERIES_TTL_SECS))
    }

    async fn counted(calls: &AtomicUsize, value: u32) -> Result<u32, String> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(value)
    }

    #[tokio::test]
    async fn test_hit_within_ttl_fetches_once() {
        let clock = ManualClock::new(start());
        let cache = cache(&clock);
        let calls = AtomicUsize::new(0);

        let first = cache.get_or_fetch("week", || counted(&calls, 1)).await.unwrap();
        clock.advance(Duration::seconds(59));
        let second = cache.get_or_fetch("week", || counted(&calls, 2)).await.unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_fetches_again() {
        let clock = ManualClock::new(start());
        let cache = cache(&clock);
        let calls = AtomicUsize::new(0);

        cache.get_or_fetch("week", || counted(&calls, 1)).await.unwrap();
        // exactly ttl old is already stale
        clock.advance(Duration::seconds(60));
        let value = cache.get_or_fetch("week", || counted(&calls, 2)).await.unwrap();

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refresh_forces_fetch_within_ttl() {
        let clock = ManualClock::new(start());
        let cache = cache(&clock);
        let calls = AtomicUsize::new(0);

        cache.get_or_fetch("week", || counted(&calls, 1)).await.unwrap();
        cache.refresh();
        assert!(cache.is_empty());
        let value = cache.get_or_fetch("week", || counted(&calls, 2)).await.unwrap();

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let clock = ManualClock::new(start());
        let cache = cache(&clock);
        let calls = AtomicUsize::new(0);

        let tally = &calls;
        let failed = cache
            .get_or_fetch("week", move || async move {
                tally.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>("offline".to_string())
            })
            .await;
        let value = cache.get_or_fetch("week", || counted(&calls, 7)).await;

        assert_eq!(failed, Err("offline".to_string()));
        assert_eq!(value, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_fetch() {
        let clock = ManualClock::new(start());
        let cache = cache(&clock);
        let calls = AtomicUsize::new(0);

        let tally = &calls;
        let slow = move || async move {
            tally.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok::<u32, String>(5)
        };

        let (a, b) = tokio::join!(cache.get_or_fetch("day", slow), cache.get_or_fetch("day", slow));

        assert_eq!(a, Ok(5));
        assert_eq!(b, Ok(5));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_fetch_separately() {
        let clock = ManualClock::new(start());
        let cache = cache(&clock);
        let calls = AtomicUsize::new(0);

        cache.get_or_fetch("day", || counted(&calls, 1)).await.unwrap();
        cache.get_or_fetch("week", || counted(&calls, 2)).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_expired_and_failed_slots_are_dropped() {
        let clock = ManualClock::new(start());
        let cache: QueryCache<i64, u32> =
            QueryCache::new(Arc::new(clock.clone()), Duration::seconds(SERIES_TTL_SECS));

        for minute in 0..1440 {
            cache.get_or_fetch(minute, || async { Ok::<u32, String>(1) }).await.unwrap();
            clock.advance(Duration::seconds(60));
        }
        let _ = cache
            .get_or_fetch(-1, || async { Err::<u32, _>("offline".to_string()) })
            .await;
        cache.get_or_fetch(-2, || async { Ok::<u32, String>(2) }).await.unwrap();

        assert_eq!(cache.lock().entries.len(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_series_key_floors_lower_bound() {
        let project_start = Utc.with_ymd_and_hms(2025, 6, 30, 0, 0, 0).unwrap();
        let a = Window::sliding(WindowSelection::Last24Hours, start(), project_start);
        let b = Window::sliding(
            WindowSelection::Last24Hours,
            start() + Duration::seconds(45),
            project_start,
        );
        let c = Window::sliding(
            WindowSelection::Last24Hours,
            start() + Duration::seconds(61),
            project_start,
        );

        assert_eq!(SeriesKey::new(&a, Bucket::Raw), SeriesKey::new(&b, Bucket::Raw));
        assert_ne!(SeriesKey::new(&a, Bucket::Raw), SeriesKey::new(&c, Bucket::Raw));
        assert_ne!(SeriesKey::new(&a, Bucket::Raw), SeriesKey::new(&a, Bucket::Hourly));
    }

    #[test]
    fn test_series_key_marks_unbounded() {
        let project_start = Utc.with_ymd_and_hms(2025, 6, 30, 0, 0, 0).unwrap();
        let all = Window::sliding(WindowSelection::AllData, start(), project_start);
        let key = SeriesKey::new(&all, Bucket::Daily);

        assert!(key.unbounded);
        assert_eq!(key.lower_epoch, project_start.timestamp());
        assert_eq!(key.upper_epoch, None);
    }
}
