//! Capacity- and time-bounded key/value cache with LRU eviction
//!
//! Entries live in an unbounded [`LruCache`] whose recency order drives
//! eviction. Capacity is enforced here rather than by the LRU itself, so a
//! full cache first sweeps expired entries and only then evicts a live one.
//! The sweep remembers the oldest surviving insertion time and is skipped
//! until that entry could have expired, keeping steady-state `set` O(1).
//! Expiry is otherwise checked lazily on access, and an optional background
//! [`CacheSweeper`] can purge expired entries on an interval. An expired
//! entry is never returned as a hit, whichever path removes it.

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use lru::LruCache;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::error::ResilienceError;

/// Configuration for cache behavior
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Maximum number of live entries before LRU eviction
    pub max_size: usize,
    /// Lifetime of an entry, measured from its last `set`
    pub ttl: Duration,
    /// When false, `get` always misses and `set` is a no-op
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            ttl: Duration::from_secs(3600), // 1 hour
            enabled: true,
        }
    }
}

/// Snapshot of cache counters
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    /// Entries physically resident (expired entries not yet swept included)
    pub size: usize,
    /// Lookups that returned a live entry
    pub hits: u64,
    /// Lookups that found nothing, or found an expired entry
    pub misses: u64,
    /// Live entries removed to make room for a new key
    pub evictions: u64,
    /// Entries removed because their TTL elapsed
    pub expirations: u64,
    /// Configured capacity
    pub max_size: usize,
    /// Configured TTL
    pub ttl: Duration,
    /// Whether the cache is enabled
    pub enabled: bool,
}

impl CacheStats {
    /// Fraction of lookups that hit, 0.0 when nothing was looked up yet
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

fn is_expired(inserted_at: Instant, now: Instant, ttl: Duration) -> bool {
    now.saturating_duration_since(inserted_at) >= ttl
}

fn short_key(key: &str) -> &str {
    key.get(..16).unwrap_or(key)
}

struct CacheInner<V> {
    entries: LruCache<String, CacheEntry<V>>,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
    /// Oldest insertion time left by the last sweep (None = unknown)
    oldest_live: Option<Instant>,
}

impl<V> CacheInner<V> {
    fn new() -> Self {
        Self {
            entries: LruCache::unbounded(),
            hits: 0,
            misses: 0,
            evictions: 0,
            expirations: 0,
            oldest_live: None,
        }
    }

    /// Whether a full sweep could find anything expired
    fn sweep_due(&self, now: Instant, ttl: Duration) -> bool {
        self.oldest_live
            .map_or(true, |oldest| is_expired(oldest, now, ttl))
    }

    fn purge(&mut self, now: Instant, ttl: Duration) -> usize {
        let mut expired = Vec::new();
        let mut oldest_live: Option<Instant> = None;
        for (key, entry) in self.entries.iter() {
            if is_expired(entry.inserted_at, now, ttl) {
                expired.push(key.clone());
            } else {
                oldest_live = Some(oldest_live.map_or(entry.inserted_at, |t| t.min(entry.inserted_at)));
            }
        }
        self.oldest_live = oldest_live;
        for key in &expired {
            self.entries.pop(key);
        }
        self.expirations += expired.len() as u64;
        expired.len()
    }
}

/// A thread-safe TTL + LRU cache keyed by string fingerprints
///
/// # Example
/// ```
/// use quill_core_resilience::{CacheConfig, TtlCache};
/// use std::time::Duration;
///
/// let cache = TtlCache::new(CacheConfig {
///     max_size: 2,
///     ttl: Duration::from_secs(60),
///     enabled: true,
/// });
///
/// cache.set("a", 1);
/// cache.set("b", 2);
/// assert_eq!(cache.get("a"), Some(1));
///
/// // "b" is now least recently used and makes room for "c"
/// cache.set("c", 3);
/// assert_eq!(cache.get("b"), None);
/// ```
pub struct TtlCache<V> {
    config: CacheConfig,
    inner: Mutex<CacheInner<V>>,
}

impl<V: Clone> TtlCache<V> {
    /// Create a new cache
    ///
    /// A `max_size` of zero or a zero `ttl` are accepted: both yield a cache
    /// that never reports a hit.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(CacheInner::new()),
        }
    }

    /// Create a cache with default configuration
    pub fn new_default() -> Self {
        Self::new(CacheConfig::default())
    }

    /// The configuration this cache was built with
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a live entry, marking it most recently used on a hit
    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    /// Insert or replace an entry with a fresh insertion time
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_at(key.into(), value, Instant::now());
    }

    pub(crate) fn get_at(&self, key: &str, now: Instant) -> Option<V> {
        let mut inner = self.inner.lock();

        if !self.config.enabled {
            inner.misses += 1;
            return None;
        }

        let ttl = self.config.ttl;
        let Some(expired) = inner
            .entries
            .peek(key)
            .map(|entry| is_expired(entry.inserted_at, now, ttl))
        else {
            inner.misses += 1;
            trace!("Cache miss: {}", short_key(key));
            return None;
        };

        if expired {
            inner.entries.pop(key);
            inner.expirations += 1;
            inner.misses += 1;
            debug!("Cache entry expired: {}", short_key(key));
            return None;
        }

        inner.hits += 1;
        debug!("Cache hit: {}", short_key(key));
        inner.entries.get(key).map(|entry| entry.value.clone())
    }

    pub(crate) fn set_at(&self, key: String, value: V, now: Instant) {
        if !self.config.enabled || self.config.max_size == 0 {
            return;
        }

        let mut inner = self.inner.lock();

        if let Some(entry) = inner.entries.get_mut(&key) {
            entry.value = value;
            entry.inserted_at = now;
            return;
        }

        if inner.entries.len() >= self.config.max_size && inner.sweep_due(now, self.config.ttl) {
            let purged = inner.purge(now, self.config.ttl);
            if purged > 0 {
                debug!("Swept {} expired cache entries", purged);
            }
        }

        while inner.entries.len() >= self.config.max_size {
            let Some((evicted, _)) = inner.entries.pop_lru() else {
                break;
            };
            inner.evictions += 1;
            debug!("Evicted least recently used entry: {}", short_key(&evicted));
        }

        inner.entries.put(
            key,
            CacheEntry {
                value,
                inserted_at: now,
            },
        );
        trace!("Cache size now {}", inner.entries.len());
    }

    /// Remove a single entry, returning whether it was present
    pub fn invalidate(&self, key: &str) -> bool {
        self.inner.lock().entries.pop(key).is_some()
    }

    /// Remove every expired entry now, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    pub(crate) fn purge_expired_at(&self, now: Instant) -> usize {
        self.inner.lock().purge(now, self.config.ttl)
    }

    /// Empty the cache and reset every counter
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.oldest_live = None;
        inner.hits = 0;
        inner.misses = 0;
        inner.evictions = 0;
        inner.expirations = 0;
    }

    /// Zero every counter, keeping the entries
    pub fn reset_stats(&self) {
        let mut inner = self.inner.lock();
        inner.hits = 0;
        inner.misses = 0;
        inner.evictions = 0;
        inner.expirations = 0;
    }

    /// Number of physically resident entries
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// True when no entry is resident
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current counters
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            size: inner.entries.len(),
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            expirations: inner.expirations,
            max_size: self.config.max_size,
            ttl: self.config.ttl,
            enabled: self.config.enabled,
        }
    }
}

impl<V: Clone + Send + 'static> TtlCache<V> {
    /// Start a background thread that purges expired entries every `interval`
    ///
    /// The thread stops when the returned [`CacheSweeper`] is stopped or dropped.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
    ) -> Result<CacheSweeper, ResilienceError> {
        if interval.is_zero() {
            return Err(ResilienceError::InvalidConfig(
                "sweep interval must be greater than zero".to_string(),
            ));
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let cache = Arc::clone(self);

        let handle = thread::Builder::new()
            .name("quill-cache-sweeper".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let purged = cache.purge_expired();
                        if purged > 0 {
                            debug!("Background sweep removed {} expired entries", purged);
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|e| {
                ResilienceError::InvalidConfig(format!("failed to spawn cache sweeper: {}", e))
            })?;

        Ok(CacheSweeper {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }
}

/// Handle to a background expiry sweep; stops the thread on drop
pub struct CacheSweeper {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CacheSweeper {
    /// Signal the sweeper thread and wait for it to exit
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CacheSweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max_size: usize, ttl: Duration) -> TtlCache<String> {
        TtlCache::new(CacheConfig {
            max_size,
            ttl,
            enabled: true,
        })
    }

    #[test]
    fn test_get_set() {
        let cache = cache(10, Duration::from_secs(60));
        assert_eq!(cache.get("k"), None);

        cache.set("k", "v".to_string());
        assert_eq!(cache.get("k"), Some("v".to_string()));

        let stats = cache.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_lru_evicts_least_recently_accessed() {
        let cache = cache(3, Duration::from_secs(60));
        cache.set("a", "1".to_string());
        cache.set("b", "2".to_string());
        cache.set("c", "3".to_string());

        // Touch "a" so "b" becomes the least recently used
        assert!(cache.get("a").is_some());

        cache.set("d", "4".to_string());

        assert_eq!(cache.get("b"), None);
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
        assert!(cache.get("d").is_some());
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_lru_without_access_evicts_first_inserted() {
        let cache = cache(4, Duration::from_secs(60));
        for key in ["k0", "k1", "k2", "k3", "k4"] {
            cache.set(key, key.to_string());
        }

        assert_eq!(cache.get("k0"), None);
        for key in ["k1", "k2", "k3", "k4"] {
            assert_eq!(cache.get(key), Some(key.to_string()));
        }
    }

    #[test]
    fn test_ttl_boundary() {
        let ttl = Duration::from_secs(10);
        let cache = cache(10, ttl);
        let t0 = Instant::now();
        let epsilon = Duration::from_millis(1);

        cache.set_at("k".to_string(), "v".to_string(), t0);
        assert_eq!(cache.get_at("k", t0 + ttl - epsilon), Some("v".to_string()));

        cache.set_at("k".to_string(), "v".to_string(), t0);
        assert_eq!(cache.get_at("k", t0 + ttl + epsilon), None);

        // The expired entry was physically removed by the access
        assert_eq!(cache.stats().size, 0);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_set_same_key_is_idempotent() {
        let cache = cache(10, Duration::from_secs(60));
        cache.set("k", "v".to_string());
        let size_before = cache.stats().size;

        cache.set("k", "v".to_string());

        assert_eq!(cache.stats().size, size_before);
        assert_eq!(cache.get("k"), Some("v".to_string()));
    }

    #[test]
    fn test_set_existing_key_refreshes_ttl_and_recency() {
        let ttl = Duration::from_secs(10);
        let cache = cache(2, ttl);
        let t0 = Instant::now();

        cache.set_at("a".to_string(), "1".to_string(), t0);
        cache.set_at("b".to_string(), "2".to_string(), t0);
        cache.set_at("a".to_string(), "updated".to_string(), t0 + Duration::from_secs(8));

        // "a" was refreshed at t0+8, so it is still live at t0+12
        assert_eq!(
            cache.get_at("a", t0 + Duration::from_secs(12)),
            Some("updated".to_string())
        );
        assert_eq!(cache.get_at("b", t0 + Duration::from_secs(12)), None);
    }

    #[test]
    fn test_full_cache_prefers_sweeping_expired_entries() {
        let ttl = Duration::from_secs(10);
        let cache = cache(2, ttl);
        let t0 = Instant::now();

        cache.set_at("old".to_string(), "1".to_string(), t0);
        cache.set_at("live".to_string(), "2".to_string(), t0 + Duration::from_secs(9));

        // Touch "old" so "live" becomes least recently used
        assert!(cache.get_at("old", t0 + Duration::from_secs(9)).is_some());

        // "old" has expired by t0+11 and is swept instead of evicting "live"
        cache.set_at("new".to_string(), "3".to_string(), t0 + Duration::from_secs(11));

        let stats = cache.stats();
        assert_eq!(stats.evictions, 0);
        assert_eq!(stats.expirations, 1);
        assert_eq!(
            cache.get_at("live", t0 + Duration::from_secs(12)),
            Some("2".to_string())
        );
    }

    #[test]
    fn test_full_cache_of_live_entries_skips_rescan() {
        let ttl = Duration::from_secs(10);
        let cache = cache(2, ttl);
        let t0 = Instant::now();

        cache.set_at("a".to_string(), "1".to_string(), t0);
        cache.set_at("b".to_string(), "2".to_string(), t0 + Duration::from_secs(1));

        // First insert into a full cache sweeps and finds nothing expired
        cache.set_at("c".to_string(), "3".to_string(), t0 + Duration::from_secs(2));
        assert_eq!(cache.inner.lock().oldest_live, Some(t0));

        // Nothing can expire before t0+10, so later inserts evict without a sweep
        cache.set_at("d".to_string(), "4".to_string(), t0 + Duration::from_secs(3));
        assert_eq!(cache.inner.lock().oldest_live, Some(t0));
        assert_eq!(cache.stats().evictions, 2);

        // Once the oldest survivor may have expired, the sweep runs again
        cache.set_at("e".to_string(), "5".to_string(), t0 + Duration::from_secs(13));
        let stats = cache.stats();
        assert_eq!(stats.expirations, 2);
        assert_eq!(stats.evictions, 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.get_at("e", t0 + Duration::from_secs(13)),
            Some("5".to_string())
        );
    }

    #[test]
    fn test_zero_max_size_is_always_empty() {
        let cache = cache(0, Duration::from_secs(60));
        cache.set("k", "v".to_string());
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.stats().size, 0);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_zero_ttl_expires_immediately() {
        let cache = cache(10, Duration::ZERO);
        cache.set("k", "v".to_string());
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.stats().hits, 0);
    }

    #[test]
    fn test_disabled_cache_is_noop() {
        let cache: TtlCache<String> = TtlCache::new(CacheConfig {
            enabled: false,
            ..Default::default()
        });

        cache.set("k", "v".to_string());
        assert_eq!(cache.get("k"), None);

        let stats = cache.stats();
        assert_eq!(stats.size, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 0);
        assert!(!stats.enabled);
    }

    #[test]
    fn test_clear_resets_counters() {
        let cache = cache(1, Duration::from_secs(60));
        cache.set("a", "1".to_string());
        cache.set("b", "2".to_string());
        let _ = cache.get("b");
        let _ = cache.get("a");

        cache.clear();

        let stats = cache.stats();
        assert_eq!(stats.size, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.evictions, 0);
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[test]
    fn test_reset_stats_keeps_entries() {
        let cache = cache(4, Duration::from_secs(60));
        cache.set("a", "1".to_string());
        let _ = cache.get("a");
        let _ = cache.get("missing");

        cache.reset_stats();

        let stats = cache.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.hits + stats.misses, 0);
        assert_eq!(cache.get("a"), Some("1".to_string()));
    }

    #[test]
    fn test_hit_rate() {
        let cache = cache(10, Duration::from_secs(60));
        assert_eq!(cache.stats().hit_rate(), 0.0);

        cache.set("k", "v".to_string());
        let _ = cache.get("k");
        let _ = cache.get("k");
        let _ = cache.get("k");
        let _ = cache.get("missing");

        assert!((cache.stats().hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_invalidate() {
        let cache = cache(10, Duration::from_secs(60));
        cache.set("k", "v".to_string());
        assert!(cache.invalidate("k"));
        assert!(!cache.invalidate("k"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_purge_expired() {
        let ttl = Duration::from_secs(5);
        let cache = cache(10, ttl);
        let t0 = Instant::now();
        cache.set_at("a".to_string(), "1".to_string(), t0);
        cache.set_at("b".to_string(), "2".to_string(), t0 + Duration::from_secs(3));

        assert_eq!(cache.purge_expired_at(t0 + Duration::from_secs(6)), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_capacity_holds_under_churn() {
        let cache = cache(2, Duration::from_secs(60));
        for i in 0..100 {
            cache.set(format!("k{}", i), i.to_string());
        }

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 98);
        assert_eq!(cache.get("k99"), Some("99".to_string()));
        assert_eq!(cache.get("k98"), Some("98".to_string()));
    }

    #[test]
    fn test_background_sweeper_purges() {
        let cache = Arc::new(cache(10, Duration::from_millis(10)));
        cache.set("k", "v".to_string());

        let mut sweeper = cache.spawn_sweeper(Duration::from_millis(5)).unwrap();
        thread::sleep(Duration::from_millis(100));
        sweeper.stop();

        assert_eq!(cache.len(), 0);
        assert!(cache.stats().expirations >= 1);
    }

    #[test]
    fn test_sweeper_rejects_zero_interval() {
        let cache = Arc::new(cache(10, Duration::from_secs(1)));
        assert!(matches!(
            cache.spawn_sweeper(Duration::ZERO),
            Err(ResilienceError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(cache(50, Duration::from_secs(60)));
        let mut handles = vec![];

        for t in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(thread::spawn(move || {
                for i in 0..200 {
                    let key = format!("k{}", (t * 31 + i) % 80);
                    if cache.get(&key).is_none() {
                        cache.set(key, i.to_string());
                    }
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = cache.stats();
        assert!(stats.size <= 50);
        assert_eq!(stats.hits + stats.misses, 8 * 200);
    }
}
