//! TTL + priority bounded cache.
//!
//! Entries expire after a fixed TTL and are evicted in bulk when the cache
//! is full: the lowest quartile ranked by (priority, last-access) goes first.
//! Reads nudge an entry's priority upward, so frequently-read entries resist
//! eviction — frequency-weighted LRU as a plain numeric field rather than an
//! intrusive recency list.
//!
//! The map is a `DashMap`, so the background sweep runs concurrently with
//! foreground `get`/`put` without assuming exclusive access.

use crate::perf::monitor::PerformanceMonitor;
use dashmap::DashMap;
use std::cmp::Ordering as CmpOrdering;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Priority bump applied on every hit.
const PRIORITY_BOOST: f64 = 0.1;
/// Ceiling for read-boosted priority.
const PRIORITY_MAX: f64 = 10.0;
/// Share of capacity evicted when full.
const EVICTION_FRACTION: f64 = 0.25;

pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    created_at: Instant,
    last_access: Instant,
    access_count: u64,
    priority: f64,
}

impl<T> CacheEntry<T> {
    fn new(value: T, priority: f64) -> Self {
        let now = Instant::now();
        Self {
            value,
            created_at: now,
            last_access: now,
            access_count: 0,
            priority,
        }
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate_pct: f64,
}

pub struct CacheManager<T> {
    entries: DashMap<String, CacheEntry<T>>,
    /// Shared with the monitor, which retunes it on sweep ticks.
    capacity: Arc<AtomicUsize>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    monitor: Arc<PerformanceMonitor>,
}

impl<T: Clone + Send + Sync + 'static> CacheManager<T> {
    pub fn new(capacity: Arc<AtomicUsize>, ttl: Duration, monitor: Arc<PerformanceMonitor>) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            monitor,
        }
    }

    /// Look up a key. Stale entries are evicted lazily on this access and
    /// count as misses. A hit bumps access count, last-access, and priority.
    pub fn get(&self, key: &str) -> Option<T> {
        let mut value = None;
        let mut expired = false;

        if let Some(mut entry) = self.entries.get_mut(key) {
            if entry.created_at.elapsed() > self.ttl {
                expired = true;
            } else {
                entry.access_count += 1;
                entry.last_access = Instant::now();
                entry.priority = (entry.priority + PRIORITY_BOOST).min(PRIORITY_MAX);
                value = Some(entry.value.clone());
            }
        }

        if expired {
            self.entries.remove(key);
        }

        match value {
            Some(found) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.monitor.record_cache_access(true);
                Some(found)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.monitor.record_cache_access(false);
                None
            }
        }
    }

    /// Insert a value. When at capacity, the lowest quartile ranked by
    /// (priority ascending, last-access ascending) is evicted first, so the
    /// entry count never exceeds the configured capacity.
    pub fn put(&self, key: &str, value: T, priority: f64) {
        let capacity = self.capacity.load(Ordering::Relaxed).max(1);

        if self.entries.len() >= capacity && !self.entries.contains_key(key) {
            self.evict_quartile(capacity);
        }

        self.entries
            .insert(key.to_string(), CacheEntry::new(value, priority));
    }

    /// Drop all entries immediately.
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            entries: self.entries.len(),
            capacity: self.capacity.load(Ordering::Relaxed),
            hits,
            misses,
            hit_rate_pct: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64 * 100.0
            },
        }
    }

    /// Remove every TTL-expired entry. Returns the number removed.
    pub fn sweep_expired(&self) -> usize {
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.created_at.elapsed() > self.ttl)
            .map(|entry| entry.key().clone())
            .collect();

        for key in &stale {
            self.entries.remove(key);
        }

        stale.len()
    }

    /// Spawn the background sweep on an independent timer: removes expired
    /// entries and triggers monitor self-tuning once per tick. Runs until
    /// the returned handle is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let removed = cache.sweep_expired();
                if removed > 0 {
                    log::debug!("cache sweep removed {} expired entries", removed);
                }
                cache.monitor.self_tune();
            }
        })
    }

    fn evict_quartile(&self, capacity: usize) {
        // floor(0.25·capacity), but at least one so the bound always holds
        let count = ((capacity as f64 * EVICTION_FRACTION).floor() as usize).max(1);

        let mut ranked: Vec<(String, f64, Instant)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.priority, entry.last_access))
            .collect();

        ranked.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(CmpOrdering::Equal)
                .then_with(|| a.2.cmp(&b.2))
        });

        for (key, _, _) in ranked.into_iter().take(count) {
            self.entries.remove(&key);
        }

        log::trace!("evicted {} low-priority cache entries", count);
    }
}
