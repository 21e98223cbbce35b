//! Rolling performance metrics and the self-tuning controller.
//!
//! The monitor keeps exponentially-weighted running averages of cache-hit
//! and error rates plus a bounded window of raw latency samples. It owns the
//! shared tuning knobs (cache capacity, batch size) as atomics so the cache
//! and scheduler read them lock-free while the sweep tick retunes them.

use crate::models::{MetricsSnapshot, PerformanceTrend};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

/// Weight applied to each new observation in the running averages.
const EWMA_WEIGHT: f64 = 0.1;
/// Number of raw latency samples retained.
const LATENCY_WINDOW: usize = 100;
/// Samples compared on each side by `trend()`.
const TREND_SAMPLE_COUNT: usize = 10;

const CACHE_CAPACITY_MIN: usize = 500;
const CACHE_CAPACITY_MAX: usize = 2000;
const BATCH_SIZE_MIN: usize = 10;
const BATCH_SIZE_MAX: usize = 100;

pub struct PerformanceMonitor {
    cache_hit_rate: Mutex<f64>,
    error_rate: Mutex<f64>,
    latencies: Mutex<VecDeque<f64>>,
    hit_samples: AtomicU64,
    error_samples: AtomicU64,
    total_ops: AtomicU64,
    memory_usage_bytes: AtomicU64,
    started: Instant,
    target_latency_ms: f64,
    cache_capacity: Arc<AtomicUsize>,
    batch_size: Arc<AtomicUsize>,
}

impl PerformanceMonitor {
    pub fn new(
        target_latency_ms: f64,
        cache_capacity: Arc<AtomicUsize>,
        batch_size: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            cache_hit_rate: Mutex::new(0.0),
            error_rate: Mutex::new(0.0),
            latencies: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW)),
            hit_samples: AtomicU64::new(0),
            error_samples: AtomicU64::new(0),
            total_ops: AtomicU64::new(0),
            memory_usage_bytes: AtomicU64::new(0),
            started: Instant::now(),
            target_latency_ms,
            cache_capacity,
            batch_size,
        }
    }

    /// Fold one cache access into the running hit rate.
    pub fn record_cache_access(&self, hit: bool) {
        let observation = if hit { 1.0 } else { 0.0 };
        let mut rate = self.cache_hit_rate.lock();
        *rate = *rate * (1.0 - EWMA_WEIGHT) + observation * EWMA_WEIGHT;
        self.hit_samples.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold one batch outcome into the running error rate.
    pub fn record_batch_outcome(&self, ok: bool) {
        let observation = if ok { 0.0 } else { 1.0 };
        let mut rate = self.error_rate.lock();
        *rate = *rate * (1.0 - EWMA_WEIGHT) + observation * EWMA_WEIGHT;
        self.error_samples.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one raw latency sample, in milliseconds.
    pub fn record_latency(&self, millis: f64) {
        let mut window = self.latencies.lock();
        if window.len() == LATENCY_WINDOW {
            window.pop_front();
        }
        window.push_back(millis);
        self.total_ops.fetch_add(1, Ordering::Relaxed);
    }

    /// Update the approximate memory-usage gauge (serialized-size heuristic).
    pub fn record_memory_usage(&self, bytes: u64) {
        self.memory_usage_bytes.store(bytes, Ordering::Relaxed);
    }

    pub fn cache_capacity(&self) -> usize {
        self.cache_capacity.load(Ordering::Relaxed)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.load(Ordering::Relaxed)
    }

    /// Point-in-time metrics snapshot.
    pub fn metrics(&self) -> MetricsSnapshot {
        let window = self.latencies.lock();
        let recent: Vec<f64> = window
            .iter()
            .rev()
            .take(TREND_SAMPLE_COUNT)
            .copied()
            .collect();
        drop(window);

        let elapsed = self.started.elapsed().as_secs_f64().max(1e-9);

        MetricsSnapshot {
            processing_time_ms: mean(&recent),
            memory_usage_bytes: self.memory_usage_bytes.load(Ordering::Relaxed),
            throughput_per_sec: self.total_ops.load(Ordering::Relaxed) as f64 / elapsed,
            cache_hit_rate_pct: *self.cache_hit_rate.lock() * 100.0,
            error_rate_pct: *self.error_rate.lock() * 100.0,
        }
    }

    /// Compare the most recent latency samples against the preceding window.
    ///
    /// Returns zero improvement until both windows are populated.
    pub fn trend(&self) -> PerformanceTrend {
        let window = self.latencies.lock();
        let len = window.len();

        let latency_improvement_pct = if len >= TREND_SAMPLE_COUNT * 2 {
            let recent: Vec<f64> = window.iter().skip(len - TREND_SAMPLE_COUNT).copied().collect();
            let previous: Vec<f64> = window
                .iter()
                .skip(len - TREND_SAMPLE_COUNT * 2)
                .take(TREND_SAMPLE_COUNT)
                .copied()
                .collect();
            let recent_mean = mean(&recent);
            let previous_mean = mean(&previous);
            if previous_mean > 0.0 {
                (previous_mean - recent_mean) / previous_mean * 100.0
            } else {
                0.0
            }
        } else {
            0.0
        };
        drop(window);

        PerformanceTrend {
            latency_improvement_pct,
            cache_efficiency_pct: *self.cache_hit_rate.lock() * 100.0,
            reliability_score: 100.0 - *self.error_rate.lock() * 100.0,
        }
    }

    /// Closed-loop tuning, invoked once per background-sweep tick.
    ///
    /// No hysteresis beyond the min/max clamps; near a threshold boundary
    /// the controller can oscillate between ticks.
    pub fn self_tune(&self) {
        if self.hit_samples.load(Ordering::Relaxed) > 0 {
            let hit_rate = *self.cache_hit_rate.lock();
            let capacity = self.cache_capacity.load(Ordering::Relaxed);
            if hit_rate < 0.5 {
                let grown = ((capacity as f64 * 1.2).round() as usize).min(CACHE_CAPACITY_MAX);
                self.cache_capacity.store(grown, Ordering::Relaxed);
                if grown != capacity {
                    log::debug!("self-tune: cache capacity {} -> {}", capacity, grown);
                }
            } else if hit_rate > 0.9 {
                let shrunk = ((capacity as f64 * 0.9).round() as usize).max(CACHE_CAPACITY_MIN);
                self.cache_capacity.store(shrunk, Ordering::Relaxed);
                if shrunk != capacity {
                    log::debug!("self-tune: cache capacity {} -> {}", capacity, shrunk);
                }
            }
        }

        let window = self.latencies.lock();
        if window.is_empty() {
            return;
        }
        let recent: Vec<f64> = window
            .iter()
            .rev()
            .take(TREND_SAMPLE_COUNT)
            .copied()
            .collect();
        drop(window);

        let recent_mean = mean(&recent);
        let batch_size = self.batch_size.load(Ordering::Relaxed);
        if recent_mean > self.target_latency_ms * 1.5 {
            let shrunk = ((batch_size as f64 * 0.8).round() as usize).max(BATCH_SIZE_MIN);
            self.batch_size.store(shrunk, Ordering::Relaxed);
            if shrunk != batch_size {
                log::debug!("self-tune: batch size {} -> {}", batch_size, shrunk);
            }
        } else if recent_mean < self.target_latency_ms * 0.7 {
            let grown = ((batch_size as f64 * 1.2).round() as usize).min(BATCH_SIZE_MAX);
            self.batch_size.store(grown, Ordering::Relaxed);
            if grown != batch_size {
                log::debug!("self-tune: batch size {} -> {}", batch_size, grown);
            }
        }
    }
}

fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        0.0
    } else {
        samples.iter().sum::<f64>() / samples.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(target_ms: f64, capacity: usize, batch: usize) -> PerformanceMonitor {
        PerformanceMonitor::new(
            target_ms,
            Arc::new(AtomicUsize::new(capacity)),
            Arc::new(AtomicUsize::new(batch)),
        )
    }

    #[test]
    fn test_ewma_hit_rate_moves_toward_observations() {
        let m = monitor(500.0, 1000, 50);
        for _ in 0..50 {
            m.record_cache_access(true);
        }
        assert!(m.metrics().cache_hit_rate_pct > 90.0);

        for _ in 0..50 {
            m.record_cache_access(false);
        }
        assert!(m.metrics().cache_hit_rate_pct < 10.0);
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let m = monitor(500.0, 1000, 50);
        for i in 0..250 {
            m.record_latency(i as f64);
        }
        assert_eq!(m.latencies.lock().len(), LATENCY_WINDOW);
    }

    #[test]
    fn test_trend_requires_two_windows() {
        let m = monitor(500.0, 1000, 50);
        for _ in 0..5 {
            m.record_latency(100.0);
        }
        assert_eq!(m.trend().latency_improvement_pct, 0.0);

        // 10 slow samples then 10 fast ones → 50% improvement
        for _ in 0..10 {
            m.record_latency(200.0);
        }
        for _ in 0..10 {
            m.record_latency(100.0);
        }
        assert!((m.trend().latency_improvement_pct - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_self_tune_grows_cache_on_low_hit_rate() {
        let m = monitor(500.0, 1000, 50);
        for _ in 0..50 {
            m.record_cache_access(false);
        }
        m.self_tune();
        assert_eq!(m.cache_capacity(), 1200);

        // Clamped at the cap
        for _ in 0..10 {
            m.self_tune();
        }
        assert_eq!(m.cache_capacity(), CACHE_CAPACITY_MAX);
    }

    #[test]
    fn test_self_tune_shrinks_cache_on_high_hit_rate() {
        let m = monitor(500.0, 1000, 50);
        for _ in 0..100 {
            m.record_cache_access(true);
        }
        m.self_tune();
        assert_eq!(m.cache_capacity(), 900);
    }

    #[test]
    fn test_self_tune_adjusts_batch_size_from_latency() {
        let slow = monitor(100.0, 1000, 50);
        for _ in 0..10 {
            slow.record_latency(1000.0);
            slow.record_cache_access(true);
        }
        slow.self_tune();
        assert_eq!(slow.batch_size(), 40);

        let fast = monitor(100.0, 1000, 50);
        for _ in 0..10 {
            fast.record_latency(10.0);
            fast.record_cache_access(true);
        }
        fast.self_tune();
        assert_eq!(fast.batch_size(), 60);
    }

    #[test]
    fn test_self_tune_is_a_noop_without_observations() {
        let m = monitor(500.0, 1000, 50);
        m.self_tune();
        assert_eq!(m.cache_capacity(), 1000);
        assert_eq!(m.batch_size(), 50);
    }

    #[test]
    fn test_reliability_score() {
        let m = monitor(500.0, 1000, 50);
        for _ in 0..100 {
            m.record_batch_outcome(true);
        }
        assert!(m.trend().reliability_score > 99.0);
    }
}
