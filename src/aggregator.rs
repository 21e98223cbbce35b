//! Engine facade.
//!
//! `MessageAggregator` owns one instance of every component (thread store,
//! cache, scheduler, monitor) and wires the shared tuning knobs between
//! them. Callers interact only with this type; the components stay usable
//! on their own for embedding.

use crate::config::{EngineConfig, ThreadingOptions};
use crate::error::EngineError;
use crate::models::{
    CrossSourceThread, Message, MetricsSnapshot, PerformanceTrend, Thread, ThreadAnalytics,
};
use crate::perf::cache::{CacheManager, CacheStats};
use crate::perf::monitor::PerformanceMonitor;
use crate::perf::optimizer::Optimizer;
use crate::perf::scheduler::{BatchScheduler, CostClass, ExecutionOutcome};
use crate::threading::{self, BatchSummary, ThreadStore};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::Instant;
use tokio::task::JoinHandle;

pub struct MessageAggregator {
    config: EngineConfig,
    store: RwLock<ThreadStore>,
    monitor: Arc<PerformanceMonitor>,
    cache: Arc<CacheManager<Value>>,
    optimizer: Optimizer,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl MessageAggregator {
    pub fn new(config: EngineConfig) -> Self {
        let cache_capacity = Arc::new(AtomicUsize::new(config.cache_capacity));
        let batch_size = Arc::new(AtomicUsize::new(config.batch_size));

        let monitor = Arc::new(PerformanceMonitor::new(
            config.target_latency_ms,
            Arc::clone(&cache_capacity),
            Arc::clone(&batch_size),
        ));
        let cache = Arc::new(CacheManager::new(
            cache_capacity,
            config.cache_ttl,
            Arc::clone(&monitor),
        ));
        let scheduler = BatchScheduler::new(
            batch_size,
            config.concurrency_limit,
            Arc::clone(&monitor),
        );
        let optimizer = Optimizer::new(Arc::clone(&cache), scheduler);

        log::info!(
            "aggregator ready: cache capacity {}, batch size {}, concurrency {}",
            config.cache_capacity,
            config.batch_size,
            config.concurrency_limit
        );

        Self {
            config,
            store: RwLock::new(ThreadStore::new()),
            monitor,
            cache,
            optimizer,
            sweeper: Mutex::new(None),
        }
    }

    /// Place a batch of messages into threads, in timestamp order, and
    /// return snapshots of the threads the batch touched (first-touch
    /// order) alongside the batch summary. Invalid items are rejected
    /// individually and reported in the summary; the rest of the batch is
    /// unaffected.
    ///
    /// `options` overrides the configured threading options for this call
    /// only.
    pub fn process_messages(
        &self,
        messages: Vec<Message>,
        options: Option<&ThreadingOptions>,
    ) -> (Vec<Thread>, BatchSummary) {
        let opts = options.unwrap_or(&self.config.threading);
        let started = Instant::now();

        let mut store = self.store.write();
        let summary = store.process_batch(messages, opts);
        let threads: Vec<Thread> = summary
            .thread_ids
            .iter()
            .filter_map(|id| store.get(id).ok().cloned())
            .collect();
        drop(store);

        self.monitor
            .record_latency(started.elapsed().as_secs_f64() * 1000.0);
        self.refresh_memory_gauge();
        (threads, summary)
    }

    /// Snapshot of every thread, in creation order.
    pub fn threads(&self) -> Vec<Thread> {
        self.store.read().threads().to_vec()
    }

    pub fn thread(&self, thread_id: &str) -> Result<Thread, EngineError> {
        self.store.read().get(thread_id).cloned()
    }

    /// Owning thread of a message id.
    pub fn thread_of(&self, message_id: &str) -> Result<Thread, EngineError> {
        self.store.read().thread_of(message_id).cloned()
    }

    pub fn thread_count(&self) -> usize {
        self.store.read().len()
    }

    /// Run one pairwise consolidation pass over the thread population.
    /// Returns the number of merges applied.
    pub fn consolidate(&self) -> Result<usize, EngineError> {
        let merges = threading::consolidate(&mut self.store.write())?;
        if merges > 0 {
            self.refresh_memory_gauge();
        }
        Ok(merges)
    }

    /// Group equivalent threads from different sources into cross-source
    /// aggregates with computed analytics. The underlying threads are left
    /// untouched.
    pub fn link_cross_source_threads(&self) -> Vec<CrossSourceThread> {
        threading::link(self.store.read().threads())
    }

    /// Analytics snapshot for one thread.
    pub fn analyze_thread(&self, thread_id: &str) -> Result<ThreadAnalytics, EngineError> {
        let store = self.store.read();
        let thread = store.get(thread_id)?;
        Ok(threading::analyze(&thread.messages, Utc::now()))
    }

    /// Run arbitrary per-item work through the cached, cost-partitioned,
    /// bounded-concurrency execution path.
    pub async fn optimize<T, R, C, W, F>(
        &self,
        items: Vec<T>,
        classify: C,
        worker: Arc<W>,
        cache_key: Option<&str>,
    ) -> ExecutionOutcome<R>
    where
        T: Send + 'static,
        R: Serialize + DeserializeOwned + Send + 'static,
        C: Fn(&T) -> CostClass,
        W: Fn(T) -> F + Send + Sync + 'static,
        F: Future<Output = Result<R, EngineError>> + Send + 'static,
    {
        self.optimizer.optimize(items, classify, worker, cache_key).await
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.monitor.metrics()
    }

    pub fn trend(&self) -> PerformanceTrend {
        self.monitor.trend()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Start the periodic cache sweep and self-tuning tick. Idempotent while
    /// a sweeper is already running. Requires a tokio runtime.
    pub fn start_background_sweep(&self) {
        let mut slot = self.sweeper.lock();
        if slot.is_some() {
            return;
        }
        *slot = Some(self.cache.spawn_sweeper(self.config.sweep_interval));
        log::debug!(
            "background sweep started, interval {:?}",
            self.config.sweep_interval
        );
    }

    pub fn stop_background_sweep(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
            log::debug!("background sweep stopped");
        }
    }

    /// Drop all threads and cached results. Metrics history is kept.
    pub fn clear(&self) {
        self.store.write().clear();
        self.cache.clear();
        self.monitor.record_memory_usage(0);
    }

    fn refresh_memory_gauge(&self) {
        // Serialized size as a portable approximation of retained state
        let store = self.store.read();
        if let Ok(bytes) = serde_json::to_vec(store.threads()) {
            self.monitor.record_memory_usage(bytes.len() as u64);
        }
    }
}

impl Drop for MessageAggregator {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }
}

impl Default for MessageAggregator {
    fn default() -> Self {
        Self::new(EngineConfig::from_env())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config() -> EngineConfig {
        EngineConfig {
            threading: Default::default(),
            cache_capacity: 100,
            cache_ttl: std::time::Duration::from_secs(3600),
            sweep_interval: std::time::Duration::from_millis(50),
            batch_size: 10,
            concurrency_limit: 4,
            target_latency_ms: 500.0,
        }
    }

    fn message(id: &str, subject: &str, from: &str, to: &[&str], hour: u32) -> Message {
        Message {
            id: id.to_string(),
            subject: subject.to_string(),
            from: from.to_string(),
            to: to.iter().map(|a| a.to_string()).collect(),
            cc: Vec::new(),
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).unwrap(),
            body: String::new(),
            source: "mail".to_string(),
        }
    }

    #[test]
    fn test_process_groups_related_messages() {
        let agg = MessageAggregator::new(config());

        let (threads, summary) = agg.process_messages(
            vec![
                message("e1", "Kickoff", "john@example.com", &["jane@example.com"], 9),
                message("e2", "Re: Kickoff", "jane@example.com", &["john@example.com"], 10),
            ],
            None,
        );

        assert_eq!(summary.processed, 2);
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].message_count(), 2);
        assert_eq!(agg.thread_count(), 1);
        assert_eq!(agg.thread_of("e2").unwrap().message_count(), 2);
        assert!(agg.metrics().memory_usage_bytes > 0);
    }

    #[test]
    fn test_per_call_options_override_config() {
        let agg = MessageAggregator::new(config());
        // Same subject, no shared people: only the time component can push
        // this pair over the match threshold
        let batch = vec![
            message("e1", "Kickoff", "john@example.com", &["jane@example.com"], 9),
            message("e2", "Kickoff", "sue@example.com", &["mark@example.com"], 10),
        ];

        let (threads, _) = agg.process_messages(batch.clone(), None);
        assert_eq!(threads.len(), 1);

        agg.clear();
        let opts = ThreadingOptions {
            time_window_hours: 0,
            ..ThreadingOptions::default()
        };
        let (threads, _) = agg.process_messages(batch, Some(&opts));
        assert_eq!(threads.len(), 2);
    }

    #[test]
    fn test_clear_resets_state() {
        let agg = MessageAggregator::new(config());
        agg.process_messages(
            vec![message(
                "e1",
                "Kickoff",
                "john@example.com",
                &["jane@example.com"],
                9,
            )],
            None,
        );

        agg.clear();

        assert_eq!(agg.thread_count(), 0);
        assert_eq!(agg.cache_stats().entries, 0);
        assert_eq!(agg.metrics().memory_usage_bytes, 0);
    }

    #[test]
    fn test_analyze_thread_requires_existing_thread() {
        let agg = MessageAggregator::new(config());
        assert!(matches!(
            agg.analyze_thread("missing"),
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_optimize_roundtrip_through_facade() {
        let agg = MessageAggregator::new(config());
        let worker = Arc::new(|n: u32| async move { Ok::<u32, EngineError>(n + 1) });

        let outcome = agg
            .optimize(vec![1u32, 2], |_| CostClass::Cheap, worker, Some("facade"))
            .await;

        assert_eq!(outcome.into_result().unwrap(), vec![2, 3]);
        assert_eq!(agg.cache_stats().entries, 1);
    }

    #[tokio::test]
    async fn test_background_sweep_start_stop() {
        let agg = MessageAggregator::new(config());
        agg.start_background_sweep();
        agg.start_background_sweep();
        tokio::time::sleep(std::time::Duration::from_millis(120)).await;
        agg.stop_background_sweep();
    }
}
