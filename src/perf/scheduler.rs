//! Cost-aware batch partitioning and bounded-concurrency execution.
//!
//! Work items are bucketed by estimated processing cost, chunked into
//! batches, and executed with at most a fixed number of batches in flight.
//! Within a batch, items run concurrently on the runtime; across batches,
//! a rolling window caps parallelism so a flood of input cannot saturate
//! the executor.

use crate::error::EngineError;
use crate::perf::monitor::PerformanceMonitor;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::task::JoinSet;

/// Processing-cost class of a work item, assigned by the caller's
/// classifier. Drives both batch grouping and scheduling priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostClass {
    Cheap,
    Medium,
    Expensive,
}

impl CostClass {
    pub fn weight(self) -> f64 {
        match self {
            CostClass::Cheap => 1.0,
            CostClass::Medium => 2.0,
            CostClass::Expensive => 3.0,
        }
    }

    const ALL: [CostClass; 3] = [CostClass::Cheap, CostClass::Medium, CostClass::Expensive];
}

/// Lifecycle of a batch. Transitions are forward-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl BatchStatus {
    /// A batch never moves backwards through its lifecycle.
    pub fn can_advance_to(self, next: BatchStatus) -> bool {
        (self as u8) < (next as u8)
    }
}

/// A homogeneous chunk of work items sharing one cost class.
#[derive(Debug)]
pub struct Batch<T> {
    pub id: String,
    pub items: Vec<T>,
    pub cost: CostClass,
    /// Class weight × item count.
    pub estimated_cost: f64,
    /// Class weight plus a size bonus capped at 5. Higher runs first.
    pub priority: f64,
    pub status: BatchStatus,
}

impl<T> Batch<T> {
    pub fn new(seq: usize, cost: CostClass, items: Vec<T>) -> Self {
        let count = items.len() as f64;
        Self {
            id: format!("batch-{:04}", seq),
            estimated_cost: cost.weight() * count,
            priority: cost.weight() + (count / 10.0).min(5.0),
            items,
            cost,
            status: BatchStatus::Pending,
        }
    }

    fn advance(&mut self, next: BatchStatus) {
        debug_assert!(
            self.status.can_advance_to(next),
            "batch status moves forward only"
        );
        self.status = next;
    }
}

/// Result of an `execute` run. `results` holds the output of every batch
/// that completed, in batch-then-item order, even when a later batch
/// failed; `error` carries the first failure if any.
#[derive(Debug)]
pub struct ExecutionOutcome<R> {
    pub results: Vec<R>,
    pub error: Option<EngineError>,
}

impl<R> ExecutionOutcome<R> {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Collapse to a plain `Result`, discarding partial results on failure.
    pub fn into_result(self) -> Result<Vec<R>, EngineError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.results),
        }
    }
}

pub struct BatchScheduler {
    /// Shared with the monitor, which retunes it from observed latency.
    batch_size: Arc<AtomicUsize>,
    concurrency_limit: usize,
    monitor: Arc<PerformanceMonitor>,
}

impl BatchScheduler {
    pub fn new(
        batch_size: Arc<AtomicUsize>,
        concurrency_limit: usize,
        monitor: Arc<PerformanceMonitor>,
    ) -> Self {
        Self {
            batch_size,
            concurrency_limit: concurrency_limit.max(1),
            monitor,
        }
    }

    /// Bucket items by cost class, chunk each bucket at the current tuned
    /// batch size, and order the batches by priority descending. The sort is
    /// stable, so items keep their relative order within a class.
    pub fn partition<T, C>(&self, items: Vec<T>, classify: C) -> Vec<Batch<T>>
    where
        C: Fn(&T) -> CostClass,
    {
        let chunk = self.batch_size.load(Ordering::Relaxed).max(1);

        let mut buckets: Vec<Vec<T>> = CostClass::ALL.iter().map(|_| Vec::new()).collect();
        for item in items {
            let class = classify(&item);
            let slot = CostClass::ALL.iter().position(|c| *c == class);
            if let Some(slot) = slot {
                buckets[slot].push(item);
            }
        }

        let mut batches = Vec::new();
        let mut seq = 0usize;
        for (slot, bucket) in buckets.into_iter().enumerate() {
            let class = CostClass::ALL[slot];
            let mut current = Vec::with_capacity(chunk.min(bucket.len()));
            for item in bucket {
                current.push(item);
                if current.len() == chunk {
                    batches.push(Batch::new(seq, class, std::mem::take(&mut current)));
                    seq += 1;
                }
            }
            if !current.is_empty() {
                batches.push(Batch::new(seq, class, current));
                seq += 1;
            }
        }

        batches.sort_by(|a, b| {
            b.priority
                .partial_cmp(&a.priority)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        batches
    }

    /// Execute batches with a rolling window of at most `concurrency_limit`
    /// batches in flight. Items within a batch run concurrently.
    ///
    /// On the first batch failure no further batches are launched; batches
    /// already in flight are drained, and results from every batch that
    /// completed are kept in the outcome alongside the error.
    pub async fn execute<T, R, W, F>(
        &self,
        batches: Vec<Batch<T>>,
        worker: Arc<W>,
    ) -> ExecutionOutcome<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        W: Fn(T) -> F + Send + Sync + 'static,
        F: Future<Output = Result<R, EngineError>> + Send + 'static,
    {
        let total = batches.len();
        let mut queue: VecDeque<(usize, Batch<T>)> = batches.into_iter().enumerate().collect();
        let mut slots: Vec<Option<Vec<R>>> = std::iter::repeat_with(|| None).take(total).collect();
        let mut in_flight: JoinSet<(usize, Result<Vec<R>, EngineError>, f64)> = JoinSet::new();
        let mut error: Option<EngineError> = None;

        loop {
            while error.is_none() && in_flight.len() < self.concurrency_limit {
                let Some((pos, batch)) = queue.pop_front() else {
                    break;
                };
                let worker = Arc::clone(&worker);
                in_flight.spawn(async move {
                    let started = Instant::now();
                    let result = run_batch(batch, worker).await;
                    (pos, result, started.elapsed().as_secs_f64() * 1000.0)
                });
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };

            match joined {
                Ok((pos, Ok(results), elapsed_ms)) => {
                    self.monitor.record_latency(elapsed_ms);
                    self.monitor.record_batch_outcome(true);
                    slots[pos] = Some(results);
                }
                Ok((_, Err(err), elapsed_ms)) => {
                    // The error rate metric is the only failure record here;
                    // the error itself goes back to the caller
                    self.monitor.record_latency(elapsed_ms);
                    self.monitor.record_batch_outcome(false);
                    error.get_or_insert(err);
                }
                Err(join_err) => {
                    self.monitor.record_batch_outcome(false);
                    error.get_or_insert(EngineError::Worker(format!(
                        "batch task panicked: {}",
                        join_err
                    )));
                }
            }
        }

        ExecutionOutcome {
            results: slots.into_iter().flatten().flatten().collect(),
            error,
        }
    }
}

/// Run one batch: every item concurrently, failing the whole batch on the
/// first item error and aborting its remaining siblings.
async fn run_batch<T, R, W, F>(mut batch: Batch<T>, worker: Arc<W>) -> Result<Vec<R>, EngineError>
where
    T: Send + 'static,
    R: Send + 'static,
    W: Fn(T) -> F + Send + Sync + 'static,
    F: Future<Output = Result<R, EngineError>> + Send + 'static,
{
    batch.advance(BatchStatus::Processing);
    let items = std::mem::take(&mut batch.items);
    let count = items.len();

    let mut tasks: JoinSet<(usize, Result<R, EngineError>)> = JoinSet::new();
    for (idx, item) in items.into_iter().enumerate() {
        let worker = Arc::clone(&worker);
        tasks.spawn(async move { (idx, (*worker)(item).await) });
    }

    let mut slots: Vec<Option<R>> = std::iter::repeat_with(|| None).take(count).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((idx, Ok(result))) => slots[idx] = Some(result),
            Ok((_, Err(err))) => {
                tasks.abort_all();
                batch.advance(BatchStatus::Failed);
                return Err(err);
            }
            Err(join_err) => {
                tasks.abort_all();
                batch.advance(BatchStatus::Failed);
                return Err(EngineError::Worker(format!(
                    "worker task panicked: {}",
                    join_err
                )));
            }
        }
    }

    batch.advance(BatchStatus::Completed);
    Ok(slots.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    fn scheduler(batch_size: usize, limit: usize) -> (BatchScheduler, Arc<PerformanceMonitor>) {
        let batch_size = Arc::new(AtomicUsize::new(batch_size));
        let monitor = Arc::new(PerformanceMonitor::new(
            500.0,
            Arc::new(AtomicUsize::new(1000)),
            Arc::clone(&batch_size),
        ));
        (
            BatchScheduler::new(batch_size, limit, Arc::clone(&monitor)),
            monitor,
        )
    }

    fn classify(n: &u32) -> CostClass {
        match n {
            0..=9 => CostClass::Cheap,
            10..=99 => CostClass::Medium,
            _ => CostClass::Expensive,
        }
    }

    #[test]
    fn test_partition_groups_by_class_and_chunks() {
        let (s, _monitor) = scheduler(2, 4);
        let batches = s.partition(vec![1, 100, 2, 3, 50, 200], classify);

        // 2 cheap batches (sizes 2,1), 1 medium, 1 expensive
        assert_eq!(batches.len(), 4);
        for batch in &batches {
            assert!(batch.items.len() <= 2);
            assert!(batch.items.iter().all(|n| classify(n) == batch.cost));
            assert_eq!(batch.status, BatchStatus::Pending);
        }
        // Expensive (weight 3) outranks medium outranks cheap
        assert_eq!(batches[0].cost, CostClass::Expensive);
        assert_eq!(batches[1].cost, CostClass::Medium);
        // In-class order is preserved
        let cheap: Vec<u32> = batches
            .iter()
            .filter(|b| b.cost == CostClass::Cheap)
            .flat_map(|b| b.items.iter().copied())
            .collect();
        assert_eq!(cheap, vec![1, 2, 3]);
    }

    #[test]
    fn test_batch_priority_grows_with_size() {
        let small = Batch::new(0, CostClass::Cheap, vec![1u32]);
        let large = Batch::new(1, CostClass::Cheap, vec![0u32; 30]);
        let huge = Batch::new(2, CostClass::Cheap, vec![0u32; 100]);

        assert!(large.priority > small.priority);
        // Size bonus saturates at 5
        assert!((huge.priority - 6.0).abs() < 1e-9);
        assert!((large.estimated_cost - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_status_transitions_are_forward_only() {
        assert!(BatchStatus::Pending.can_advance_to(BatchStatus::Processing));
        assert!(BatchStatus::Processing.can_advance_to(BatchStatus::Failed));
        assert!(!BatchStatus::Completed.can_advance_to(BatchStatus::Processing));
        assert!(!BatchStatus::Processing.can_advance_to(BatchStatus::Processing));
    }

    #[tokio::test]
    async fn test_execute_returns_results_in_batch_order() {
        let (s, _monitor) = scheduler(2, 4);
        let batches = vec![
            Batch::new(0, CostClass::Cheap, vec![1u32, 2]),
            Batch::new(1, CostClass::Cheap, vec![3u32, 4]),
        ];
        let worker = Arc::new(|n: u32| async move { Ok::<u32, EngineError>(n * 10) });

        let outcome = s.execute(batches, worker).await;

        assert!(outcome.is_ok());
        assert_eq!(outcome.into_result().unwrap(), vec![10, 20, 30, 40]);
    }

    #[tokio::test]
    async fn test_failure_preserves_completed_batch_results() {
        // Limit 1 forces sequential batches, so the first completes before
        // the failing second one launches.
        let (s, _monitor) = scheduler(2, 1);
        let batches = vec![
            Batch::new(0, CostClass::Cheap, vec![1u32, 2]),
            Batch::new(1, CostClass::Cheap, vec![3u32]),
            Batch::new(2, CostClass::Cheap, vec![4u32]),
        ];
        let worker = Arc::new(|n: u32| async move {
            if n == 3 {
                Err(EngineError::Worker("worker refused item".to_string()))
            } else {
                Ok(n * 10)
            }
        });

        let outcome = s.execute(batches, worker).await;

        assert!(matches!(outcome.error, Some(EngineError::Worker(_))));
        // Batch 0 completed; batch 2 was never launched
        assert_eq!(outcome.results, vec![10, 20]);
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_limit() {
        let limit = 2;
        let (s, _monitor) = scheduler(1, limit);
        let batches: Vec<Batch<u32>> = (0..8)
            .map(|i| Batch::new(i, CostClass::Cheap, vec![i as u32]))
            .collect();

        let active = Arc::new(AtomicU64::new(0));
        let peak = Arc::new(AtomicU64::new(0));
        let worker = {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            Arc::new(move |n: u32| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok::<u32, EngineError>(n)
                }
            })
        };

        let outcome = s.execute(batches, worker).await;

        assert!(outcome.is_ok());
        assert!(peak.load(Ordering::SeqCst) <= limit as u64);
    }

    #[tokio::test]
    async fn test_failure_surfaces_through_error_rate_metric_only() {
        let (s, monitor) = scheduler(2, 1);
        let batches = vec![Batch::new(0, CostClass::Cheap, vec![1u32])];
        let worker = Arc::new(|_n: u32| async move {
            Err::<u32, EngineError>(EngineError::Worker("worker refused item".to_string()))
        });

        let outcome = s.execute(batches, worker).await;

        // The caller gets the error back; the monitor gets the rate
        assert!(matches!(outcome.error, Some(EngineError::Worker(_))));
        assert!(monitor.metrics().error_rate_pct > 0.0);
        assert!(monitor.trend().reliability_score < 100.0);
    }

    #[tokio::test]
    async fn test_item_failure_fails_its_batch_only_once() {
        let (s, _monitor) = scheduler(4, 4);
        let batches = vec![Batch::new(0, CostClass::Cheap, vec![1u32, 3, 3])];
        let worker = Arc::new(|n: u32| async move {
            if n == 3 {
                Err(EngineError::Worker("worker refused item".to_string()))
            } else {
                Ok(n)
            }
        });

        let outcome = s.execute(batches, worker).await;

        assert!(outcome.error.is_some());
        assert!(outcome.results.is_empty());
    }
}
