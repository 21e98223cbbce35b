//! Cached batch execution.
//!
//! The optimizer fronts the scheduler with the result cache: a keyed run
//! whose results are still cached skips execution entirely, and a fully
//! successful run is written back for the next caller. Cached payloads are
//! stored as `serde_json::Value` so one cache instance serves any
//! serializable result type.

use crate::error::EngineError;
use crate::perf::cache::CacheManager;
use crate::perf::scheduler::{BatchScheduler, CostClass, ExecutionOutcome};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

/// Priority assigned to cached run results. Hits boost it from here.
const RESULT_PRIORITY: f64 = 1.0;

pub struct Optimizer {
    cache: Arc<CacheManager<Value>>,
    scheduler: BatchScheduler,
}

impl Optimizer {
    pub fn new(cache: Arc<CacheManager<Value>>, scheduler: BatchScheduler) -> Self {
        Self { cache, scheduler }
    }

    /// Classify, partition, and execute `items`, short-circuiting through
    /// the cache when `cache_key` is given.
    ///
    /// A cached payload that no longer decodes as the expected result type
    /// is treated as a miss and recomputed; the rewrite on success replaces
    /// the inconsistent entry. Partial results from a failed run are never
    /// cached.
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
        if let Some(key) = cache_key
            && let Some(cached) = self.cache.get(key)
        {
            match decode_cached::<R>(key, cached) {
                Ok(results) => {
                    log::debug!("optimize: served {} from cache", key);
                    return ExecutionOutcome {
                        results,
                        error: None,
                    };
                }
                Err(err) => log::warn!("optimize: {}", err),
            }
        }

        let batches = self.scheduler.partition(items, classify);
        let outcome = self.scheduler.execute(batches, worker).await;

        if let Some(key) = cache_key
            && outcome.is_ok()
        {
            match serde_json::to_value(&outcome.results) {
                Ok(value) => self.cache.put(key, value, RESULT_PRIORITY),
                Err(err) => log::warn!("optimize: results for {} not cacheable: {}", key, err),
            }
        }

        outcome
    }

    pub fn cache(&self) -> &Arc<CacheManager<Value>> {
        &self.cache
    }
}

fn decode_cached<R: DeserializeOwned>(key: &str, value: Value) -> Result<Vec<R>, EngineError> {
    serde_json::from_value(value).map_err(|err| {
        EngineError::CacheInconsistency(format!(
            "cached payload for {} does not decode: {}",
            key, err
        ))
    })
}
