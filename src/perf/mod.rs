//! Performance layer: result caching, cost-aware batch scheduling, and the
//! closed-loop monitor that retunes both from observed behavior.
//!
//! The layer is generic over work-item and result types; nothing in it knows
//! about messages or threads.

pub mod cache;
pub mod monitor;
pub mod optimizer;
pub mod scheduler;

pub use cache::{CacheManager, CacheStats};
pub use monitor::PerformanceMonitor;
pub use optimizer::Optimizer;
pub use scheduler::{Batch, BatchScheduler, BatchStatus, CostClass, ExecutionOutcome};
