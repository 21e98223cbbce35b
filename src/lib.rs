//! Conflux: cross-source conversation aggregation engine.
//!
//! Messages collected from multiple upstream sources (mail accounts, chat
//! connectors, whatever the caller plugs in) are grouped into reconstructed
//! conversation threads, periodically consolidated, and linked across sources
//! when two independently-built threads turn out to be the same exchange.
//!
//! A generic performance layer (TTL/priority cache, priority-ordered batch
//! scheduler with bounded concurrency, self-tuning monitor) wraps arbitrary
//! per-item work so callers can analyze threads cheaply and predictably.
//!
//! ## Module structure
//!
//! - `threading`: similarity scoring, thread matching, store, merge pass,
//!   cross-source linking
//! - `perf`: cache manager, batch scheduler, performance monitor, optimizer
//! - `aggregator`: the facade owning explicit component instances
//!
//! Connector/auth concerns live entirely upstream; consumers downstream must
//! treat returned threads as read-only snapshots.

pub mod aggregator;
pub mod config;
pub mod error;
pub mod models;
pub mod perf;
pub mod threading;

pub use aggregator::MessageAggregator;
pub use config::{EngineConfig, ThreadingOptions};
pub use error::EngineError;
pub use models::{CrossSourceThread, Message, MetricsSnapshot, Thread, ThreadAnalytics};

use env_logger::Env;
use std::sync::Once;

static LOGGER: Once = Once::new();

/// Initialize the process-wide logger once. Safe to call repeatedly.
pub fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    });
}
