//! Conversation reconstruction.
//!
//! Incoming messages carry no reply headers, so threads are rebuilt from
//! similarity alone: normalized subject distance, participant-set overlap,
//! and temporal proximity. The flow is
//!
//! 1. `store::ThreadStore::process` places each message via
//!    `matcher::find_best_match`
//! 2. `merger::consolidate` periodically collapses near-duplicate threads
//! 3. `linker::link` groups equivalent threads from different sources into
//!    `CrossSourceThread` aggregates
//!
//! Linking thresholds are intentionally stricter than merge thresholds:
//! linking preserves both originals, merging deletes one.

pub mod linker;
pub mod matcher;
pub mod merger;
pub mod similarity;
pub mod store;

pub use linker::{analyze, link};
pub use merger::consolidate;
pub use store::{BatchSummary, ThreadStore};
