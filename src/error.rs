use thiserror::Error;

/// Error taxonomy for the aggregation engine.
///
/// No component retries internally; retry policy belongs to the caller.
/// Per-item failures are surfaced through metrics rather than logs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// A message is missing a required field. The offending item is rejected
    /// and the rest of the batch continues.
    #[error("validation error: {0}")]
    Validation(String),

    /// An accessor asked for an unknown thread or cache key. Surfaced to the
    /// caller as-is.
    #[error("not found: {0}")]
    NotFound(String),

    /// A wrapped per-item worker failed. Fails the owning batch and aborts
    /// the enclosing execute call; results from batches that already
    /// completed are preserved.
    #[error("worker error: {0}")]
    Worker(String),

    /// A cached payload no longer decodes as the expected result type.
    /// Logged and recomputed rather than failing the run; the successful
    /// rewrite replaces the bad entry.
    #[error("cache inconsistency: {0}")]
    CacheInconsistency(String),
}
