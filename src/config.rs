//! Environment-driven runtime configuration.

use std::env;
use std::time::Duration;

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<f64>().ok())
        .unwrap_or(default)
}

fn env_duration_millis(key: &str, default_millis: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_millis(default_millis))
}

/// Per-call threading options.
///
/// `participant_threshold` and `subject_similarity_threshold` are reserved:
/// they are carried through the API but not yet wired into non-strict
/// scoring, matching the reference behavior.
#[derive(Debug, Clone)]
pub struct ThreadingOptions {
    pub strict_mode: bool,
    /// Window for the time-proximity component of the match score.
    pub time_window_hours: i64,
    /// Reserved.
    pub participant_threshold: f64,
    /// Reserved for strict mode.
    pub subject_similarity_threshold: f64,
}

impl Default for ThreadingOptions {
    fn default() -> Self {
        Self {
            strict_mode: false,
            time_window_hours: 168,
            participant_threshold: 0.6,
            subject_similarity_threshold: 0.8,
        }
    }
}

/// Engine-wide configuration with env-var overrides.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub threading: ThreadingOptions,
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
    pub sweep_interval: Duration,
    pub batch_size: usize,
    pub concurrency_limit: usize,
    pub target_latency_ms: f64,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let threading = ThreadingOptions {
            strict_mode: env_bool("CONFLUX_STRICT_MODE", false),
            time_window_hours: env_i64("CONFLUX_TIME_WINDOW_HOURS", 168),
            ..ThreadingOptions::default()
        };

        let ttl_hours = env_i64("CONFLUX_CACHE_TTL_HOURS", 24).max(1) as u64;

        Self {
            threading,
            cache_capacity: env_usize("CONFLUX_CACHE_CAPACITY", 1000).max(1),
            cache_ttl: Duration::from_secs(ttl_hours * 3600),
            sweep_interval: env_duration_millis("CONFLUX_SWEEP_INTERVAL_MS", 60_000),
            batch_size: env_usize("CONFLUX_BATCH_SIZE", 50).clamp(1, 100),
            concurrency_limit: env_usize("CONFLUX_CONCURRENCY_LIMIT", num_cpus::get()).max(1),
            target_latency_ms: env_f64("CONFLUX_TARGET_LATENCY_MS", 500.0).max(1.0),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
