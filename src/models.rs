//! Core data model for the aggregation engine.
//!
//! `Message` is the immutable input supplied by upstream connectors.
//! `Thread` and `CrossSourceThread` are the reconstructed outputs; consumers
//! receive cloned snapshots and must not mutate them in place.

use crate::error::EngineError;
use crate::perf::scheduler::CostClass;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// A single message as delivered by an upstream source.
///
/// The body is carried only for size-based cost classification; the engine
/// never interprets its content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub subject: String,
    pub from: String,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub body: String,
    /// Origin source tag (e.g. account or platform identifier).
    pub source: String,
}

impl Message {
    /// Reject messages missing required fields. Invalid items are dropped
    /// from a batch individually; the rest of the batch continues.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.id.trim().is_empty() {
            return Err(EngineError::Validation("message id is empty".to_string()));
        }
        if self.from.trim().is_empty() {
            return Err(EngineError::Validation(format!(
                "message {} has no sender address",
                self.id
            )));
        }
        Ok(())
    }

    /// Case-folded set of every address on the message (from/to/cc).
    pub fn participants(&self) -> BTreeSet<String> {
        std::iter::once(&self.from)
            .chain(self.to.iter())
            .chain(self.cc.iter())
            .map(|addr| addr.trim().to_lowercase())
            .filter(|addr| !addr.is_empty())
            .collect()
    }

    /// Classify by body size for batch partitioning.
    pub fn cost_class(&self) -> CostClass {
        match self.body.len() {
            0..=1024 => CostClass::Cheap,
            1025..=16_384 => CostClass::Medium,
            _ => CostClass::Expensive,
        }
    }
}

/// Lifecycle state of a reconstructed thread.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Active,
    Archived,
}

/// A reconstructed conversation grouping messages believed to belong to one
/// logical exchange.
///
/// Created on the first unmatched message, mutated on every subsequent match,
/// and removed only by merge absorption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    /// Content-derived id: sha256 over the canonical subject plus the sorted
    /// participant set at creation time. Not stable across merges.
    pub id: String,
    /// Canonical (normalized) subject.
    pub subject: String,
    /// Union of participant addresses over all member messages, case-folded.
    pub participants: BTreeSet<String>,
    /// Member messages, ordered by timestamp.
    pub messages: Vec<Message>,
    pub last_activity: DateTime<Utc>,
    pub status: ThreadStatus,
    /// Message-count-derived priority score.
    pub priority: f64,
    /// Source tags contributed by member messages.
    pub sources: BTreeSet<String>,
}

impl Thread {
    /// Attach a message, keeping the member list timestamp-sorted and the
    /// participant/source unions and last-activity timestamp current.
    ///
    /// Re-attaching an already-present message id replaces that entry, so
    /// reprocessing is idempotent.
    pub fn absorb(&mut self, message: Message) {
        for addr in message.participants() {
            self.participants.insert(addr);
        }
        if !message.source.trim().is_empty() {
            self.sources.insert(message.source.clone());
        }

        if let Some(existing) = self.messages.iter_mut().find(|m| m.id == message.id) {
            *existing = message;
        } else {
            self.messages.push(message);
        }

        self.messages
            .sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));

        if let Some(last) = self.messages.last() {
            self.last_activity = last.timestamp;
        }
        self.priority = (self.messages.len() as f64 / 10.0).min(5.0);
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}

/// Health of a conversation derived from the age of its newest message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ThreadHealth {
    Active,
    Stale,
    Dead,
}

/// Analytics snapshot computed when a cross-source thread is emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadAnalytics {
    #[serde(rename = "conversationDepth")]
    pub conversation_depth: usize,
    /// Mean of consecutive inter-message gaps, in hours.
    #[serde(rename = "averageResponseTime")]
    pub average_response_time_hours: f64,
    /// Sent-message counts per participant address.
    #[serde(rename = "participantEngagement")]
    pub participant_engagement: HashMap<String, u64>,
    /// Messages per day over the thread's span; 0 when the span is zero or
    /// there is at most one message.
    #[serde(rename = "threadVelocity")]
    pub thread_velocity: f64,
    #[serde(rename = "threadHealth")]
    pub thread_health: ThreadHealth,
}

/// Unification of independently-built threads from different sources that
/// represent the same underlying conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossSourceThread {
    pub id: String,
    /// Member thread ids, in store order.
    #[serde(rename = "threadIds")]
    pub thread_ids: Vec<String>,
    /// Union of member messages, timestamp-sorted.
    pub messages: Vec<Message>,
    pub participants: BTreeSet<String>,
    pub sources: BTreeSet<String>,
    pub analytics: ThreadAnalytics,
}

/// Point-in-time performance metrics, shaped for a process boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Mean latency over the recent sample window, in milliseconds.
    #[serde(rename = "processingTimeMs")]
    pub processing_time_ms: f64,
    /// Approximate, via a serialized-size heuristic.
    #[serde(rename = "memoryUsageBytes")]
    pub memory_usage_bytes: u64,
    #[serde(rename = "throughputPerSec")]
    pub throughput_per_sec: f64,
    #[serde(rename = "cacheHitRatePct")]
    pub cache_hit_rate_pct: f64,
    #[serde(rename = "errorRatePct")]
    pub error_rate_pct: f64,
}

/// Short-window performance trend comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceTrend {
    /// Percentage latency improvement of the most recent 10 samples over the
    /// preceding 10. Positive means faster.
    #[serde(rename = "latencyImprovementPct")]
    pub latency_improvement_pct: f64,
    #[serde(rename = "cacheEfficiencyPct")]
    pub cache_efficiency_pct: f64,
    /// `100 − mean recent error rate`.
    #[serde(rename = "reliabilityScore")]
    pub reliability_score: f64,
}
