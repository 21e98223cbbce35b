//! Cross-source thread linking.
//!
//! Threads built independently from different sources can describe the same
//! conversation. Linking groups them into `CrossSourceThread` aggregates
//! without touching the originals, so the thresholds are stricter than the
//! merge pass: merging deletes a thread, linking only annotates.

use crate::models::{CrossSourceThread, Message, Thread, ThreadAnalytics, ThreadHealth};
use crate::threading::similarity::{participant_overlap, subject_similarity};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};

const LINK_PARTICIPANT_THRESHOLD: f64 = 0.8;
const LINK_SUBJECT_THRESHOLD: f64 = 0.9;

const HEALTH_ACTIVE_DAYS: i64 = 7;
const HEALTH_STALE_DAYS: i64 = 30;

/// Group equivalent threads into cross-source aggregates.
///
/// For each not-yet-linked thread, every other thread with
/// `participantOverlap > 0.8 AND subjectSimilarity > 0.9` joins its group.
/// Groups with more than one member are emitted; their members are marked
/// processed so no thread appears in a second group within one pass.
pub fn link(threads: &[Thread]) -> Vec<CrossSourceThread> {
    link_at(threads, Utc::now())
}

/// `link` with an explicit "now" so health classification is testable.
pub fn link_at(threads: &[Thread], now: DateTime<Utc>) -> Vec<CrossSourceThread> {
    let mut processed = vec![false; threads.len()];
    let mut linked = Vec::new();

    for i in 0..threads.len() {
        if processed[i] {
            continue;
        }

        let mut group = vec![i];
        for j in 0..threads.len() {
            if j == i || processed[j] {
                continue;
            }

            let overlap = participant_overlap(&threads[i].participants, &threads[j].participants);
            let subject = subject_similarity(&threads[i].subject, &threads[j].subject);
            if overlap > LINK_PARTICIPANT_THRESHOLD && subject > LINK_SUBJECT_THRESHOLD {
                group.push(j);
            }
        }

        if group.len() > 1 {
            for &member in &group {
                processed[member] = true;
            }
            let members: Vec<&Thread> = group.iter().map(|&idx| &threads[idx]).collect();
            linked.push(build_cross_source(&members, now));
        }
    }

    log::debug!(
        "linking pass: {} cross-source threads from {} threads",
        linked.len(),
        threads.len()
    );

    linked
}

fn build_cross_source(members: &[&Thread], now: DateTime<Utc>) -> CrossSourceThread {
    let thread_ids: Vec<String> = members.iter().map(|t| t.id.clone()).collect();

    let mut messages: Vec<Message> = members
        .iter()
        .flat_map(|t| t.messages.iter().cloned())
        .collect();
    messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));

    let participants: BTreeSet<String> = members
        .iter()
        .flat_map(|t| t.participants.iter().cloned())
        .collect();
    let sources: BTreeSet<String> = members
        .iter()
        .flat_map(|t| t.sources.iter().cloned())
        .collect();

    let analytics = analyze(&messages, now);

    CrossSourceThread {
        id: derive_link_id(&thread_ids),
        thread_ids,
        messages,
        participants,
        sources,
        analytics,
    }
}

/// Analytics snapshot over a timestamp-sorted message list.
///
/// Zero messages yields a defined neutral snapshot (depth 0, health `dead`),
/// never an error. Velocity is 0 when the span is zero or there is at most
/// one message, so it can never be NaN or infinite.
pub fn analyze(messages: &[Message], now: DateTime<Utc>) -> ThreadAnalytics {
    let conversation_depth = messages.len();

    let average_response_time_hours = if messages.len() < 2 {
        0.0
    } else {
        let total_gap_secs: i64 = messages
            .windows(2)
            .map(|pair| (pair[1].timestamp - pair[0].timestamp).num_seconds())
            .sum();
        total_gap_secs as f64 / 3600.0 / (messages.len() - 1) as f64
    };

    let mut participant_engagement: HashMap<String, u64> = HashMap::new();
    for message in messages {
        let sender = message.from.trim().to_lowercase();
        if !sender.is_empty() {
            *participant_engagement.entry(sender).or_insert(0) += 1;
        }
    }

    let thread_velocity = match (messages.first(), messages.last()) {
        (Some(first), Some(last)) if messages.len() > 1 => {
            let span_days = (last.timestamp - first.timestamp).num_seconds() as f64 / 86_400.0;
            if span_days > 0.0 {
                messages.len() as f64 / span_days
            } else {
                0.0
            }
        }
        _ => 0.0,
    };

    let thread_health = match messages.last() {
        Some(last) => {
            let age_days = (now - last.timestamp).num_days();
            if age_days < HEALTH_ACTIVE_DAYS {
                ThreadHealth::Active
            } else if age_days < HEALTH_STALE_DAYS {
                ThreadHealth::Stale
            } else {
                ThreadHealth::Dead
            }
        }
        None => ThreadHealth::Dead,
    };

    ThreadAnalytics {
        conversation_depth,
        average_response_time_hours,
        participant_engagement,
        thread_velocity,
        thread_health,
    }
}

fn derive_link_id(thread_ids: &[String]) -> String {
    let mut sorted = thread_ids.to_vec();
    sorted.sort();

    let mut hasher = Sha256::new();
    for id in sorted {
        hasher.update(id.as_bytes());
        hasher.update(b"\n");
    }

    hasher
        .finalize()
        .iter()
        .take(16)
        .map(|byte| format!("{:02x}", byte))
        .collect()
}
