//! Thread set ownership and message placement.
//!
//! The store owns the thread population plus the message→thread index and is
//! the single writer for both. Invariant: a message id maps to exactly one
//! thread at any time. Threads are created on the first unmatched message and
//! removed only by merge absorption.

use crate::config::ThreadingOptions;
use crate::error::EngineError;
use crate::models::{Message, Thread, ThreadStatus};
use crate::threading::matcher;
use crate::threading::similarity::normalize_subject;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};

/// Outcome of a `process_batch` call. Rejected items carry the message id
/// (possibly empty) and the validation error; the rest of the batch is
/// unaffected.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub processed: usize,
    pub rejected: Vec<(String, EngineError)>,
    /// Ids of the threads the batch touched, in first-touch order.
    pub thread_ids: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ThreadStore {
    /// Threads in creation order. Index order is the tie-break order for
    /// matching and the absorb direction for merging.
    threads: Vec<Thread>,
    /// Thread id → position in `threads`. Rebuilt after merges.
    position: HashMap<String, usize>,
    /// Message id → owning thread id.
    message_index: HashMap<String, String>,
}

impl ThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place one message: update in place when its id is already indexed,
    /// otherwise attach to the best-matching thread or create a new one.
    ///
    /// Returns the id of the owning thread.
    pub fn process(
        &mut self,
        message: Message,
        opts: &ThreadingOptions,
    ) -> Result<String, EngineError> {
        message.validate()?;

        let message_id = message.id.clone();

        // Already indexed: idempotent in-place update
        if let Some(thread_id) = self.message_index.get(&message_id).cloned() {
            let idx = self.position_of(&thread_id)?;
            self.threads[idx].absorb(message);
            return Ok(thread_id);
        }

        match matcher::find_best_match(&message, &self.threads, opts) {
            Some(idx) => {
                let thread_id = self.threads[idx].id.clone();
                self.threads[idx].absorb(message);
                self.message_index.insert(message_id, thread_id.clone());
                Ok(thread_id)
            }
            None => {
                let subject = normalize_subject(&message.subject);
                let thread_id = derive_thread_id(&subject, &message.participants());

                // Ids are content-derived, so an unmatched message can
                // reproduce the identity of a thread whose participant set
                // has since grown past the match threshold. Same identity,
                // same thread: attach instead of seeding a duplicate.
                if let Some(&idx) = self.position.get(&thread_id) {
                    self.threads[idx].absorb(message);
                } else {
                    self.position.insert(thread_id.clone(), self.threads.len());
                    self.threads.push(Self::seed_thread(thread_id.clone(), subject, message));
                }
                self.message_index.insert(message_id, thread_id.clone());
                Ok(thread_id)
            }
        }
    }

    /// Process a batch in timestamp order so later messages can attach to
    /// threads seeded by earlier ones, never the reverse. Invalid items are
    /// rejected individually; the rest of the batch continues.
    pub fn process_batch(
        &mut self,
        mut messages: Vec<Message>,
        opts: &ThreadingOptions,
    ) -> BatchSummary {
        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));

        let mut summary = BatchSummary::default();
        for message in messages {
            let message_id = message.id.clone();
            match self.process(message, opts) {
                Ok(thread_id) => {
                    summary.processed += 1;
                    if !summary.thread_ids.contains(&thread_id) {
                        summary.thread_ids.push(thread_id);
                    }
                }
                Err(err) => summary.rejected.push((message_id, err)),
            }
        }

        log::debug!(
            "processed batch: {} placed, {} rejected, {} threads total",
            summary.processed,
            summary.rejected.len(),
            self.threads.len()
        );

        summary
    }

    /// Merge `source_id` into `target_id`: messages are concatenated and
    /// re-sorted, participant and source sets unioned, last-activity takes
    /// the max, every index entry for the source is repointed, and the
    /// source thread is removed.
    pub fn merge(&mut self, target_id: &str, source_id: &str) -> Result<(), EngineError> {
        if target_id == source_id {
            return Ok(());
        }

        let source_idx = self.position_of(source_id)?;
        let source = self.threads.remove(source_idx);

        // position_of on the target AFTER removal so the index is current
        self.position.remove(source_id);
        for idx in self.position.values_mut() {
            if *idx > source_idx {
                *idx -= 1;
            }
        }

        let target_idx = self.position_of(target_id)?;
        let target = &mut self.threads[target_idx];
        for message in source.messages {
            self.message_index
                .insert(message.id.clone(), target_id.to_string());
            target.absorb(message);
        }

        Ok(())
    }

    pub fn get(&self, thread_id: &str) -> Result<&Thread, EngineError> {
        let idx = self.position_of(thread_id)?;
        Ok(&self.threads[idx])
    }

    /// Owning thread of a message id.
    pub fn thread_of(&self, message_id: &str) -> Result<&Thread, EngineError> {
        let thread_id = self.message_index.get(message_id).ok_or_else(|| {
            EngineError::NotFound(format!("message {} is not indexed", message_id))
        })?;
        self.get(thread_id)
    }

    pub fn threads(&self) -> &[Thread] {
        &self.threads
    }

    pub fn thread_ids(&self) -> Vec<String> {
        self.threads.iter().map(|t| t.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn clear(&mut self) {
        self.threads.clear();
        self.position.clear();
        self.message_index.clear();
    }

    fn position_of(&self, thread_id: &str) -> Result<usize, EngineError> {
        self.position
            .get(thread_id)
            .copied()
            .ok_or_else(|| EngineError::NotFound(format!("thread {} not found", thread_id)))
    }

    /// Seed a new thread from its first message. The id is derived from the
    /// canonical subject plus the sorted participant set, so identical
    /// (subject, participants) pairs produce the same id at creation time.
    /// The guarantee does not survive a later merge.
    fn seed_thread(id: String, subject: String, message: Message) -> Thread {
        let mut thread = Thread {
            id,
            subject,
            participants: BTreeSet::new(),
            messages: Vec::new(),
            last_activity: message.timestamp,
            status: ThreadStatus::Active,
            priority: 0.0,
            sources: BTreeSet::new(),
        };
        thread.absorb(message);
        thread
    }
}

fn derive_thread_id(normalized_subject: &str, participants: &BTreeSet<String>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized_subject.as_bytes());
    for addr in participants {
        hasher.update(b"\n");
        hasher.update(addr.as_bytes());
    }

    hasher
        .finalize()
        .iter()
        .take(16)
        .map(|byte| format!("{:02x}", byte))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

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
    fn test_reply_attaches_to_existing_thread() {
        let opts = ThreadingOptions::default();
        let mut store = ThreadStore::new();

        let t1 = store
            .process(
                message("e1", "Kickoff", "john@example.com", &["jane@example.com"], 9),
                &opts,
            )
            .unwrap();
        let t2 = store
            .process(
                message("e2", "Re: Kickoff", "jane@example.com", &["john@example.com"], 10),
                &opts,
            )
            .unwrap();

        assert_eq!(t1, t2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&t1).unwrap().message_count(), 2);
    }

    #[test]
    fn test_reprocessing_same_id_is_idempotent() {
        let opts = ThreadingOptions::default();
        let mut store = ThreadStore::new();

        let msg = message("e1", "Kickoff", "john@example.com", &["jane@example.com"], 9);
        store.process(msg.clone(), &opts).unwrap();
        store.process(msg.clone(), &opts).unwrap();
        store.process(msg, &opts).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.threads()[0].message_count(), 1);
    }

    #[test]
    fn test_deterministic_thread_id_at_creation() {
        let opts = ThreadingOptions::default();

        let mut a = ThreadStore::new();
        let mut b = ThreadStore::new();
        let id_a = a
            .process(
                message("e1", "Kickoff", "john@example.com", &["jane@example.com"], 9),
                &opts,
            )
            .unwrap();
        let id_b = b
            .process(
                message("e9", "Re: Kickoff", "jane@example.com", &["john@example.com"], 9),
                &opts,
            )
            .unwrap();

        // Same canonical subject + same participant set → same id
        assert_eq!(id_a, id_b);
    }

    #[test]
    fn test_process_batch_sorts_by_timestamp() {
        let opts = ThreadingOptions::default();
        let mut store = ThreadStore::new();

        // Reply arrives before the root in submission order
        let summary = store.process_batch(
            vec![
                message("e2", "Re: Kickoff", "jane@example.com", &["john@example.com"], 10),
                message("e1", "Kickoff", "john@example.com", &["jane@example.com"], 9),
            ],
            &opts,
        );

        assert_eq!(summary.processed, 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.threads()[0].messages[0].id, "e1");
    }

    #[test]
    fn test_process_batch_rejects_invalid_items_only() {
        let opts = ThreadingOptions::default();
        let mut store = ThreadStore::new();

        let mut bad = message("", "Kickoff", "john@example.com", &[], 9);
        bad.id = String::new();

        let summary = store.process_batch(
            vec![
                bad,
                message("e1", "Kickoff", "john@example.com", &["jane@example.com"], 9),
            ],
            &opts,
        );

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.rejected.len(), 1);
        assert!(matches!(summary.rejected[0].1, EngineError::Validation(_)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_unmatched_message_with_colliding_seed_id_attaches() {
        let opts = ThreadingOptions::default();
        let mut store = ThreadStore::new();

        let t1 = store
            .process(
                message("m1", "Sprint Review", "john@example.com", &["jane@example.com"], 9),
                &opts,
            )
            .unwrap();
        // Grow the participant set to six so a later {john, jane} message
        // scores below the match threshold once outside the time window
        store
            .process(
                message(
                    "m2",
                    "Re: Sprint Review",
                    "jane@example.com",
                    &[
                        "john@example.com",
                        "carol@example.com",
                        "dave@example.com",
                        "erin@example.com",
                        "frank@example.com",
                    ],
                    10,
                ),
                &opts,
            )
            .unwrap();

        let mut late = message("m3", "Sprint Review", "john@example.com", &["jane@example.com"], 9);
        late.timestamp = Utc.with_ymd_and_hms(2026, 3, 30, 9, 0, 0).unwrap();

        // Unmatched, but its (subject, participants) identity is the same
        // one that seeded t1 — it must land there, not shadow it
        let t3 = store.process(late, &opts).unwrap();

        assert_eq!(t3, t1);
        assert_eq!(store.len(), 1);
        let owner = store.thread_of("m3").unwrap();
        assert_eq!(owner.id, t1);
        assert!(owner.messages.iter().any(|m| m.id == "m3"));
        assert_eq!(owner.message_count(), 3);
    }

    #[test]
    fn test_merge_repoints_message_index() {
        let opts = ThreadingOptions::default();
        let mut store = ThreadStore::new();

        let t1 = store
            .process(
                message("e1", "Kickoff", "john@example.com", &["jane@example.com"], 9),
                &opts,
            )
            .unwrap();
        let t2 = store
            .process(
                message("e2", "Unrelated budget topic", "mark@example.com", &["sue@example.com"], 9),
                &opts,
            )
            .unwrap();
        assert_ne!(t1, t2);

        store.merge(&t1, &t2).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.thread_of("e2").unwrap().id, t1);
        assert_eq!(store.get(&t1).unwrap().message_count(), 2);
        assert!(store.get(&t2).is_err());
    }

    #[test]
    fn test_unknown_thread_is_not_found() {
        let store = ThreadStore::new();
        assert!(matches!(store.get("missing"), Err(EngineError::NotFound(_))));
        assert!(matches!(store.thread_of("missing"), Err(EngineError::NotFound(_))));
    }
}
