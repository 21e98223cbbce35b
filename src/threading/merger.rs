//! Periodic thread consolidation.
//!
//! Near-duplicate threads appear when a source drops a participant or
//! mangles a subject just enough that matching seeded a second thread. The
//! consolidation pass rescans the full population pairwise and folds such
//! pairs together. Invocation cadence is the caller's responsibility.

use crate::error::EngineError;
use crate::threading::similarity::{participant_overlap, subject_similarity};
use crate::threading::store::ThreadStore;
use std::collections::HashSet;

const MERGE_SUBJECT_WEIGHT: f64 = 0.6;
const MERGE_PARTICIPANT_WEIGHT: f64 = 0.4;
const MERGE_THRESHOLD: f64 = 0.85;

/// One O(n²) pairwise pass over the current thread population.
///
/// Two threads merge when
/// `0.6·subjectSimilarity + 0.4·participantOverlap > 0.85`. Direction is
/// fixed: the earlier-indexed thread absorbs the later-indexed one. A thread
/// absorbed earlier in the pass is skipped as a future candidate, which
/// prevents double-merges within one pass.
///
/// Returns the number of merges applied.
pub fn consolidate(store: &mut ThreadStore) -> Result<usize, EngineError> {
    let ids = store.thread_ids();
    let mut absorbed: HashSet<String> = HashSet::new();
    let mut merges = 0usize;

    for i in 0..ids.len() {
        if absorbed.contains(&ids[i]) {
            continue;
        }

        for j in (i + 1)..ids.len() {
            if absorbed.contains(&ids[j]) {
                continue;
            }

            let score = {
                let target = store.get(&ids[i])?;
                let source = store.get(&ids[j])?;
                MERGE_SUBJECT_WEIGHT * subject_similarity(&target.subject, &source.subject)
                    + MERGE_PARTICIPANT_WEIGHT
                        * participant_overlap(&target.participants, &source.participants)
            };

            if score > MERGE_THRESHOLD {
                store.merge(&ids[i], &ids[j])?;
                absorbed.insert(ids[j].clone());
                merges += 1;
            }
        }
    }

    if merges > 0 {
        log::debug!("consolidation pass merged {} threads", merges);
    }

    Ok(merges)
}
