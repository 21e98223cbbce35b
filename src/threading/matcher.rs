//! Scoring of a message against existing threads.
//!
//! The blended score weighs normalized subject distance highest, then
//! participant overlap, then temporal proximity. A reserved slot exists for
//! reply-header linkage once upstream sources start supplying it.

use crate::config::ThreadingOptions;
use crate::models::{Message, Thread};
use crate::threading::similarity::{participant_overlap, subject_similarity, time_proximity};
use rayon::prelude::*;

const SUBJECT_WEIGHT: f64 = 0.4;
const PARTICIPANT_WEIGHT: f64 = 0.3;
const TIME_WEIGHT: f64 = 0.2;
const REFERENCES_WEIGHT: f64 = 0.1;

/// Minimum blended score for a thread to be considered a match candidate.
pub const MATCH_THRESHOLD: f64 = 0.5;

/// Blended match score in [0, 1].
pub fn score(message: &Message, thread: &Thread, opts: &ThreadingOptions) -> f64 {
    let subject = subject_similarity(&message.subject, &thread.subject);
    let participants = participant_overlap(&message.participants(), &thread.participants);
    let time = time_proximity(message.timestamp, thread.last_activity, opts.time_window_hours);
    let references = references_score(message, thread);

    (SUBJECT_WEIGHT * subject
        + PARTICIPANT_WEIGHT * participants
        + TIME_WEIGHT * time
        + REFERENCES_WEIGHT * references)
        .clamp(0.0, 1.0)
}

/// Reserved extension point for In-Reply-To/References linkage. Upstream
/// sources do not supply reply headers yet, so this always contributes 0.
fn references_score(_message: &Message, _thread: &Thread) -> f64 {
    0.0
}

/// Find the best-matching thread for a message.
///
/// Scores every thread in parallel, keeps candidates above
/// [`MATCH_THRESHOLD`], and returns the index of the maximum. Ties resolve
/// to the lowest store index so runs are reproducible; callers must not
/// attach semantics to that order.
pub fn find_best_match(
    message: &Message,
    threads: &[Thread],
    opts: &ThreadingOptions,
) -> Option<usize> {
    threads
        .par_iter()
        .enumerate()
        .map(|(idx, thread)| (idx, score(message, thread, opts)))
        .filter(|(_, s)| *s > MATCH_THRESHOLD)
        .reduce_with(|a, b| {
            if b.1 > a.1 || (b.1 == a.1 && b.0 < a.0) {
                b
            } else {
                a
            }
        })
        .map(|(idx, _)| idx)
}
