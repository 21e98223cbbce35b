//! Subject, participant, and time similarity primitives.
//!
//! All scores are normalized to [0, 1]. Subjects are compared in normalized
//! form so reply/forward noise never affects the distance.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// Similarity floor when one normalized subject extends the other.
const BASE_SUBJECT_MATCH: f64 = 0.9;

/// Normalize a subject for comparison.
///
/// Strips leading reply/forward markers (`re:`, `fwd:`, `fw:`,
/// case-insensitive), collapsing repeats like `Re: Re:`, then collapses
/// whitespace, trims, and lowercases.
pub fn normalize_subject(subject: &str) -> String {
    let mut normalized = subject.trim().to_lowercase();

    // Keep removing markers until none match
    loop {
        let before = normalized.clone();

        for prefix in &["re:", "fwd:", "fw:"] {
            if normalized.starts_with(prefix) {
                normalized = normalized[prefix.len()..].trim_start().to_string();
            }
        }

        if before == normalized {
            break;
        }
    }

    let words: Vec<&str> = normalized.split_whitespace().collect();
    words.join(" ")
}

/// Similarity of two subjects: 1.0 when the normalized forms are equal
/// (including two empties), otherwise `1 − editDistance / maxLen` over the
/// normalized forms.
///
/// A subject that extends the other ("Project Kickoff" vs "Project Kickoff
/// - Updated") shares its base subject, so containment floors the score at
/// [`BASE_SUBJECT_MATCH`]: raw edit distance alone would punish a long
/// suffix more than the rename it actually is.
pub fn subject_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_subject(a);
    let b = normalize_subject(b);

    if a == b {
        return 1.0;
    }

    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }

    let distance = edit_distance(&a, &b);
    let scaled = (1.0 - distance as f64 / max_len as f64).max(0.0);

    if !a.is_empty() && !b.is_empty() && (a.starts_with(&b) || b.starts_with(&a)) {
        return scaled.max(BASE_SUBJECT_MATCH);
    }
    scaled
}

/// Jaccard index over case-folded address sets. Two empty sets score 0.
pub fn participant_overlap(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }

    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        return 0.0;
    }

    intersection as f64 / union as f64
}

/// Linear temporal decay: 1.0 at zero distance, 0.0 at or beyond the window.
pub fn time_proximity(t1: DateTime<Utc>, t2: DateTime<Utc>, window_hours: i64) -> f64 {
    if window_hours <= 0 {
        return 0.0;
    }

    let delta_hours = (t1 - t2).num_seconds().abs() as f64 / 3600.0;
    let window = window_hours as f64;
    if delta_hours > window {
        return 0.0;
    }

    1.0 - delta_hours / window
}

/// Standard single-character insert/delete/substitute edit distance.
fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }

    prev[b.len()]
}
