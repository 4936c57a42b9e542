//! Result fusion stages.
//!
//! Each stage is a plain function over [`ScoredCandidate`] lists so the
//! retriever can compose them and tests can exercise them in isolation.

use std::cmp::Ordering;
use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use catalog_core::types::ScoredCandidate;

/// How per-query candidate lists are combined into one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMode {
    /// Round-robin across lists. Used for text-only retrieval.
    Interleave,
    /// Flatten and sort globally by score. Used when an image is supplied.
    ScoreMerge,
}

impl FusionMode {
    pub fn fuse(self, lists: Vec<Vec<ScoredCandidate>>) -> Vec<ScoredCandidate> {
        match self {
            FusionMode::Interleave => interleave(lists),
            FusionMode::ScoreMerge => merge_by_score(lists),
        }
    }
}

fn by_score_desc(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal)
}

/// Stable sort, highest score first.
pub fn sort_descending(candidates: &mut [ScoredCandidate]) {
    candidates.sort_by(by_score_desc);
}

/// Concatenate the lists in order and stable-sort the whole by score.
pub fn merge_by_score(lists: Vec<Vec<ScoredCandidate>>) -> Vec<ScoredCandidate> {
    let mut merged: Vec<ScoredCandidate> = lists.into_iter().flatten().collect();
    sort_descending(&mut merged);
    merged
}

/// Round-robin: first of list 0, first of list 1, ..., second of list 0, ...
/// Exhausted lists drop out of the rotation.
pub fn interleave(lists: Vec<Vec<ScoredCandidate>>) -> Vec<ScoredCandidate> {
    let total = lists.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(total);
    let mut rotation: VecDeque<_> = lists.into_iter().map(Vec::into_iter).collect();

    while let Some(mut current) = rotation.pop_front() {
        if let Some(candidate) = current.next() {
            out.push(candidate);
            rotation.push_back(current);
        }
    }
    out
}

/// Keep the first candidate per id.
pub fn dedup_by_id(candidates: Vec<ScoredCandidate>) -> Vec<ScoredCandidate> {
    let mut seen = HashSet::with_capacity(candidates.len());
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.id().to_string()))
        .collect()
}

/// Take the first `k`, then drop anything scoring at or below `threshold`.
pub fn truncate_and_threshold(
    mut candidates: Vec<ScoredCandidate>,
    k: usize,
    threshold: f32,
) -> Vec<ScoredCandidate> {
    candidates.truncate(k);
    candidates.retain(|c| c.score > threshold);
    candidates
}
