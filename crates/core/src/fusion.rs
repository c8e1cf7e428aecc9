use crate::models::{HitSource, RankedResult, StoreHit};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

pub const DEFAULT_RRF_K: f64 = 60.0;

const FIRST_PLACE_BONUS: f64 = 0.05;
const PODIUM_BONUS: f64 = 0.02;

/// One retrieval stage's ranked answer and its fusion weight.
#[derive(Debug, Clone, Copy)]
pub struct RankedList<'a> {
    pub source: HitSource,
    pub hits: &'a [StoreHit],
    pub weight: f64,
}

/// Keeps the first chunk of each file, so positions become file-level ranks.
pub fn dedupe_by_file(hits: &[StoreHit]) -> Vec<&StoreHit> {
    let mut seen = HashSet::new();
    hits.iter()
        .filter(|hit| seen.insert(hit.chunk.file_path.as_str()))
        .collect()
}

/// Flat bonus for the top of each list, applied once per list.
pub fn top_rank_bonus(rank: usize) -> f64 {
    match rank {
        0 => FIRST_PLACE_BONUS,
        1 | 2 => PODIUM_BONUS,
        _ => 0.0,
    }
}

/// Results of a single list in their original order, one per file.
pub fn rank_single(hits: &[StoreHit], source: HitSource, excerpt_chars: usize) -> Vec<RankedResult> {
    dedupe_by_file(hits)
        .into_iter()
        .enumerate()
        .map(|(rank, hit)| RankedResult::from_hit(hit, source, rank, excerpt_chars))
        .collect()
}

#[derive(Debug)]
struct Fused {
    result: RankedResult,
    best_contribution: f64,
}

/// Weighted reciprocal rank fusion keyed by file path.
pub fn fuse(lists: &[RankedList<'_>], k: f64, excerpt_chars: usize) -> Vec<RankedResult> {
    let mut fused = HashMap::<String, Fused>::new();

    for list in lists {
        for (rank, hit) in dedupe_by_file(list.hits).into_iter().enumerate() {
            let contribution = list.weight / (k + rank as f64 + 1.0);
            let entry = fused
                .entry(hit.chunk.file_path.clone())
                .or_insert_with(|| Fused {
                    result: RankedResult {
                        score: 0.0,
                        ..RankedResult::from_hit(hit, list.source, rank, excerpt_chars)
                    },
                    best_contribution: f64::NEG_INFINITY,
                });

            entry.result.score += contribution + top_rank_bonus(rank);
            match list.source {
                HitSource::Keyword => entry.result.bm25_rank = Some(rank),
                HitSource::Vector => entry.result.vector_rank = Some(rank),
            }

            if contribution > entry.best_contribution {
                entry.best_contribution = contribution;
                entry.result.excerpt = hit.chunk.excerpt(excerpt_chars);
                entry.result.content = hit.chunk.content.clone();
                entry.result.page_number = hit.chunk.page_number;
            }
        }
    }

    let mut results = fused
        .into_values()
        .map(|entry| entry.result)
        .collect::<Vec<_>>();
    results.sort_by(compare_fused);
    results
}

/// Score descending, then newest date, then path.
fn compare_fused(left: &RankedResult, right: &RankedResult) -> Ordering {
    right
        .score
        .total_cmp(&left.score)
        .then_with(|| right.date.cmp(&left.date))
        .then_with(|| left.file_path.cmp(&right.file_path))
}
