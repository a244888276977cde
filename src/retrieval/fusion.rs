//! Weighted Reciprocal Rank Fusion over any number of retriever lists.

use crate::retrieval::types::{FusedEntry, FusedResult, RetrievedContext};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// RRF constant - standard default (OpenSearch, LanceDB, Marqo all use K=60)
pub const DEFAULT_RRF_K: f64 = 60.0;

/// Weight applied to a retriever that has no entry in the weight map
pub const DEFAULT_RETRIEVER_WEIGHT: f64 = 1.0;

/// Tunables for one fusion call
#[derive(Debug, Clone, PartialEq)]
pub struct FusionParams {
    pub k: f64,
    /// Output size. `None` = length of the shortest non-empty input list.
    pub top_n: Option<usize>,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            k: DEFAULT_RRF_K,
            top_n: None,
        }
    }
}

#[derive(Debug)]
struct Accumulated {
    score: f64,
    contributors: Vec<String>,
}

/// Combine ranked lists using weighted Reciprocal Rank Fusion (RRF)
///
/// For each distinct content d:
/// ```text
/// RRF_score(d) = Σ weight(retriever_i) / (k + rank_i(d))
/// ```
/// summed over every list containing d. `rank_i` is the 1-based rank the source
/// retriever assigned. Content repeated inside one list counts once, at its best rank.
///
/// Ordering is score descending, then number of contributing lists descending,
/// then content ascending, so identical inputs always give identical output.
pub fn reciprocal_rank_fusion(
    lists: &[Vec<RetrievedContext>],
    weights: &BTreeMap<String, f64>,
    params: &FusionParams,
) -> FusedResult {
    // Keyed by content; BTreeMap keeps iteration independent of hashing
    let mut scores: BTreeMap<&str, Accumulated> = BTreeMap::new();

    for list in lists {
        let mut best_rank: HashMap<&str, &RetrievedContext> = HashMap::new();
        for ctx in list {
            best_rank
                .entry(ctx.content.as_str())
                .and_modify(|existing| {
                    if ctx.rank < existing.rank {
                        *existing = ctx;
                    }
                })
                .or_insert(ctx);
        }

        // Visit in rank order so per-content sums are always added in list order
        let mut deduped: Vec<&RetrievedContext> = best_rank.into_values().collect();
        deduped.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.content.cmp(&b.content)));

        for ctx in deduped {
            let weight = weights
                .get(&ctx.source_retriever)
                .copied()
                .unwrap_or(DEFAULT_RETRIEVER_WEIGHT);
            let rrf_score = weight / (params.k + ctx.rank as f64);

            let acc = scores.entry(ctx.content.as_str()).or_insert(Accumulated {
                score: 0.0,
                contributors: Vec::new(),
            });
            acc.score += rrf_score;
            acc.contributors.push(ctx.source_retriever.clone());
        }
    }

    let mut ranked: Vec<FusedEntry> = scores
        .into_iter()
        .map(|(content, acc)| FusedEntry {
            content: content.to_string(),
            score: acc.score,
            rank: 0,
            contributors: acc.contributors,
        })
        .collect();

    ranked.sort_by(compare_fused);

    let top_n = params.top_n.unwrap_or_else(|| default_top_n(lists));
    ranked.truncate(top_n);

    FusedResult::from_ordered(ranked)
}

fn compare_fused(a: &FusedEntry, b: &FusedEntry) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.contributors.len().cmp(&a.contributors.len()))
        .then_with(|| a.content.cmp(&b.content))
}

fn default_top_n(lists: &[Vec<RetrievedContext>]) -> usize {
    lists
        .iter()
        .map(Vec::len)
        .filter(|len| *len > 0)
        .min()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(source: &str, content: &str, rank: usize) -> RetrievedContext {
        RetrievedContext {
            source_retriever: source.to_string(),
            rank,
            content: content.to_string(),
            score: 0.0,
        }
    }

    fn equal_weights() -> BTreeMap<String, f64> {
        BTreeMap::from([("dense".to_string(), 0.5), ("bm25".to_string(), 0.5)])
    }

    #[test]
    fn test_rrf_basic_fusion_with_overlap() {
        let dense = vec![ctx("dense", "oats", 1), ctx("dense", "corn", 2), ctx("dense", "rice", 3)];
        let bm25 = vec![ctx("bm25", "corn", 1), ctx("bm25", "oats", 2), ctx("bm25", "bran", 3)];

        let fused =
            reciprocal_rank_fusion(&[dense, bm25], &equal_weights(), &FusionParams::default());

        // top_n defaults to shortest list (3); overlapping items lead
        assert_eq!(fused.len(), 3);
        let first_two: Vec<&str> =
            fused.entries()[..2].iter().map(|e| e.content.as_str()).collect();
        assert!(first_two.contains(&"oats") && first_two.contains(&"corn"));
        for (idx, entry) in fused.entries().iter().enumerate() {
            assert_eq!(entry.rank, idx + 1);
        }
    }

    #[test]
    fn test_rrf_score_additivity() {
        let dense = vec![ctx("dense", "x", 1), ctx("dense", "shared", 3)];
        let bm25 = vec![ctx("bm25", "shared", 2), ctx("bm25", "y", 1)];
        let weights = BTreeMap::from([("dense".to_string(), 0.7), ("bm25".to_string(), 0.3)]);
        let params = FusionParams { k: 60.0, top_n: Some(10) };

        let fused = reciprocal_rank_fusion(&[dense.clone(), bm25], &weights, &params);
        let shared = fused.entries().iter().find(|e| e.content == "shared").unwrap();
        let expected = 0.7 / (60.0 + 3.0) + 0.3 / (60.0 + 2.0);
        assert!((shared.score - expected).abs() < 1e-12);
        assert_eq!(shared.contributors, vec!["dense".to_string(), "bm25".to_string()]);

        let single = reciprocal_rank_fusion(&[dense], &weights, &params);
        let alone = single.entries().iter().find(|e| e.content == "shared").unwrap();
        assert!(shared.score > alone.score);
    }

    #[test]
    fn test_rrf_deterministic_across_calls() {
        let dense = vec![ctx("dense", "b", 1), ctx("dense", "a", 2), ctx("dense", "c", 3)];
        let bm25 = vec![ctx("bm25", "a", 1), ctx("bm25", "b", 2), ctx("bm25", "d", 3)];
        let lists = [dense, bm25];
        let params = FusionParams { k: 60.0, top_n: Some(4) };

        let first = reciprocal_rank_fusion(&lists, &equal_weights(), &params);
        for _ in 0..20 {
            let again = reciprocal_rank_fusion(&lists, &equal_weights(), &params);
            assert_eq!(again, first);
        }
    }

    #[test]
    fn test_rrf_ties_break_on_contributor_count_then_content() {
        // "solo" appears once at rank 1 with weight 2.0: 2/61.
        // "pair" appears twice at rank 1 with weight 1.0: 1/61 + 1/61. Same score.
        let a = vec![ctx("a", "pair", 1)];
        let b = vec![ctx("b", "pair", 1)];
        let c = vec![ctx("c", "solo", 1)];
        let weights = BTreeMap::from([
            ("a".to_string(), 1.0),
            ("b".to_string(), 1.0),
            ("c".to_string(), 2.0),
        ]);
        let params = FusionParams { k: 60.0, top_n: Some(5) };
        let fused = reciprocal_rank_fusion(&[c, a, b], &weights, &params);
        assert_eq!(fused.entries()[0].content, "pair");
        assert_eq!(fused.entries()[1].content, "solo");

        // Equal score and equal contributor count: lexical order
        let x = vec![ctx("dense", "zebra", 1)];
        let y = vec![ctx("bm25", "apple", 1)];
        let fused = reciprocal_rank_fusion(&[x, y], &equal_weights(), &params);
        assert_eq!(fused.entries()[0].content, "apple");
        assert_eq!(fused.entries()[1].content, "zebra");
    }

    #[test]
    fn test_rrf_duplicate_within_one_list_counts_once() {
        let dense = vec![ctx("dense", "dup", 1), ctx("dense", "dup", 4)];
        let params = FusionParams { k: 60.0, top_n: Some(5) };
        let fused = reciprocal_rank_fusion(&[dense], &equal_weights(), &params);
        assert_eq!(fused.len(), 1);
        assert!((fused.entries()[0].score - 0.5 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_rrf_unweighted_retriever_defaults_to_one() {
        let other = vec![ctx("other", "z", 1)];
        let fused = reciprocal_rank_fusion(&[other], &equal_weights(), &FusionParams::default());
        assert!((fused.entries()[0].score - 1.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_rrf_top_n_default_ignores_empty_lists() {
        let dense = vec![ctx("dense", "a", 1), ctx("dense", "b", 2)];
        let fused = reciprocal_rank_fusion(
            &[dense, Vec::new()],
            &equal_weights(),
            &FusionParams::default(),
        );
        assert_eq!(fused.len(), 2);
    }

    #[test]
    fn test_rrf_explicit_top_n_limits() {
        let dense = vec![ctx("dense", "a", 1), ctx("dense", "b", 2), ctx("dense", "c", 3)];
        let bm25 = vec![ctx("bm25", "d", 1), ctx("bm25", "e", 2), ctx("bm25", "f", 3)];
        let params = FusionParams { k: 60.0, top_n: Some(4) };
        let fused = reciprocal_rank_fusion(&[dense, bm25], &equal_weights(), &params);
        assert_eq!(fused.len(), 4);
    }

    #[test]
    fn test_rrf_all_empty() {
        let fused = reciprocal_rank_fusion(
            &[Vec::new(), Vec::new()],
            &equal_weights(),
            &FusionParams::default(),
        );
        assert!(fused.is_empty());
    }
}
