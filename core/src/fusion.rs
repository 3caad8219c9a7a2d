//! Score fusion for two ranked lists: min-max weighted blending and
//! Reciprocal Rank Fusion.
//!
//! Inputs are `(key, score)` slices already sorted best-first by their source.
//! Outputs are sorted by fused score descending; equal scores keep the order in
//! which keys were first seen (lexical list first, then semantic).

use std::collections::HashMap;
use std::hash::Hash;

/// Scale scores to [0, 1]. A list whose scores are all equal maps to all 1.0.
pub fn min_max_normalize(scores: &[f64]) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }
    let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if range == 0.0 || !range.is_finite() {
        return vec![1.0; scores.len()];
    }
    scores.iter().map(|s| (s - min) / range).collect()
}

/// alpha * bm25 + (1 - alpha) * semantic
pub fn hybrid_score(bm25: f64, semantic: f64, alpha: f64) -> f64 {
    alpha * bm25 + (1.0 - alpha) * semantic
}

/// 1 / (k + rank), rank 1-based.
pub fn rrf_score(rank: usize, k: f64) -> f64 {
    1.0 / (k + rank as f64)
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeightedHit<T> {
    pub key: T,
    pub score: f64,
    pub bm25_score: f64,
    pub semantic_score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RrfHit<T> {
    pub key: T,
    pub score: f64,
    pub bm25_rank: Option<usize>,
    pub semantic_rank: Option<usize>,
}

/// Insertion-ordered accumulator keyed by `T`.
struct Merge<T, V> {
    slots: HashMap<T, usize>,
    entries: Vec<(T, V)>,
}

impl<T: Clone + Eq + Hash, V: Default> Merge<T, V> {
    fn with_capacity(n: usize) -> Self {
        Self { slots: HashMap::with_capacity(n), entries: Vec::with_capacity(n) }
    }

    fn entry(&mut self, key: &T) -> &mut V {
        let idx = match self.slots.get(key) {
            Some(&i) => i,
            None => {
                self.entries.push((key.clone(), V::default()));
                self.slots.insert(key.clone(), self.entries.len() - 1);
                self.entries.len() - 1
            }
        };
        &mut self.entries[idx].1
    }
}

fn sort_desc<H>(hits: &mut [H], score: impl Fn(&H) -> f64) {
    // Stable, so ties keep first-seen order.
    hits.sort_by(|a, b| score(b).total_cmp(&score(a)));
}

/// Min-max normalize each list, keep each key's best normalized score per
/// source (0.0 when absent), and blend with `alpha`.
pub fn weighted_fusion<T: Clone + Eq + Hash>(
    lexical: &[(T, f64)],
    semantic: &[(T, f64)],
    alpha: f64,
) -> Vec<WeightedHit<T>> {
    #[derive(Default)]
    struct Pair {
        bm25: f64,
        semantic: f64,
    }

    let lex_norm = min_max_normalize(&lexical.iter().map(|(_, s)| *s).collect::<Vec<_>>());
    let sem_norm = min_max_normalize(&semantic.iter().map(|(_, s)| *s).collect::<Vec<_>>());

    let mut merged: Merge<T, Pair> = Merge::with_capacity(lexical.len() + semantic.len());
    for ((key, _), norm) in lexical.iter().zip(lex_norm) {
        let pair = merged.entry(key);
        pair.bm25 = pair.bm25.max(norm);
    }
    for ((key, _), norm) in semantic.iter().zip(sem_norm) {
        let pair = merged.entry(key);
        pair.semantic = pair.semantic.max(norm);
    }

    let mut hits: Vec<WeightedHit<T>> = merged
        .entries
        .into_iter()
        .map(|(key, p)| WeightedHit {
            key,
            score: hybrid_score(p.bm25, p.semantic, alpha),
            bm25_score: p.bm25,
            semantic_score: p.semantic,
        })
        .collect();
    sort_desc(&mut hits, |h| h.score);
    hits
}

/// Sum `1 / (k + rank)` over the sources each key appears in. A key repeated
/// within one source counts once, at its best rank.
pub fn reciprocal_rank_fusion<T: Clone + Eq + Hash>(
    lexical: &[(T, f64)],
    semantic: &[(T, f64)],
    k: f64,
) -> Vec<RrfHit<T>> {
    #[derive(Default)]
    struct Ranks {
        bm25: Option<usize>,
        semantic: Option<usize>,
    }

    let mut merged: Merge<T, Ranks> = Merge::with_capacity(lexical.len() + semantic.len());
    for (rank, (key, _)) in lexical.iter().enumerate() {
        let r = merged.entry(key);
        r.bm25.get_or_insert(rank + 1);
    }
    for (rank, (key, _)) in semantic.iter().enumerate() {
        let r = merged.entry(key);
        r.semantic.get_or_insert(rank + 1);
    }

    let mut hits: Vec<RrfHit<T>> = merged
        .entries
        .into_iter()
        .map(|(key, r)| RrfHit {
            key,
            score: r.bm25.map_or(0.0, |rank| rrf_score(rank, k)) + r.semantic.map_or(0.0, |rank| rrf_score(rank, k)),
            bm25_rank: r.bm25,
            semantic_rank: r.semantic,
        })
        .collect();
    sort_desc(&mut hits, |h| h.score);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    const K: f64 = 60.0;

    #[test]
    fn normalize_bounds() {
        let n = min_max_normalize(&[3.0, 1.0, 2.0, 5.0]);
        assert_eq!(n, vec![0.5, 0.0, 0.25, 1.0]);
        assert!(n.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn normalize_uniform_and_empty() {
        assert_eq!(min_max_normalize(&[0.7, 0.7, 0.7]), vec![1.0, 1.0, 1.0]);
        assert_eq!(min_max_normalize(&[-2.0]), vec![1.0]);
        assert!(min_max_normalize(&[]).is_empty());
    }

    #[test]
    fn rrf_score_monotonic() {
        for rank in 1..50 {
            assert!(rrf_score(rank, K) > rrf_score(rank + 1, K));
        }
        for k in [0.5, 1.0, 10.0, 60.0] {
            assert!(rrf_score(3, k) > rrf_score(3, k + 1.0));
        }
        assert_eq!(rrf_score(1, 60.0), 1.0 / 61.0);
    }

    #[test]
    fn weighted_prefers_stronger_blend() {
        // Anchors pin the normalization range to [0, 1] on both sides.
        let lexical = vec![("z", 1.0), ("x", 0.8), ("y", 0.3), ("w", 0.0)];
        let semantic = vec![("w", 1.0), ("y", 0.9), ("x", 0.2), ("z", 0.0)];
        let fused = weighted_fusion(&lexical, &semantic, 0.5);
        assert_eq!(fused[0].key, "y");
        let x = fused.iter().find(|h| h.key == "x").unwrap();
        let y = fused.iter().find(|h| h.key == "y").unwrap();
        assert!((x.score - 0.5).abs() < 1e-12);
        assert!((y.score - 0.6).abs() < 1e-12);
    }

    #[test]
    fn weighted_missing_source_counts_zero() {
        let fused = weighted_fusion(&[("a", 4.0), ("b", 2.0)], &[("c", 0.9), ("a", 0.1)], 0.5);
        let get = |k: &str| fused.iter().find(|h| h.key == k).unwrap().clone();
        assert_eq!(get("b").semantic_score, 0.0);
        assert_eq!(get("c").bm25_score, 0.0);
        assert_eq!(get("a").score, 0.5);
        assert_eq!(fused.len(), 3);
    }

    #[test]
    fn alpha_extremes_follow_one_source() {
        let lexical = vec![("a", 9.0), ("b", 5.0), ("c", 1.0)];
        let semantic = vec![("c", 0.9), ("d", 0.5), ("a", 0.2)];

        let lex_only: Vec<&str> = weighted_fusion(&lexical, &semantic, 1.0).iter().map(|h| h.key).take(3).collect();
        assert_eq!(lex_only, vec!["a", "b", "c"]);

        let sem_only: Vec<&str> = weighted_fusion(&lexical, &semantic, 0.0).iter().map(|h| h.key).take(3).collect();
        assert_eq!(sem_only, vec!["c", "d", "a"]);
    }

    #[test]
    fn weighted_keeps_best_duplicate() {
        let fused = weighted_fusion(&[("a", 1.0), ("b", 0.5), ("a", 0.0)], &[], 1.0);
        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].key, "a");
        assert_eq!(fused[0].bm25_score, 1.0);
    }

    #[test]
    fn rrf_tracks_ranks() {
        let fused = reciprocal_rank_fusion(&[(2, 3.1)], &[(3, 0.7)], K);
        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0], RrfHit { key: 2, score: 1.0 / 61.0, bm25_rank: Some(1), semantic_rank: None });
        assert_eq!(fused[1], RrfHit { key: 3, score: 1.0 / 61.0, bm25_rank: None, semantic_rank: Some(1) });
    }

    #[test]
    fn rrf_rewards_agreement() {
        let fused = reciprocal_rank_fusion(&[(1, 0.9), (2, 0.8), (3, 0.7)], &[(1, 10.0), (3, 8.0), (5, 5.0)], K);
        assert_eq!(fused.len(), 4);
        assert_eq!(fused[0].key, 1);
        assert_eq!(fused[1].key, 3);
    }

    #[test]
    fn rrf_ignores_raw_scores() {
        let a = reciprocal_rank_fusion(&[(1, 100.0), (2, 0.01)], &[(2, 0.99), (1, 0.01)], K);
        assert!((a[0].score - a[1].score).abs() < 1e-15);
        // Tie resolved by first-seen order.
        assert_eq!(a[0].key, 1);
    }

    #[test]
    fn rrf_duplicate_counts_once() {
        let fused = reciprocal_rank_fusion(&[(1, 1.0), (1, 0.5)], &[], K);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].score, rrf_score(1, K));
    }

    #[test]
    fn empty_inputs() {
        let none: Vec<(u8, f64)> = vec![];
        assert!(weighted_fusion(&none, &none, 0.5).is_empty());
        assert!(reciprocal_rank_fusion(&none, &none, K).is_empty());
    }
}
