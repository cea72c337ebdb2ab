//! Retrieval quality metrics.
//!
//! Labels of `-1` mark empty result slots and never count as hits.

use crate::results::SearchResults;
use std::collections::HashSet;

/// Fraction of the true top-`k` found among the first `k` retrieved labels.
///
/// recall@k = |retrieved ∩ ground_truth| / k
pub fn recall_at_k(ground_truth: &[i64], retrieved: &[i64], k: usize) -> f32 {
    if k == 0 || ground_truth.is_empty() {
        return 0.0;
    }

    let gt_set: HashSet<i64> = ground_truth
        .iter()
        .take(k)
        .copied()
        .filter(|&l| l >= 0)
        .collect();
    let hits = retrieved
        .iter()
        .take(k)
        .filter(|&&l| l >= 0)
        .collect::<HashSet<_>>()
        .into_iter()
        .filter(|l| gt_set.contains(l))
        .count();
    hits as f32 / k as f32
}

/// Fraction of the (non-empty) retrieved labels that are true neighbors.
pub fn precision_at_k(ground_truth: &[i64], retrieved: &[i64], k: usize) -> f32 {
    let gt_set: HashSet<i64> = ground_truth.iter().take(k).copied().collect();
    let retrieved_k: Vec<i64> = retrieved
        .iter()
        .take(k)
        .copied()
        .filter(|&l| l >= 0)
        .collect();
    if retrieved_k.is_empty() {
        return 0.0;
    }

    let hits = retrieved_k.iter().filter(|id| gt_set.contains(id)).count();
    hits as f32 / retrieved_k.len() as f32
}

/// Mean recall@k over every query of two result sets.
///
/// Both sets must come from the same queries; `k` may not exceed either
/// result width.
pub fn mean_recall(ground_truth: &SearchResults, retrieved: &SearchResults, k: usize) -> f32 {
    let nq = ground_truth.num_queries().min(retrieved.num_queries());
    if nq == 0 {
        return 0.0;
    }
    let total: f32 = (0..nq)
        .map(|q| recall_at_k(ground_truth.labels_of(q), retrieved.labels_of(q), k))
        .sum();
    total / nq as f32
}

/// Recall at several cutoffs, e.g. recall@1, recall@10, recall@100.
pub fn recall_curve(ground_truth: &[i64], retrieved: &[i64], k_values: &[usize]) -> Vec<(usize, f32)> {
    k_values
        .iter()
        .map(|&k| (k, recall_at_k(ground_truth, retrieved, k)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recall_at_k() {
        let gt = vec![1, 2, 3, 4, 5];
        let retrieved = vec![1, 2, 3, 6, 7];
        assert!((recall_at_k(&gt, &retrieved, 5) - 0.6).abs() < 0.001);

        let perfect = vec![1, 2, 3, 4, 5];
        assert!((recall_at_k(&gt, &perfect, 5) - 1.0).abs() < 0.001);

        let miss = vec![6, 7, 8, 9, 10];
        assert!(recall_at_k(&gt, &miss, 5).abs() < 0.001);
    }

    #[test]
    fn padding_is_never_a_hit() {
        let gt = vec![0, 1, -1];
        let retrieved = vec![0, -1, -1];
        assert!((recall_at_k(&gt, &retrieved, 3) - 1.0 / 3.0).abs() < 0.001);
        assert!((precision_at_k(&gt, &retrieved, 3) - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_precision_at_k() {
        let gt = vec![1, 2, 3, 4, 5];
        let retrieved = vec![1, 2, 6, 7, 8];
        assert!((precision_at_k(&gt, &retrieved, 5) - 0.4).abs() < 0.001);
    }

    #[test]
    fn test_recall_curve() {
        let gt = vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        let retrieved = vec![1, 2, 3, 11, 12, 6, 7, 13, 14, 15];

        let curve = recall_curve(&gt, &retrieved, &[1, 5, 10]);
        assert_eq!(curve.len(), 3);
        assert!((curve[0].1 - 1.0).abs() < 0.001);
        assert!((curve[1].1 - 0.6).abs() < 0.001);
    }
}
