//! # Prediction Ranking
//!
//! Converts a score vector into the top-K labeled results. Ranking is
//! deterministic: scores sort descending and equal scores resolve to the
//! lower index. Indices with no entry in the label table are silently
//! skipped, the classifier may legitimately have more output slots than
//! labeled classes.
//!
//! No normalization happens here; scores pass through exactly as given.

use serde::{Deserialize, Serialize};

/// A single labeled, scored prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub character: String,
    pub confidence: f32,
}

/// Select the `k` highest-scoring indices of `scores` and label them from
/// `labels`.
///
/// The result is ordered by descending score. Selection happens before the
/// table-bound filter, so fewer than `k` entries can come back when top
/// indices fall outside the table.
pub fn rank(scores: &[f32], labels: &[&str], k: usize) -> Vec<Prediction> {
    let mut indices: Vec<usize> = (0..scores.len()).collect();
    indices.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));

    indices
        .into_iter()
        .take(k)
        .filter(|&idx| idx < labels.len())
        .map(|idx| Prediction {
            character: labels[idx].to_string(),
            confidence: scores[idx],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LABELS: &[&str] = &["a", "b", "c", "d", "e"];

    #[test]
    fn test_orders_by_descending_score() {
        let scores = [0.1, 0.4, 0.2, 0.9, 0.3];
        let ranked = rank(&scores, LABELS, 3);

        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].character, "d");
        assert_eq!(ranked[1].character, "b");
        assert_eq!(ranked[2].character, "e");
        assert!(ranked[0].confidence >= ranked[1].confidence);
        assert!(ranked[1].confidence >= ranked[2].confidence);
    }

    #[test]
    fn test_ranking_is_deterministic() {
        let scores = [0.5, 0.5, 0.1, 0.5, 0.2];
        let first = rank(&scores, LABELS, 5);
        let second = rank(&scores, LABELS, 5);
        assert_eq!(first, second);
    }

    #[test]
    fn test_ties_resolve_to_lower_index() {
        let scores = [1.0, 3.0, 3.0, 2.0];
        let ranked = rank(&scores, LABELS, 3);

        assert_eq!(ranked[0].character, "b");
        assert_eq!(ranked[1].character, "c");
        assert_eq!(ranked[2].character, "d");
    }

    #[test]
    fn test_indices_beyond_table_are_skipped() {
        // Seven scores against a five-entry table; the two strongest sit
        // outside the table and must not appear.
        let scores = [0.1, 0.2, 0.3, 0.4, 0.5, 0.9, 0.8];
        let ranked = rank(&scores, LABELS, 3);

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].character, "e");
    }

    #[test]
    fn test_k_larger_than_vector() {
        let scores = [0.2, 0.1];
        let ranked = rank(&scores, LABELS, 5);
        assert_eq!(ranked.len(), 2);
    }

    #[test]
    fn test_empty_scores() {
        let ranked = rank(&[], LABELS, 5);
        assert!(ranked.is_empty());
    }
}
