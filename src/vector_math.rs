use std::cmp::Ordering;

/// Cosine similarity of two vectors. Returns 0.0 when either vector has a
/// zero norm (degenerate embeddings must not rank above real matches) or
/// when the lengths differ.
pub fn cosine_similarity(query: &[f32], candidate: &[f32]) -> f32 {
    if query.len() != candidate.len() || query.is_empty() {
        return 0.0;
    }

    let dot: f32 = query.iter().zip(candidate.iter()).map(|(a, b)| a * b).sum();
    let query_norm: f32 = query.iter().map(|v| v * v).sum::<f32>().sqrt();
    let candidate_norm: f32 = candidate.iter().map(|v| v * v).sum::<f32>().sqrt();

    let denom = query_norm * candidate_norm;
    if denom <= f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Scores every candidate against `query` and returns `(index, score)`
/// pairs sorted by descending score. The sort is stable, so equal scores
/// keep their input order.
pub fn rank_descending_by_cosine(query: &[f32], candidates: &[Vec<f32>]) -> Vec<(usize, f32)> {
    let mut scores: Vec<(usize, f32)> = candidates
        .iter()
        .enumerate()
        .map(|(idx, candidate)| (idx, cosine_similarity(query, candidate)))
        .collect();

    scores.sort_by(|left, right| right.1.partial_cmp(&left.1).unwrap_or(Ordering::Equal));
    scores
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(left: f32, right: f32) -> bool {
        (left - right).abs() < 1e-5
    }

    #[test]
    fn cosine_is_one_for_identical_vectors() {
        let vec = vec![1.0, 2.0, 3.0, 4.0];
        assert!(approx_eq(cosine_similarity(&vec, &vec), 1.0));
    }

    #[test]
    fn cosine_is_zero_against_a_zero_vector() {
        assert!(approx_eq(cosine_similarity(&[1.0, 2.0], &[0.0, 0.0]), 0.0));
        assert!(approx_eq(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), 0.0));
    }

    #[test]
    fn cosine_is_symmetric() {
        let a = vec![0.3, -1.2, 0.8];
        let b = vec![1.1, 0.4, -0.5];
        assert!(approx_eq(cosine_similarity(&a, &b), cosine_similarity(&b, &a)));
    }

    #[test]
    fn mismatched_lengths_score_zero() {
        assert!(approx_eq(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0));
    }

    #[test]
    fn ranking_returns_highest_similarity_first() {
        let query = vec![1.0, 0.0];
        let candidates = vec![vec![0.8, 0.2], vec![0.1, 0.9], vec![0.9, 0.0]];
        let ranked = rank_descending_by_cosine(&query, &candidates);

        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].0, 2);
        assert_eq!(ranked[2].0, 1);
    }

    #[test]
    fn equal_scores_keep_insertion_order() {
        let query = vec![1.0, 0.0];
        // Parallel vectors all score 1.0.
        let candidates = vec![vec![2.0, 0.0], vec![1.0, 0.0], vec![3.0, 0.0]];
        let ranked = rank_descending_by_cosine(&query, &candidates);
        let order: Vec<usize> = ranked.into_iter().map(|(idx, _)| idx).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }
}
