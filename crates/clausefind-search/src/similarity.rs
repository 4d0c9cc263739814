use std::cmp::Ordering;

/// Cosine similarity in the vectors' native precision. Mismatched lengths
/// and zero vectors score 0.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Indices of the `n` rows most similar to `query`, best first, ties going
/// to the lower row index.
pub fn top_n(query: &[f32], rows: &[Vec<f32>], n: usize) -> Vec<(usize, f32)> {
    let mut scored: Vec<(usize, f32)> = rows.iter().enumerate().map(|(i, row)| (i, cosine(query, row))).collect();
    scored.sort_by(|a, b| descending(a.1, b.1).then(a.0.cmp(&b.0)));
    scored.truncate(n);
    scored
}

/// Total order on scores, highest first. NaN ranks below every number.
pub fn descending(a: f32, b: f32) -> Ordering {
    rank_key(b).total_cmp(&rank_key(a))
}

fn rank_key(score: f32) -> f32 {
    if score.is_nan() { f32::NEG_INFINITY } else { score }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_parallel_vectors_is_one() {
        assert!((cosine(&[1.0, 2.0], &[2.0, 4.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn degenerate_inputs_score_zero() {
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine(&[1.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn ties_keep_row_order() {
        let rows = vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 0.0], vec![0.5, 0.5]];
        let top = top_n(&[1.0, 0.0], &rows, 3);
        let idx: Vec<usize> = top.iter().map(|(i, _)| *i).collect();
        assert_eq!(idx, vec![1, 2, 3]);
    }

    #[test]
    fn nan_sorts_last() {
        let mut scores = vec![1.0, f32::NAN, 0.8, -f32::NAN, -3.0];
        scores.sort_by(|a, b| descending(*a, *b));
        assert_eq!(&scores[..3], &[1.0, 0.8, -3.0]);
        assert!(scores[3..].iter().all(|s| s.is_nan()));
    }

    #[test]
    fn n_larger_than_rows_returns_all() {
        let rows = vec![vec![1.0], vec![-1.0]];
        assert_eq!(top_n(&[1.0], &rows, 10).len(), 2);
    }
}
