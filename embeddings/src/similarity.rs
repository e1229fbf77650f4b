//! Similarity computation for embeddings.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::Embedding;
use crate::error::{EmbeddingError, Result};

/// Compute the cosine similarity between two embeddings.
///
/// Returns a value between -1.0 and 1.0, where:
/// - 1.0 means identical vectors
/// - 0.0 means orthogonal vectors
/// - -1.0 means opposite vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    let dot = dot_product(a, b)?;
    let magnitude_a = l2_norm(a);
    let magnitude_b = l2_norm(b);

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return Ok(0.0);
    }

    Ok(dot / (magnitude_a * magnitude_b))
}

/// Compute the dot product between two embeddings.
pub fn dot_product(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(EmbeddingError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    Ok(a.iter().zip(b.iter()).map(|(x, y)| x * y).sum())
}

/// Euclidean length of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Normalize an embedding to unit length.
///
/// Zero vectors are left untouched.
pub fn normalize(embedding: &mut [f32]) {
    let magnitude = l2_norm(embedding);
    if magnitude > 0.0 {
        for x in embedding.iter_mut() {
            *x /= magnitude;
        }
    }
}

/// Normalized copy of an embedding.
pub fn normalized(embedding: &[f32]) -> Embedding {
    let mut v = embedding.to_vec();
    normalize(&mut v);
    v
}

/// A similarity search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityResult {
    /// Text stored with the matched vector.
    pub text: String,

    /// Stored (normalized) vector.
    pub vector: Embedding,

    /// Similarity score.
    pub score: f32,

    /// 1-based position in the result list.
    pub rank: usize,

    /// Additional metadata.
    pub metadata: Option<serde_json::Value>,
}

/// Pick the best `k` of `scores` (indexed by insertion position) whose score
/// reaches `threshold`.
///
/// Returns `(position, score)` pairs by descending score. Equal scores keep
/// insertion order.
pub fn rank_top_k(scores: &[f32], k: usize, threshold: f32) -> Vec<(usize, f32)> {
    let mut ranked: Vec<(usize, f32)> = scores.iter().copied().enumerate().collect();

    // Stable sort, so ties stay in insertion order.
    ranked.sort_by(|a, b| OrderedFloat(b.1).cmp(&OrderedFloat(a.1)));

    ranked
        .into_iter()
        .take(k)
        .filter(|(_, score)| *score >= threshold)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        let sim = cosine_similarity(&a, &b).unwrap();
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        let sim = cosine_similarity(&a, &b).unwrap();
        assert!((sim - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![-1.0, 0.0, 0.0];
        let sim = cosine_similarity(&a, &b).unwrap();
        assert!((sim - (-1.0)).abs() < 1e-6);
    }

    #[test]
    fn test_dimension_mismatch() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!(cosine_similarity(&a, &b).is_err());
    }

    #[test]
    fn test_normalize() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector() {
        let mut v = vec![0.0, 0.0];
        normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0]);
    }

    #[test]
    fn test_rank_top_k() {
        let scores = [0.0, 1.0, 0.7, 0.7, -0.2];

        assert_eq!(rank_top_k(&scores, 3, 0.0), vec![(1, 1.0), (2, 0.7), (3, 0.7)]);
        assert_eq!(rank_top_k(&scores, 10, 0.5), vec![(1, 1.0), (2, 0.7), (3, 0.7)]);
        assert!(rank_top_k(&scores, 0, -1.0).is_empty());
    }
}
