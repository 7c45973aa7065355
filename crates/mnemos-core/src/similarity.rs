//! Cosine similarity and distance.
//!
//! The index ranks by cosine similarity; graph edges order by cosine
//! distance (`1 - similarity`). Both are undefined for a zero-magnitude
//! vector, which is an error here and "no match" at the caller.

use crate::error::{CoreError, CoreResult};

/// Cosine similarity between two vectors, in [-1, 1].
///
/// Returns [`CoreError::DimensionMismatch`] when lengths differ and
/// [`CoreError::UndefinedSimilarity`] when either vector has zero
/// magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> CoreResult<f32> {
    if a.len() != b.len() {
        return Err(CoreError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return Err(CoreError::UndefinedSimilarity);
    }

    // Float rounding can push the ratio a hair outside [-1, 1].
    Ok((dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0))
}

/// Cosine distance: `1 - cosine_similarity`, in [0, 2].
pub fn cosine_distance(a: &[f32], b: &[f32]) -> CoreResult<f32> {
    Ok(1.0 - cosine_similarity(a, b)?)
}

/// True if the vector has (numerically) zero magnitude.
pub fn is_zero_vector(v: &[f32]) -> bool {
    v.iter().map(|x| x * x).sum::<f32>() <= f32::EPSILON
}
