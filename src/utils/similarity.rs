//! Vector similarity and scoring helpers shared by the memory store.
//!
//! Vectors are treated as opaque `f32` arrays. Every function here is total:
//! empty, mismatched or zero-norm inputs degrade to a score of `0.0` instead
//! of panicking or producing `NaN`.

/// Similarity at or above which two memories are considered duplicates.
pub const MERGE_THRESHOLD: f32 = 0.9;

/// Time constant (in hours) of the exponential access decay, about 30 days.
pub const DECAY_HOURS: f64 = 720.0;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 means identical direction, or `0.0`
/// when the vectors are empty, differ in length, or either has zero norm.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    // Accumulate in f64 so large or tiny magnitudes neither overflow nor flush to zero
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 || !denom.is_finite() {
        0.0
    } else {
        (dot / denom).clamp(-1.0, 1.0) as f32
    }
}

/// Whether two embeddings are close enough to be merged.
pub fn is_near_duplicate(a: &[f32], b: &[f32]) -> bool {
    cosine_similarity(a, b) >= MERGE_THRESHOLD
}

/// Clamp an importance score into [0, 1]; `NaN` becomes `0.0`.
pub fn clamp_importance(importance: f32) -> f32 {
    if importance.is_nan() {
        0.0
    } else {
        importance.clamp(0.0, 1.0)
    }
}

/// Importance weighted by how long ago the item was last accessed.
///
/// `score = importance * exp(-hours / 720)`. Negative ages (clock skew,
/// future timestamps) count as zero hours.
pub fn decay_score(importance: f32, hours_since_access: f64) -> f64 {
    let hours = hours_since_access.max(0.0);
    f64::from(importance) * (-hours / DECAY_HOURS).exp()
}

/// Whether every component of the vector is a finite number.
pub fn is_well_formed(vector: &[f32]) -> bool {
    vector.iter().all(|v| v.is_finite())
}
