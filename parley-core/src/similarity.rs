//! Cosine similarity for the in-process retrieval fallback.

/// Score returned when two vectors cannot be compared.
pub const SENTINEL_LOW: f32 = -1.0;

const EPSILON: f64 = 1e-8;

/// `dot(a, b) / (|a| * |b| + eps)`.
///
/// Mismatched lengths or an empty vector yield [`SENTINEL_LOW`] rather than an
/// error. Accumulates in f64 so long embeddings keep their precision.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return SENTINEL_LOW;
    }

    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;

    for (va, vb) in a.iter().zip(b.iter()) {
        let (va, vb) = (*va as f64, *vb as f64);
        dot += va * vb;
        norm_a += va * va;
        norm_b += vb * vb;
    }

    (dot / (norm_a.sqrt() * norm_b.sqrt() + EPSILON)) as f32
}

/// Like [`cosine_similarity`] but tolerates a missing chunk vector.
pub fn score_optional(query: &[f32], candidate: Option<&[f32]>) -> f32 {
    match candidate {
        Some(v) => cosine_similarity(query, v),
        None => SENTINEL_LOW,
    }
}
