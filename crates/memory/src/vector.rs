//! Embedding similarity for semantic memory recall.

use nexus_core::memory::MemoryItem;
use std::cmp::Ordering;

/// Cosine similarity of two vectors, in [-1, 1].
///
/// Mismatched lengths, empty input and zero vectors all score 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a.iter().zip(b).fold((0.0f64, 0.0f64, 0.0f64), |acc, (x, y)| {
        let (x, y) = (*x as f64, *y as f64);
        (acc.0 + x * y, acc.1 + x * x, acc.2 + y * y)
    });

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Order memories by similarity of their embedding to `query`.
///
/// Each returned item carries its similarity in `score`. Items below
/// `min_score` are dropped; ties keep their input order.
pub fn rank_by_similarity(
    candidates: Vec<(MemoryItem, Vec<f32>)>,
    query: &[f32],
    limit: usize,
    min_score: f32,
) -> Vec<MemoryItem> {
    let mut scored: Vec<MemoryItem> = candidates
        .into_iter()
        .filter_map(|(mut item, embedding)| {
            let similarity = cosine_similarity(&embedding, query);
            (similarity >= min_score).then(|| {
                item.score = similarity;
                item
            })
        })
        .collect();

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    scored.truncate(limit);
    scored
}
