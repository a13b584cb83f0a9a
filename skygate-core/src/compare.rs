use crate::embed::Embedding;

/// Best match among a set of candidate embeddings
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub index: usize,
    pub similarity: f32,
}

/// Cosine similarity between two L2-normalized embeddings reduces to the
/// dot product.
pub fn cosine_similarity(a: &Embedding, b: &Embedding) -> f32 {
    a.dot(b)
}

/// Find the candidate with the highest similarity at or above threshold.
/// An empty candidate set yields no match.
pub fn find_best_match(
    query: &Embedding,
    candidates: &[Embedding],
    threshold: f32,
) -> Option<MatchResult> {
    candidates
        .iter()
        .enumerate()
        .map(|(index, candidate)| (index, cosine_similarity(query, candidate)))
        .filter(|(_, similarity)| *similarity >= threshold)
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(index, similarity)| MatchResult { index, similarity })
}
