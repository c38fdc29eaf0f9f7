#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};

/// A ranked search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Key of the matching document
    pub document_key: String,
    /// Cosine similarity of the best matching chunk
    pub similarity: f64,
    /// Index of the chunk that produced `similarity`
    pub best_chunk: usize,
}

/// Cosine of the angle between `a` and `b`.
///
/// Vectors of different lengths have no defined similarity and yield NaN, as
/// does a pair with a zero-magnitude vector. Callers are expected to filter
/// NaN out rather than handle an error.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return f64::NAN;
    }

    let mut dot = 0.0_f64;
    let mut a_norm_sq = 0.0_f64;
    let mut b_norm_sq = 0.0_f64;
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot = x.mul_add(y, dot);
        a_norm_sq = x.mul_add(x, a_norm_sq);
        b_norm_sq = y.mul_add(y, b_norm_sq);
    }

    dot / (a_norm_sq * b_norm_sq).sqrt()
}

/// Best scoring chunk of a document as `(chunk_index, similarity)`.
///
/// Chunks whose similarity is NaN are ignored; `None` when no chunk has a
/// usable score.
#[inline]
pub fn best_chunk<V: AsRef<[f32]>>(chunks: &[V], query: &[f32]) -> Option<(usize, f64)> {
    chunks
        .iter()
        .enumerate()
        .map(|(index, vector)| (index, cosine_similarity(vector.as_ref(), query)))
        .filter(|(_, similarity)| !similarity.is_nan())
        .fold(None, |best, candidate| match best {
            Some((_, best_similarity)) if best_similarity >= candidate.1 => best,
            _ => Some(candidate),
        })
}

/// Rank documents by the similarity of their best chunk to `query`.
///
/// Results are sorted by descending similarity and truncated to `limit`.
/// Ties keep the order in which `entries` yielded them.
#[inline]
pub fn rank<'a, I, V>(entries: I, query: &[f32], limit: usize) -> Vec<QueryResult>
where
    I: IntoIterator<Item = (&'a str, &'a [V])>,
    V: AsRef<[f32]> + 'a,
{
    if limit == 0 || query.is_empty() {
        return Vec::new();
    }

    let mut results: Vec<QueryResult> = entries
        .into_iter()
        .filter_map(|(key, chunks)| {
            best_chunk(chunks, query).map(|(index, similarity)| QueryResult {
                document_key: key.to_string(),
                similarity,
                best_chunk: index,
            })
        })
        .collect();

    results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    results.truncate(limit);
    results
}
