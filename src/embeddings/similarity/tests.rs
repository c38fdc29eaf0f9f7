use super::*;

fn approx_eq(actual: f64, expected: f64, tolerance: f64) -> bool {
    (actual - expected).abs() < tolerance
}

#[test]
fn identical_vectors_are_fully_similar() {
    assert_eq!(cosine_similarity(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]), 1.0);

    let v = [0.25, -1.5, 3.75, 0.001];
    assert!(approx_eq(cosine_similarity(&v, &v), 1.0, 1e-12));
}

#[test]
fn orthogonal_vectors_are_unrelated() {
    assert_eq!(cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]), 0.0);
}

#[test]
fn opposite_vectors_are_negative() {
    assert!(approx_eq(
        cosine_similarity(&[1.0, 2.0], &[-1.0, -2.0]),
        -1.0,
        1e-12
    ));
}

#[test]
fn known_pair_similarity() {
    let similarity = cosine_similarity(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]);
    assert!(approx_eq(similarity, 0.9746, 1e-4));
}

#[test]
fn mismatched_lengths_are_nan() {
    assert!(cosine_similarity(&[1.0, 2.0, 3.0], &[1.0, 2.0]).is_nan());
}

#[test]
fn zero_vectors_are_nan() {
    assert!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]).is_nan());
}

#[test]
fn best_chunk_picks_maximum() {
    let chunks: Vec<Vec<f32>> = vec![vec![0.4, 0.5, 0.6], vec![0.7, 0.8, 0.9]];
    let (index, similarity) = best_chunk(&chunks, &[0.7, 0.8, 0.9]).expect("has a best chunk");

    assert_eq!(index, 1);
    assert!(approx_eq(similarity, 1.0, 1e-6));
}

#[test]
fn best_chunk_skips_nan() {
    let chunks: Vec<Vec<f32>> = vec![vec![1.0, 0.0], vec![0.0, 0.0], vec![1.0]];
    let (index, _) = best_chunk(&chunks, &[1.0, 0.0]).expect("has a best chunk");
    assert_eq!(index, 0);

    let unusable: Vec<Vec<f32>> = vec![vec![0.0, 0.0]];
    assert!(best_chunk(&unusable, &[1.0, 0.0]).is_none());
}

fn sample_entries() -> Vec<(String, Vec<Vec<f32>>)> {
    vec![
        ("note1".to_string(), vec![vec![0.1, 0.2, 0.3]]),
        (
            "note2".to_string(),
            vec![vec![0.4, 0.5, 0.6], vec![0.7, 0.8, 0.9]],
        ),
    ]
}

fn as_entries(entries: &[(String, Vec<Vec<f32>>)]) -> Vec<(&str, &[Vec<f32>])> {
    entries
        .iter()
        .map(|(key, chunks)| (key.as_str(), chunks.as_slice()))
        .collect()
}

#[test]
fn rank_uses_best_chunk_per_document() {
    let entries = sample_entries();
    let results = rank(as_entries(&entries), &[0.7, 0.8, 0.9], 2);

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].document_key, "note2");
    assert!(approx_eq(results[0].similarity, 0.99999, 1e-4));
    assert_eq!(results[0].best_chunk, 1);
    assert_eq!(results[1].document_key, "note1");
    assert!(approx_eq(results[1].similarity, 0.9594, 1e-4));
    assert_eq!(results[1].best_chunk, 0);
}

#[test]
fn rank_respects_limit() {
    let entries = sample_entries();
    let results = rank(as_entries(&entries), &[0.7, 0.8, 0.9], 1);

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].document_key, "note2");

    assert!(rank(as_entries(&entries), &[0.7, 0.8, 0.9], 0).is_empty());
}

#[test]
fn rank_is_sorted_descending() {
    let entries: Vec<(String, Vec<Vec<f32>>)> = (0..20)
        .map(|i| {
            let angle = i as f32 * 0.15;
            (format!("doc{:02}", i), vec![vec![angle.cos(), angle.sin()]])
        })
        .collect();

    let results = rank(as_entries(&entries), &[0.0, 1.0], 50);

    assert_eq!(results.len(), 20);
    assert!(
        results
            .windows(2)
            .all(|pair| pair[0].similarity >= pair[1].similarity)
    );
}

#[test]
fn rank_breaks_ties_by_input_order() {
    let entries: Vec<(String, Vec<Vec<f32>>)> = ["b", "a", "c"]
        .iter()
        .map(|key| ((*key).to_string(), vec![vec![1.0, 1.0]]))
        .collect();

    let first = rank(as_entries(&entries), &[1.0, 1.0], 3);
    let second = rank(as_entries(&entries), &[1.0, 1.0], 3);

    let keys: Vec<&str> = first.iter().map(|r| r.document_key.as_str()).collect();
    assert_eq!(keys, vec!["b", "a", "c"]);
    assert_eq!(first, second);
}

#[test]
fn rank_omits_unscorable_documents() {
    let entries: Vec<(String, Vec<Vec<f32>>)> = vec![
        ("good".to_string(), vec![vec![1.0, 0.0]]),
        ("wrong-dimension".to_string(), vec![vec![1.0, 0.0, 0.0]]),
        ("empty".to_string(), Vec::new()),
    ];

    let results = rank(as_entries(&entries), &[1.0, 0.0], 10);

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].document_key, "good");
}

#[test]
fn rank_with_empty_query_is_empty() {
    let entries = sample_entries();
    assert!(rank(as_entries(&entries), &[], 10).is_empty());
}
