//! Property tests for in-memory vector store query ordering and namespaces.

use std::collections::HashMap;

use drawing_rag::{DrawingMetadata, IndexedVector, InMemoryVectorStore, RagError, VectorStore};
use proptest::prelude::*;

/// Generate a non-zero L2-normalized embedding of the given dimension.
fn arb_normalized_embedding(dim: usize) -> impl Strategy<Value = Vec<f32>> {
    proptest::collection::vec(-1.0f32..1.0f32, dim).prop_filter_map(
        "non-zero embedding",
        |mut v| {
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm < 1e-8 {
                return None;
            }
            for val in &mut v {
                *val /= norm;
            }
            Some(v)
        },
    )
}

fn metadata(page: u32) -> DrawingMetadata {
    DrawingMetadata {
        source: "A-101.pdf".to_string(),
        path: "data/raw/A-101.pdf".to_string(),
        page,
        bbox: None,
        ocr: false,
        chunk_index: Some(0),
    }
}

fn arb_vector(dim: usize) -> impl Strategy<Value = IndexedVector> {
    ("[a-z]{3,8}", "[a-z ]{5,30}", 0u32..20, arb_normalized_embedding(dim)).prop_map(
        |(id, text, page, values)| IndexedVector { id, values, text, metadata: metadata(page) },
    )
}

fn vector(id: &str, values: Vec<f32>) -> IndexedVector {
    IndexedVector { id: id.to_string(), values, text: format!("text of {id}"), metadata: metadata(0) }
}

/// For any stored set, a query returns at most `top_k` matches ordered by
/// descending cosine similarity, each carrying its stored payload.
mod prop_inmemory_query_ordering {
    use super::*;

    const DIM: usize = 16;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn results_ordered_descending_and_bounded_by_top_k(
            vectors in proptest::collection::vec(arb_vector(DIM), 1..20),
            query in arb_normalized_embedding(DIM),
            top_k in 1usize..25,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let (results, unique) = rt.block_on(async {
                let store = InMemoryVectorStore::new();

                let mut deduped: HashMap<String, IndexedVector> = HashMap::new();
                for v in &vectors {
                    deduped.entry(v.id.clone()).or_insert_with(|| v.clone());
                }
                let unique: HashMap<String, IndexedVector> = deduped;
                let batch: Vec<IndexedVector> = unique.values().cloned().collect();

                store.upsert("test", &batch).await.unwrap();
                let results = store.query("test", &query, top_k).await.unwrap();
                (results, unique)
            });

            prop_assert!(results.len() <= top_k);
            prop_assert_eq!(results.len(), top_k.min(unique.len()));

            for window in results.windows(2) {
                prop_assert!(
                    window[0].score >= window[1].score,
                    "results not in descending order: {} < {}",
                    window[0].score,
                    window[1].score,
                );
            }

            for m in &results {
                let stored = &unique[&m.id];
                prop_assert_eq!(&m.text, &stored.text);
                prop_assert_eq!(&m.metadata, &stored.metadata);
            }
        }
    }
}

#[tokio::test]
async fn missing_namespace_returns_no_matches() {
    let store = InMemoryVectorStore::new();
    let results = store.query("nowhere", &[1.0, 0.0], 5).await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn namespaces_are_isolated() {
    let store = InMemoryVectorStore::new();
    store.upsert("tower-a", &[vector("a", vec![1.0, 0.0])]).await.unwrap();
    store.upsert("tower-b", &[vector("b", vec![0.0, 1.0])]).await.unwrap();

    let results = store.query("tower-a", &[0.0, 1.0], 5).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "a");
}

#[tokio::test]
async fn upsert_replaces_vectors_with_the_same_id() {
    let store = InMemoryVectorStore::new();
    store.upsert("ns", &[vector("a", vec![1.0, 0.0])]).await.unwrap();
    store.upsert("ns", &[vector("a", vec![0.0, 1.0])]).await.unwrap();

    assert_eq!(store.len("ns").await, 1);
    let results = store.query("ns", &[0.0, 1.0], 1).await.unwrap();
    assert!((results[0].score - 1.0).abs() < 1e-5);
}

#[tokio::test]
async fn delete_all_empties_only_the_given_namespace() {
    let store = InMemoryVectorStore::new();
    store.upsert("ns", &[vector("a", vec![1.0, 0.0]), vector("b", vec![0.0, 1.0])]).await.unwrap();
    store.upsert("other", &[vector("c", vec![1.0, 0.0])]).await.unwrap();

    store.delete_all("ns").await.unwrap();
    store.delete_all("never-created").await.unwrap();

    assert_eq!(store.len("ns").await, 0);
    assert!(store.query("ns", &[1.0, 0.0], 5).await.unwrap().is_empty());
    assert_eq!(store.len("other").await, 1);
}

#[tokio::test]
async fn mismatched_batch_leaves_the_namespace_untouched() {
    let store = InMemoryVectorStore::new();
    store.upsert("ns", &[vector("a", vec![1.0, 0.0])]).await.unwrap();

    let batch = [vector("b", vec![0.0, 1.0]), vector("c", vec![1.0, 0.0, 0.0])];
    let err = store.upsert("ns", &batch).await.unwrap_err();
    assert!(matches!(err, RagError::VectorStore { .. }));

    assert_eq!(store.len("ns").await, 1);
    let results = store.query("ns", &[0.0, 1.0], 5).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "a");
}

#[tokio::test]
async fn mixed_dimensions_never_create_a_namespace() {
    let store = InMemoryVectorStore::new();
    let batch = [vector("a", vec![1.0, 0.0]), vector("b", vec![1.0, 0.0, 0.0])];
    assert!(store.upsert("fresh", &batch).await.is_err());
    assert_eq!(store.len("fresh").await, 0);

    store.upsert("fresh", &[vector("c", vec![1.0, 0.0, 0.0])]).await.unwrap();
    assert_eq!(store.len("fresh").await, 1);
}
