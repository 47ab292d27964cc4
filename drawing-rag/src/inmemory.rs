//! In-memory vector store using cosine similarity.
//!
//! [`InMemoryVectorStore`] keeps namespaces in a `HashMap` behind a
//! `tokio::sync::RwLock`. It is suitable for development, tests, and small
//! single-process corpora.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::document::{IndexedVector, RetrievedMatch};
use crate::error::{RagError, Result};
use crate::vectorstore::VectorStore;

/// An in-memory vector store using cosine similarity for search.
///
/// Namespaces are nested maps: namespace → vector ID → vector. Upserting
/// into an unknown namespace creates it.
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    namespaces: RwLock<HashMap<String, HashMap<String, IndexedVector>>>,
}

impl InMemoryVectorStore {
    /// Create a new empty in-memory vector store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of vectors stored in `namespace`.
    pub async fn len(&self, namespace: &str) -> usize {
        self.namespaces.read().await.get(namespace).map_or(0, HashMap::len)
    }
}

/// Cosine similarity of two vectors; 0.0 if either has zero magnitude.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn name(&self) -> &str {
        "InMemory"
    }

    async fn upsert(&self, namespace: &str, vectors: &[IndexedVector]) -> Result<()> {
        let mut namespaces = self.namespaces.write().await;

        // The whole batch is checked before anything is written.
        let expected = namespaces
            .get(namespace)
            .and_then(|store| store.values().next())
            .or_else(|| vectors.first())
            .map(|v| v.values.len());
        if let Some(expected) = expected {
            if let Some(vector) = vectors.iter().find(|v| v.values.len() != expected) {
                return Err(RagError::VectorStore {
                    backend: "InMemory".to_string(),
                    message: format!(
                        "vector '{}' has dimension {}, namespace '{namespace}' expects {expected}",
                        vector.id,
                        vector.values.len()
                    ),
                });
            }
        }

        let store = namespaces.entry(namespace.to_string()).or_default();
        for vector in vectors {
            store.insert(vector.id.clone(), vector.clone());
        }
        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedMatch>> {
        let namespaces = self.namespaces.read().await;
        let Some(store) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<RetrievedMatch> = store
            .values()
            .map(|vector| RetrievedMatch {
                id: vector.id.clone(),
                score: cosine_similarity(&vector.values, embedding),
                text: vector.text.clone(),
                metadata: vector.metadata.clone(),
            })
            .collect();

        // Ties broken by ID so results are deterministic.
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete_all(&self, namespace: &str) -> Result<()> {
        self.namespaces.write().await.remove(namespace);
        Ok(())
    }
}
