//! Query-time nearest-neighbour lookup.

use std::sync::Arc;

use tracing::{error, info};

use crate::document::RetrievedMatch;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::vectorstore::VectorStore;

/// Embeds a query and fetches the closest chunks from a namespace.
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    /// Return at most `k` matches, best first. Fewer come back when the
    /// namespace holds fewer vectors.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Retrieval`] if `k` is zero, or if embedding the
    /// query or querying the store fails.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        namespace: &str,
    ) -> Result<Vec<RetrievedMatch>> {
        if k == 0 {
            return Err(RagError::Retrieval("k must be greater than 0".to_string()));
        }

        let embedding = self.embedder.embed(query).await.map_err(|e| {
            error!(error = %e, "embedding failed during retrieval");
            RagError::Retrieval(format!("query embedding failed: {e}"))
        })?;

        let mut matches = self.store.query(namespace, &embedding, k).await.map_err(|e| {
            error!(namespace, error = %e, "vector store query failed");
            RagError::Retrieval(format!("query failed in namespace '{namespace}': {e}"))
        })?;

        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(k);

        info!(namespace, k, match_count = matches.len(), "retrieved matches");
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RagConfig;
    use crate::document::{BoundingBox, Chunk, Fragment, SourceDocument};
    use crate::embedding::tests::HashEmbedder;
    use crate::indexer::Indexer;
    use crate::inmemory::InMemoryVectorStore;

    async fn seeded(texts: &[&str]) -> Retriever {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbedder::new(64));
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let source = SourceDocument::from_path("/drawings/A-301 Sections.pdf");
        let chunks: Vec<Chunk> = texts
            .iter()
            .map(|text| {
                let f = Fragment::native(&source, 1, BoundingBox::new(0.0, 0.0, 10.0, 10.0), *text);
                Chunk { text: f.text, metadata: f.metadata }
            })
            .collect();
        Indexer::new(embedder.clone(), store.clone(), &RagConfig::default())
            .index(&chunks, "ns")
            .await
            .unwrap();
        Retriever::new(embedder, store)
    }

    #[tokio::test]
    async fn returns_best_match_first() {
        let retriever = seeded(&[
            "roof membrane over rigid insulation",
            "wall thickness 300mm concrete wall",
            "door hardware schedule",
        ])
        .await;

        let matches = retriever.retrieve("wall thickness", 2, "ns").await.unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].text, "wall thickness 300mm concrete wall");
        assert!(matches[0].score >= matches[1].score);
    }

    #[tokio::test]
    async fn returns_fewer_than_k_for_small_namespaces() {
        let retriever = seeded(&["only chunk"]).await;
        assert_eq!(retriever.retrieve("chunk", 6, "ns").await.unwrap().len(), 1);
        assert!(retriever.retrieve("chunk", 6, "other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn zero_k_is_rejected() {
        let retriever = seeded(&["anything"]).await;
        let err = retriever.retrieve("anything", 0, "ns").await.unwrap_err();
        assert!(matches!(err, RagError::Retrieval(_)));
    }
}
