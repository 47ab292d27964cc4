//! Embedding chunks and writing them to a namespace.

use std::sync::Arc;

use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::RagConfig;
use crate::document::{Chunk, IndexedVector};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::vectorstore::VectorStore;

/// Embeds chunks in batches and upserts them under a namespace.
///
/// Every vector gets a fresh UUID, so indexing the same drawing twice
/// stores it twice. Clear the namespace first to re-index.
pub struct Indexer {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    batch_size: usize,
}

impl Indexer {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        config: &RagConfig,
    ) -> Self {
        Self { embedder, store, batch_size: config.embedding_batch_size.max(1) }
    }

    /// Embed and store `chunks`, returning the number of vectors written.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Indexing`] when embedding or upserting a batch
    /// fails. Batches before the failing one remain stored, and the error's
    /// `written` field says how many vectors that is.
    pub async fn index(&self, chunks: &[Chunk], namespace: &str) -> Result<usize> {
        let mut written = 0;
        for (batch_no, batch) in chunks.chunks(self.batch_size).enumerate() {
            let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();

            let embeddings = self.embedder.embed_batch(&texts).await.map_err(|e| {
                error!(namespace, batch = batch_no, written, error = %e, "embedding failed during indexing");
                RagError::Indexing { written, message: format!("embedding failed: {e}") }
            })?;
            if embeddings.len() != batch.len() {
                error!(namespace, expected = batch.len(), got = embeddings.len(), "embedding count mismatch");
                return Err(RagError::Indexing {
                    written,
                    message: format!(
                        "embedding provider returned {} vectors for {} chunks",
                        embeddings.len(),
                        batch.len()
                    ),
                });
            }

            let vectors: Vec<IndexedVector> = batch
                .iter()
                .zip(embeddings)
                .map(|(chunk, values)| IndexedVector {
                    id: Uuid::new_v4().to_string(),
                    values,
                    text: chunk.text.clone(),
                    metadata: chunk.metadata.clone(),
                })
                .collect();

            self.store.upsert(namespace, &vectors).await.map_err(|e| {
                error!(namespace, batch = batch_no, written, error = %e, "upsert failed during indexing");
                RagError::Indexing { written, message: format!("upsert failed: {e}") }
            })?;
            written += vectors.len();
            debug!(namespace, batch = batch_no, written, "indexed batch");
        }

        info!(namespace, vector_count = written, store = self.store.name(), "indexed chunks");
        Ok(written)
    }
}
