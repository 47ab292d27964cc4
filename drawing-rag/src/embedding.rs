//! Embedding provider trait for turning chunk and query text into vectors.

use async_trait::async_trait;

use crate::error::Result;

/// A provider that generates fixed-dimension embeddings from text.
///
/// The same provider must be used for indexing and querying a namespace;
/// vectors of different providers are not comparable. The default
/// [`embed_batch`](EmbeddingProvider::embed_batch) calls
/// [`embed`](EmbeddingProvider::embed) sequentially; backends with native
/// batching should override it.
///
/// # Example
///
/// ```rust,ignore
/// use drawing_rag::EmbeddingProvider;
///
/// let embedding = provider.embed("Wall thickness: 300mm").await?;
/// assert_eq!(embedding.len(), provider.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for a single text input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embedding vectors for a batch of inputs, in input order.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Return the dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;
}
