//! Namespaced vector store trait.

use async_trait::async_trait;

use crate::document::{IndexedVector, RetrievedMatch};
use crate::error::Result;

/// A storage backend for drawing chunk embeddings with similarity search.
///
/// Vectors live in namespaces that partition datasets from one another. A
/// namespace comes into existence on its first upsert; querying a namespace
/// that holds nothing returns no matches rather than an error.
///
/// Scores are similarities: higher means closer.
///
/// # Example
///
/// ```rust,ignore
/// use drawing_rag::{InMemoryVectorStore, VectorStore};
///
/// let store = InMemoryVectorStore::new();
/// store.upsert("project-a", &vectors).await?;
/// let matches = store.query("project-a", &query_embedding, 6).await?;
/// ```
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Insert or replace vectors by ID within `namespace`.
    async fn upsert(&self, namespace: &str, vectors: &[IndexedVector]) -> Result<()>;

    /// Return at most `top_k` matches ordered by descending score.
    async fn query(
        &self,
        namespace: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedMatch>>;

    /// Delete every vector in `namespace`.
    async fn delete_all(&self, namespace: &str) -> Result<()>;
}
