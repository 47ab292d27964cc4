//! Pinecone vector store backend over the REST API.
//!
//! Provides [`PineconeVectorStore`], which implements [`VectorStore`] against
//! one serverless index, using Pinecone namespaces as drawing-set namespaces.
//! Chunk metadata is stored flat (see [`DrawingMetadata::to_payload`]).
//!
//! This module is only available when the `pinecone` feature is enabled.
//!
//! # Example
//!
//! ```rust,ignore
//! use drawing_rag::pinecone::{IndexSpec, PineconeVectorStore};
//!
//! let spec = IndexSpec::default();
//! PineconeVectorStore::ensure_index(&api_key, &spec).await?;
//! let store = PineconeVectorStore::connect(&api_key, &spec.name).await?;
//! store.upsert("default", &vectors).await?;
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info};

use crate::document::{DrawingMetadata, IndexedVector, RetrievedMatch};
use crate::error::{RagError, Result};
use crate::vectorstore::VectorStore;

const CONTROL_PLANE_URL: &str = "https://api.pinecone.io";
const API_VERSION: &str = "2024-07";
/// Vectors per upsert request; 100 x 3072 floats stays under the 2MB request limit.
const UPSERT_BATCH: usize = 100;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Index similarity metric.
///
/// Only metrics whose scores grow with closeness are supported, so Pinecone
/// scores can be ranked and turned into confidence as they are. Euclidean
/// indexes return distances and are rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Cosine,
    DotProduct,
}

impl Metric {
    /// The metric's name in the Pinecone API.
    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::DotProduct => "dotproduct",
        }
    }

    /// Parse a metric reported by the Pinecone API.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::VectorStore`] for any metric other than `cosine`
    /// or `dotproduct`.
    pub fn from_api(index: &str, metric: &str) -> Result<Self> {
        match metric {
            "cosine" => Ok(Metric::Cosine),
            "dotproduct" => Ok(Metric::DotProduct),
            other => Err(map_err(format!(
                "index '{index}' uses metric '{other}'; only cosine and dotproduct \
                 indexes score similarity"
            ))),
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serverless index definition used by [`PineconeVectorStore::ensure_index`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSpec {
    pub name: String,
    pub dimension: usize,
    pub metric: Metric,
    pub cloud: String,
    pub region: String,
}

impl Default for IndexSpec {
    fn default() -> Self {
        Self {
            name: "construction-rag".to_string(),
            dimension: 3072,
            metric: Metric::Cosine,
            cloud: "aws".to_string(),
            region: "us-east-1".to_string(),
        }
    }
}

/// A [`VectorStore`] backed by a [Pinecone](https://www.pinecone.io/) index.
///
/// Querying a namespace that does not exist yet returns no matches.
pub struct PineconeVectorStore {
    client: reqwest::Client,
    api_key: String,
    host: String,
}

impl PineconeVectorStore {
    /// Create a store for the index served at `host` (with or without scheme).
    pub fn new(api_key: impl Into<String>, host: impl AsRef<str>) -> Result<Self> {
        Self::with_timeout(api_key, host, DEFAULT_TIMEOUT)
    }

    /// Like [`new`](Self::new) with an explicit per-request timeout.
    pub fn with_timeout(
        api_key: impl Into<String>,
        host: impl AsRef<str>,
        timeout: Duration,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(map_err("API key must not be empty"));
        }
        Ok(Self { client: http_client(timeout)?, api_key, host: normalize_host(host.as_ref()) })
    }

    /// Look up the host of `index_name` and connect to it.
    ///
    /// # Errors
    ///
    /// Fails if the index cannot be described or its metric is not a
    /// supported [`Metric`].
    pub async fn connect(api_key: &str, index_name: &str) -> Result<Self> {
        let client = http_client(DEFAULT_TIMEOUT)?;
        let response = client
            .get(format!("{CONTROL_PLANE_URL}/indexes/{index_name}"))
            .header("Api-Key", api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .send()
            .await
            .map_err(|e| map_err(format!("describe index failed: {e}")))?;
        let description: IndexDescription = check(response, "describe index")
            .await?
            .json()
            .await
            .map_err(|e| map_err(format!("failed to parse index description: {e}")))?;
        if let Some(metric) = &description.metric {
            Metric::from_api(index_name, metric)?;
        }
        debug!(index = index_name, host = %description.host, "resolved pinecone index host");
        Ok(Self { client, api_key: api_key.to_string(), host: normalize_host(&description.host) })
    }

    /// Create the index described by `spec` unless it already exists.
    ///
    /// Returns `true` if the index was created and `false` if a usable one
    /// already exists.
    ///
    /// # Errors
    ///
    /// Fails if an index named `spec.name` exists with a metric other than
    /// `cosine`/`dotproduct`, or with a dimension other than `spec.dimension`.
    pub async fn ensure_index(api_key: &str, spec: &IndexSpec) -> Result<bool> {
        let client = http_client(DEFAULT_TIMEOUT)?;
        let response = client
            .get(format!("{CONTROL_PLANE_URL}/indexes"))
            .header("Api-Key", api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .send()
            .await
            .map_err(|e| map_err(format!("list indexes failed: {e}")))?;
        let list: IndexList = check(response, "list indexes")
            .await?
            .json()
            .await
            .map_err(|e| map_err(format!("failed to parse index list: {e}")))?;

        if let Some(existing) = list.indexes.iter().find(|index| index.name == spec.name) {
            existing.check_compatible(spec)?;
            info!(index = %spec.name, "pinecone index already exists");
            return Ok(false);
        }

        let response = client
            .post(format!("{CONTROL_PLANE_URL}/indexes"))
            .header("Api-Key", api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(&create_index_body(spec))
            .send()
            .await
            .map_err(|e| map_err(format!("create index failed: {e}")))?;
        check(response, "create index").await?;
        info!(index = %spec.name, dimension = spec.dimension, metric = %spec.metric, "created pinecone index");
        Ok(true)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    async fn post(&self, path: &str, body: &Value) -> Result<reqwest::Response> {
        self.client
            .post(format!("{}{path}", self.host))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                error!(backend = "pinecone", path, error = %e, "request failed");
                map_err(format!("request to {path} failed: {e}"))
            })
    }
}

fn map_err(message: impl Into<String>) -> RagError {
    RagError::VectorStore { backend: "pinecone".to_string(), message: message.into() }
}

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| map_err(format!("failed to build HTTP client: {e}")))
}

fn normalize_host(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

async fn check(response: reqwest::Response, action: &str) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    error!(backend = "pinecone", %status, action, "API error");
    Err(map_err(format!("{action} returned {status}: {body}")))
}

// ── Pinecone API request/response types ────────────────────────────

#[derive(Deserialize)]
struct IndexDescription {
    host: String,
    #[serde(default)]
    metric: Option<String>,
}

#[derive(Deserialize)]
struct IndexList {
    #[serde(default)]
    indexes: Vec<IndexSummary>,
}

#[derive(Deserialize)]
struct IndexSummary {
    name: String,
    #[serde(default)]
    metric: Option<String>,
    #[serde(default)]
    dimension: Option<usize>,
}

impl IndexSummary {
    fn check_compatible(&self, spec: &IndexSpec) -> Result<()> {
        if let Some(metric) = &self.metric {
            Metric::from_api(&self.name, metric)?;
        }
        match self.dimension {
            Some(dimension) if dimension != spec.dimension => Err(map_err(format!(
                "index '{}' has dimension {dimension}, embeddings have {}",
                self.name, spec.dimension
            ))),
            _ => Ok(()),
        }
    }
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Deserialize)]
struct QueryMatch {
    id: String,
    score: f32,
    #[serde(default)]
    metadata: Map<String, Value>,
}

fn create_index_body(spec: &IndexSpec) -> Value {
    serde_json::json!({
        "name": spec.name,
        "dimension": spec.dimension,
        "metric": spec.metric.as_str(),
        "spec": { "serverless": { "cloud": spec.cloud, "region": spec.region } },
    })
}

fn upsert_body(namespace: &str, vectors: &[IndexedVector]) -> Value {
    let vectors: Vec<Value> = vectors
        .iter()
        .map(|v| {
            serde_json::json!({
                "id": v.id,
                "values": v.values,
                "metadata": v.metadata.to_payload(&v.text),
            })
        })
        .collect();
    serde_json::json!({ "namespace": namespace, "vectors": vectors })
}

fn query_body(namespace: &str, embedding: &[f32], top_k: usize) -> Value {
    serde_json::json!({
        "namespace": namespace,
        "vector": embedding,
        "topK": top_k,
        "includeMetadata": true,
        "includeValues": false,
    })
}

fn into_match(m: QueryMatch) -> Result<RetrievedMatch> {
    let (metadata, text) = DrawingMetadata::from_payload(&m.metadata)?;
    Ok(RetrievedMatch { id: m.id, score: m.score, text, metadata })
}

#[async_trait]
impl VectorStore for PineconeVectorStore {
    fn name(&self) -> &str {
        "pinecone"
    }

    async fn upsert(&self, namespace: &str, vectors: &[IndexedVector]) -> Result<()> {
        for batch in vectors.chunks(UPSERT_BATCH) {
            let response = self.post("/vectors/upsert", &upsert_body(namespace, batch)).await?;
            check(response, "upsert").await?;
            debug!(backend = "pinecone", namespace, count = batch.len(), "upserted vectors");
        }
        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedMatch>> {
        let response = self.post("/query", &query_body(namespace, embedding, top_k)).await?;
        let parsed: QueryResponse = check(response, "query")
            .await?
            .json()
            .await
            .map_err(|e| map_err(format!("failed to parse query response: {e}")))?;
        debug!(backend = "pinecone", namespace, match_count = parsed.matches.len(), "queried index");
        parsed.matches.into_iter().map(into_match).collect()
    }

    async fn delete_all(&self, namespace: &str) -> Result<()> {
        let body = serde_json::json!({ "deleteAll": true, "namespace": namespace });
        let response = self.post("/vectors/delete", &body).await?;
        // Deleting a namespace that was never written is a 404; treat as empty.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(backend = "pinecone", namespace, "namespace did not exist");
            return Ok(());
        }
        check(response, "delete").await?;
        Ok(())
    }
}
