//! OpenAI embeddings and chat completions over the REST API.
//!
//! This module is only available when the `openai` feature is enabled.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::document::{ChatMessage, Role};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::generation::ChatModel;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-large";

/// Native size of `text-embedding-3-large`.
const DEFAULT_DIMENSIONS: usize = 3072;

const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TEMPERATURE: f32 = 0.1;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Maps a message to the error variant of the calling capability.
type ErrorFn = fn(String) -> RagError;

fn embedding_error(message: impl Into<String>) -> RagError {
    RagError::Embedding { provider: "OpenAI".into(), message: message.into() }
}

fn generation_error(message: impl Into<String>) -> RagError {
    RagError::Generation { provider: "OpenAI".into(), message: message.into() }
}

/// Authenticated connection to an OpenAI-compatible API, shared by both
/// adapters in this module.
struct Endpoint {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl Endpoint {
    fn new(api_key: String, err: ErrorFn) -> Result<Self> {
        if api_key.is_empty() {
            return Err(err("API key must not be empty".into()));
        }
        Ok(Self { client: http_client(DEFAULT_TIMEOUT, err)?, api_key, base_url: OPENAI_BASE_URL.into() })
    }

    fn from_env(err: ErrorFn) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| err("OPENAI_API_KEY environment variable not set".into()))?;
        Self::new(api_key, err)
    }

    fn set_base_url(&mut self, base_url: String) {
        self.base_url = base_url.trim_end_matches('/').to_string();
    }

    fn set_timeout(&mut self, timeout: Duration, err: ErrorFn) -> Result<()> {
        self.client = http_client(timeout, err)?;
        Ok(())
    }

    /// POST `body` as JSON to `{base_url}/{path}` and decode the reply.
    async fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        err: ErrorFn,
    ) -> Result<R> {
        let response = self
            .client
            .post(format!("{}/{path}", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                error!(provider = "OpenAI", path, error = %e, "request failed");
                err(format!("request failed: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            error!(provider = "OpenAI", path, %status, "API error");
            return Err(err(format!("API returned {status}: {detail}")));
        }

        response.json().await.map_err(|e| {
            error!(provider = "OpenAI", path, error = %e, "failed to parse response");
            err(format!("failed to parse response: {e}"))
        })
    }
}

fn http_client(timeout: Duration, err: ErrorFn) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| err(format!("failed to build HTTP client: {e}")))
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// An [`EmbeddingProvider`] backed by the OpenAI embeddings API.
///
/// Defaults to `text-embedding-3-large` at its native 3072 dimensions.
/// Responses are reordered by their `index` field, so vectors always line
/// up with the input texts.
///
/// ```rust,ignore
/// use drawing_rag::openai::OpenAIEmbeddingProvider;
///
/// let provider = OpenAIEmbeddingProvider::from_env()?.with_dimensions(1536);
/// let embedding = provider.embed("SCALE: 1/4\" = 1'-0\"").await?;
/// ```
pub struct OpenAIEmbeddingProvider {
    endpoint: Endpoint,
    model: String,
    dimensions: usize,
    /// Sent as `dimensions` when set, truncating the returned vectors.
    request_dimensions: Option<usize>,
}

impl OpenAIEmbeddingProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(Self::with_endpoint(Endpoint::new(api_key.into(), embedding_error)?))
    }

    /// Read the key from `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self> {
        Ok(Self::with_endpoint(Endpoint::from_env(embedding_error)?))
    }

    fn with_endpoint(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            model: DEFAULT_EMBEDDING_MODEL.into(),
            dimensions: DEFAULT_DIMENSIONS,
            request_dimensions: None,
        }
    }

    /// Set the model name. Pair with [`with_dimensions`](Self::with_dimensions)
    /// when its native size is not 3072.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Request vectors of `dims` dimensions; also what
    /// [`dimensions()`](EmbeddingProvider::dimensions) reports.
    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.dimensions = dims;
        self.request_dimensions = Some(dims);
        self
    }

    /// Point at an OpenAI-compatible endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.endpoint.set_base_url(base_url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.endpoint.set_timeout(timeout, embedding_error)?;
        Ok(self)
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// Put embeddings back in input order and check the count.
fn ordered_embeddings(mut data: Vec<EmbeddingData>, expected: usize) -> Result<Vec<Vec<f32>>> {
    if data.len() != expected {
        return Err(embedding_error(format!(
            "API returned {} embeddings for {expected} inputs",
            data.len()
        )));
    }
    data.sort_by_key(|d| d.index);
    Ok(data.into_iter().map(|d| d.embedding).collect())
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| embedding_error("API returned empty response"))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(provider = "OpenAI", batch_size = texts.len(), model = %self.model, "embedding batch");

        let request =
            EmbeddingRequest { model: &self.model, input: texts, dimensions: self.request_dimensions };
        let response: EmbeddingResponse =
            self.endpoint.post("embeddings", &request, embedding_error).await?;
        ordered_embeddings(response.data, texts.len())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// A [`ChatModel`] backed by the OpenAI chat completions API.
///
/// Defaults to `gpt-4o-mini` at temperature 0.1.
pub struct OpenAIChatModel {
    endpoint: Endpoint,
    model: String,
    temperature: f32,
}

impl OpenAIChatModel {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(Self::with_endpoint(Endpoint::new(api_key.into(), generation_error)?))
    }

    /// Read the key from `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self> {
        Ok(Self::with_endpoint(Endpoint::from_env(generation_error)?))
    }

    fn with_endpoint(endpoint: Endpoint) -> Self {
        Self { endpoint, model: DEFAULT_CHAT_MODEL.into(), temperature: DEFAULT_TEMPERATURE }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Point at an OpenAI-compatible endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.endpoint.set_base_url(base_url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.endpoint.set_timeout(timeout, generation_error)?;
        Ok(self)
    }

    fn request<'a>(&'a self, messages: &'a [ChatMessage]) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: messages
                .iter()
                .map(|m| WireMessage { role: wire_role(m.role), content: &m.content })
                .collect(),
            temperature: self.temperature,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

fn wire_role(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

#[async_trait]
impl ChatModel for OpenAIChatModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        debug!(provider = "OpenAI", model = %self.model, message_count = messages.len(), "chat completion");

        let response: ChatResponse = self
            .endpoint
            .post("chat/completions", &self.request(messages), generation_error)
            .await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| generation_error("API returned no message content"))
    }
}
