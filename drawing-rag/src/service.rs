//! The drawing question-answering service.
//!
//! [`DrawingRagService`] owns the long-lived collaborators (embedding
//! provider, vector store, chat model) and composes the pipeline:
//!
//! - ingest: extract → chunk → index, per file, failures recorded per file;
//! - answer: retrieve → assemble prompt → generate → validate → enhance.
//!
//! Build it once at startup and share it (`Arc<DrawingRagService>`); every
//! operation is request-scoped and holds no mutable state.
//!
//! # Example
//!
//! ```rust,ignore
//! use drawing_rag::{DrawingRagService, InMemoryVectorStore, RagConfig};
//!
//! let service = DrawingRagService::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(Arc::new(embedder))
//!     .vector_store(Arc::new(InMemoryVectorStore::new()))
//!     .chat_model(Arc::new(chat))
//!     .build()?;
//!
//! service.ingest_dir("data/raw", None).await?;
//! let answer = service.answer_query("what is the wall width?", None, None, &[]).await?;
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::chunking::{Chunker, RecursiveChunker};
use crate::config::RagConfig;
use crate::context::ContextAssembler;
use crate::document::{
    BoundingBox, Confidence, ConversationTurn, DrawingMetadata, RetrievedMatch, SourceDocument,
};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::extract::PdfExtractor;
use crate::generation::ChatModel;
use crate::indexer::Indexer;
use crate::ocr::OcrEngine;
use crate::pdf::{LopdfBackend, PdfBackend};
use crate::retriever::Retriever;
use crate::validation::{ConstructionValidator, ValidationResult};
use crate::vectorstore::VectorStore;

/// Namespace used when the caller names none.
pub const DEFAULT_NAMESPACE: &str = "default";

/// A file that could not be ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of an ingest call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub namespace: String,
    /// Files extracted and fully indexed.
    pub files_ingested: usize,
    /// Fragments extracted across all files.
    pub documents_loaded: usize,
    /// Vectors written, including those of files that failed part-way.
    pub chunks_indexed: usize,
    /// Pages skipped because their text layer, rasterization or OCR failed.
    pub pages_failed: usize,
    pub failures: Vec<IngestFailure>,
}

/// One retrieved chunk as reported with an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub id: String,
    /// Similarity score, higher is closer.
    pub score: f32,
    pub metadata: DrawingMetadata,
    pub drawing_name: String,
    /// 0-based page index.
    pub page: u32,
    pub bbox: Option<BoundingBox>,
    pub text: String,
}

impl From<RetrievedMatch> for SourceRef {
    fn from(m: RetrievedMatch) -> Self {
        Self {
            id: m.id,
            score: m.score,
            drawing_name: m.metadata.source.clone(),
            page: m.metadata.page,
            bbox: m.metadata.bbox,
            metadata: m.metadata,
            text: m.text,
        }
    }
}

/// A validated answer with its evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAnswer {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub confidence: Confidence,
    /// Distinct drawing names in rank order.
    pub drawings_referenced: Vec<String>,
    pub validation: ValidationResult,
}

/// Retrieval-augmented question answering over construction drawings.
pub struct DrawingRagService {
    config: RagConfig,
    extractor: Arc<PdfExtractor>,
    chunker: Arc<dyn Chunker>,
    indexer: Indexer,
    retriever: Retriever,
    assembler: ContextAssembler,
    validator: ConstructionValidator,
    chat_model: Arc<dyn ChatModel>,
    store: Arc<dyn VectorStore>,
    default_namespace: String,
}

impl DrawingRagService {
    /// Create a new [`DrawingRagServiceBuilder`].
    pub fn builder() -> DrawingRagServiceBuilder {
        DrawingRagServiceBuilder::default()
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn default_namespace(&self) -> &str {
        &self.default_namespace
    }

    fn namespace<'a>(&'a self, namespace: Option<&'a str>) -> &'a str {
        namespace.filter(|ns| !ns.is_empty()).unwrap_or(&self.default_namespace)
    }

    /// Ingest PDF files one after another.
    ///
    /// A file that cannot be extracted or indexed is recorded in
    /// [`IngestReport::failures`] and the rest of the batch continues.
    ///
    /// # Errors
    ///
    /// - [`RagError::NoPdfs`] when `paths` is empty.
    /// - The first file's error when no file could be ingested.
    /// - [`RagError::NoContent`] when every file was read but nothing was indexed.
    pub async fn ingest_pdfs(
        &self,
        paths: &[PathBuf],
        namespace: Option<&str>,
    ) -> Result<IngestReport> {
        if paths.is_empty() {
            return Err(RagError::NoPdfs("no PDF paths were given".to_string()));
        }

        let namespace = self.namespace(namespace);
        let mut report = IngestReport { namespace: namespace.to_string(), ..Default::default() };
        let mut first_error = None;

        for path in paths {
            match self.ingest_file(path, namespace, &mut report).await {
                Ok(()) => report.files_ingested += 1,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to ingest file");
                    report.failures.push(IngestFailure { path: path.clone(), error: e.to_string() });
                    first_error.get_or_insert(e);
                }
            }
        }

        if report.files_ingested == 0 {
            if let Some(e) = first_error {
                return Err(e);
            }
        }
        if report.chunks_indexed == 0 && report.failures.is_empty() {
            return Err(RagError::NoContent(format!(
                "{} PDF(s) produced no indexable text",
                report.files_ingested
            )));
        }

        info!(
            namespace,
            files = report.files_ingested,
            documents = report.documents_loaded,
            chunks = report.chunks_indexed,
            pages_failed = report.pages_failed,
            failures = report.failures.len(),
            "ingest finished"
        );
        Ok(report)
    }

    async fn ingest_file(
        &self,
        path: &Path,
        namespace: &str,
        report: &mut IngestReport,
    ) -> Result<()> {
        let source = SourceDocument::from_path(path);
        let extraction = self.extractor.clone().extract_async(source).await?;
        let fragments = extraction.fragments;
        report.pages_failed += extraction.page_failures.len();
        report.documents_loaded += fragments.len();

        if fragments.is_empty() {
            if let Some(first) = extraction.page_failures.first() {
                return Err(RagError::Extraction {
                    path: path.display().to_string(),
                    message: format!(
                        "no page could be read ({} failed, first on page {}: {})",
                        extraction.page_failures.len(),
                        first.page + 1,
                        first.error
                    ),
                });
            }
        }

        let chunks = self.chunker.split(&fragments);
        match self.indexer.index(&chunks, namespace).await {
            Ok(written) => {
                report.chunks_indexed += written;
                Ok(())
            }
            Err(RagError::Indexing { written, message }) => {
                report.chunks_indexed += written;
                Err(RagError::Indexing { written, message })
            }
            Err(e) => Err(e),
        }
    }

    /// Ingest every `.pdf` file under `dir`, recursively, in path order.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::NoPdfs`] if the directory holds no PDF, and
    /// [`RagError::Io`] if it cannot be walked. Otherwise as
    /// [`ingest_pdfs`](Self::ingest_pdfs).
    pub async fn ingest_dir(
        &self,
        dir: impl AsRef<Path>,
        namespace: Option<&str>,
    ) -> Result<IngestReport> {
        let dir = dir.as_ref();
        let mut paths = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::from)?;
            if entry.file_type().is_file() && is_pdf(entry.path()) {
                paths.push(entry.into_path());
            }
        }
        if paths.is_empty() {
            return Err(RagError::NoPdfs(format!("no PDF files under {}", dir.display())));
        }
        info!(dir = %dir.display(), file_count = paths.len(), "ingesting directory");
        self.ingest_pdfs(&paths, namespace).await
    }

    /// Ingest uploaded files given as `(file name, bytes)`.
    ///
    /// Non-PDF names are skipped. The PDFs are written to a temporary
    /// directory that is removed when this call returns, whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::NoPdfs`] if no upload is a PDF. Otherwise as
    /// [`ingest_pdfs`](Self::ingest_pdfs).
    pub async fn ingest_uploads(
        &self,
        files: &[(String, Vec<u8>)],
        namespace: Option<&str>,
    ) -> Result<IngestReport> {
        let staging = tempfile::Builder::new().prefix("drawing-uploads-").tempdir()?;

        let mut paths = Vec::new();
        for (slot, (name, bytes)) in files.iter().enumerate() {
            let Some(file_name) = Path::new(name).file_name() else {
                warn!(name, "skipping upload without a file name");
                continue;
            };
            if !is_pdf(Path::new(file_name)) {
                warn!(name, "skipping non-PDF upload");
                continue;
            }
            // One directory per upload keeps same-named files apart under their own name.
            let dir = staging.path().join(slot.to_string());
            tokio::fs::create_dir(&dir).await?;
            let target = dir.join(file_name);
            tokio::fs::write(&target, bytes).await?;
            paths.push(target);
        }
        if paths.is_empty() {
            return Err(RagError::NoPdfs(format!("none of {} upload(s) is a PDF", files.len())));
        }

        self.ingest_pdfs(&paths, namespace).await
    }

    /// Answer `query` from the drawings in `namespace`.
    ///
    /// `top_k` defaults to the configured value. `history` is the prior
    /// conversation, oldest first; only as much as fits the token budget
    /// is sent. The validator's confidence, when it has one, wins over the
    /// retrieval-score heuristic.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Retrieval`] if the query is blank or retrieval
    /// fails, and [`RagError::Generation`] if the chat model fails.
    pub async fn answer_query(
        &self,
        query: &str,
        top_k: Option<usize>,
        namespace: Option<&str>,
        history: &[ConversationTurn],
    ) -> Result<QueryAnswer> {
        if query.trim().is_empty() {
            return Err(RagError::Retrieval("query must not be empty".to_string()));
        }
        let namespace = self.namespace(namespace);
        let k = top_k.unwrap_or(self.config.top_k);

        let matches = self.retriever.retrieve(query, k, namespace).await?;
        let prompt = self.assembler.assemble(&matches, history, query);

        let raw = self.chat_model.generate(&prompt.messages).await.map_err(|e| {
            error!(model = self.chat_model.name(), error = %e, "generation failed");
            match e {
                RagError::Generation { .. } => e,
                other => RagError::Generation {
                    provider: self.chat_model.name().to_string(),
                    message: other.to_string(),
                },
            }
        })?;

        let validation = self.validator.validate(query, &matches);
        let enhanced = self.validator.enhance(&raw, &validation);
        let scores: Vec<f32> = matches.iter().map(|m| m.score).collect();
        let confidence = enhanced.confidence.unwrap_or_else(|| Confidence::from_scores(&scores));

        let drawings_referenced = referenced_drawings(&matches);

        info!(
            namespace,
            match_count = matches.len(),
            history_included = prompt.history_included,
            prompt_tokens = prompt.estimated_tokens,
            safe = validation.safe,
            %confidence,
            "answered query"
        );

        Ok(QueryAnswer {
            answer: enhanced.answer,
            sources: matches.into_iter().map(SourceRef::from).collect(),
            confidence,
            drawings_referenced,
            validation,
        })
    }

    /// Delete every vector in `namespace`.
    pub async fn clear_namespace(&self, namespace: Option<&str>) -> Result<()> {
        let namespace = self.namespace(namespace);
        self.store.delete_all(namespace).await?;
        info!(namespace, store = self.store.name(), "cleared namespace");
        Ok(())
    }
}

/// Distinct drawing names, first occurrence wins.
fn referenced_drawings(matches: &[RetrievedMatch]) -> Vec<String> {
    let mut seen = HashSet::new();
    matches
        .iter()
        .filter(|m| seen.insert(m.metadata.source.as_str()))
        .map(|m| m.metadata.source.clone())
        .collect()
}

fn is_pdf(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

/// Builder for [`DrawingRagService`].
///
/// `embedding_provider`, `vector_store` and `chat_model` are required. The
/// PDF backend defaults to [`LopdfBackend`], the chunker to a
/// [`RecursiveChunker`] sized from the config. Without an OCR engine,
/// text-poor pages contribute nothing.
#[derive(Default)]
pub struct DrawingRagServiceBuilder {
    config: Option<RagConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    vector_store: Option<Arc<dyn VectorStore>>,
    chat_model: Option<Arc<dyn ChatModel>>,
    pdf_backend: Option<Arc<dyn PdfBackend>>,
    ocr_engine: Option<Arc<dyn OcrEngine>>,
    chunker: Option<Arc<dyn Chunker>>,
    validator: Option<ConstructionValidator>,
    system_prompt: Option<String>,
    default_namespace: Option<String>,
}

impl DrawingRagServiceBuilder {
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    pub fn chat_model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.chat_model = Some(model);
        self
    }

    pub fn pdf_backend(mut self, backend: Arc<dyn PdfBackend>) -> Self {
        self.pdf_backend = Some(backend);
        self
    }

    pub fn ocr_engine(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.ocr_engine = Some(engine);
        self
    }

    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    pub fn validator(mut self, validator: ConstructionValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn default_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.default_namespace = Some(namespace.into());
        self
    }

    /// Build the service.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if a required collaborator is missing or
    /// the config is invalid.
    pub fn build(self) -> Result<DrawingRagService> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let embedder = self
            .embedding_provider
            .ok_or_else(|| RagError::Config("embedding_provider is required".to_string()))?;
        let store = self
            .vector_store
            .ok_or_else(|| RagError::Config("vector_store is required".to_string()))?;
        let chat_model =
            self.chat_model.ok_or_else(|| RagError::Config("chat_model is required".to_string()))?;

        let backend = self.pdf_backend.unwrap_or_else(|| Arc::new(LopdfBackend::new()));
        let mut extractor = PdfExtractor::new(backend, &config);
        if let Some(engine) = self.ocr_engine {
            extractor = extractor.with_ocr(engine);
        }
        let chunker = self.chunker.unwrap_or_else(|| {
            Arc::new(RecursiveChunker::new(config.chunk_size, config.chunk_overlap))
        });
        let mut assembler = ContextAssembler::new(&config);
        if let Some(prompt) = self.system_prompt {
            assembler = assembler.with_system_prompt(prompt);
        }

        Ok(DrawingRagService {
            extractor: Arc::new(extractor),
            chunker,
            indexer: Indexer::new(embedder.clone(), store.clone(), &config),
            retriever: Retriever::new(embedder, store.clone()),
            assembler,
            validator: self.validator.unwrap_or_default(),
            chat_model,
            store,
            default_namespace: self
                .default_namespace
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::document::{ChatMessage, Role};
    use crate::embedding::tests::HashEmbedder;
    use crate::extract::tests::{FakePage, FakePdfBackend, ScriptedOcr};
    use crate::inmemory::InMemoryVectorStore;

    /// Chat model that echoes a fixed reply and records what it was sent.
    struct ScriptedChat {
        reply: std::result::Result<String, String>,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedChat {
        fn replying(reply: &str) -> Self {
            Self { reply: Ok(reply.to_string()), seen: Mutex::new(Vec::new()) }
        }

        fn failing(message: &str) -> Self {
            Self { reply: Err(message.to_string()), seen: Mutex::new(Vec::new()) }
        }

        fn last_prompt(&self) -> Vec<ChatMessage> {
            self.seen.lock().unwrap().last().cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedChat {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
            self.seen.lock().unwrap().push(messages.to_vec());
            self.reply.clone().map_err(|message| RagError::Generation {
                provider: "scripted".to_string(),
                message,
            })
        }
    }

    const WALL: &str = "Wall thickness: 300mm, Scale: 1/4\" = 1'-0\"";
    const DETAIL: &str = "DETAIL A - N.T.S. TYPICAL BEAM CONNECTION AT GRID LINE 4";
    const SCANNED: &str = "ROOF PLAN SCALE: 1/8\" = 1'-0\" PARAPET HEIGHT 3'-6\" ABOVE DECK";

    struct Harness {
        service: DrawingRagService,
        store: Arc<InMemoryVectorStore>,
        chat: Arc<ScriptedChat>,
        ocr: Arc<ScriptedOcr>,
    }

    fn harness(chat: ScriptedChat) -> Harness {
        let native = |blocks| FakePage { blocks, ..Default::default() };
        let unreadable = FakePage { unreadable: true, ..Default::default() };
        let backend = FakePdfBackend::default()
            .with_file("A-101.pdf", vec![native(vec![WALL])])
            .with_file("S-501.pdf", vec![native(vec![DETAIL])])
            .with_file("A-201.pdf", vec![FakePage { scanned: true, ..Default::default() }])
            .with_file("BLANK.pdf", vec![native(vec!["X"])])
            .with_file("S-502.pdf", vec![native(vec![DETAIL]), unreadable.clone()])
            .with_file("S-503.pdf", vec![unreadable.clone(), unreadable]);
        let store = Arc::new(InMemoryVectorStore::new());
        let chat = Arc::new(chat);
        let ocr = Arc::new(ScriptedOcr::returning(vec![Ok(SCANNED.to_string())]));
        let config = RagConfig::builder().min_block_chars(10).build().unwrap();
        let service = DrawingRagService::builder()
            .config(config)
            .embedding_provider(Arc::new(HashEmbedder::new(128)))
            .vector_store(store.clone())
            .chat_model(chat.clone())
            .pdf_backend(Arc::new(backend))
            .ocr_engine(ocr.clone())
            .build()
            .unwrap();
        Harness { service, store, chat, ocr }
    }

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(|n| PathBuf::from(format!("/drawings/{n}"))).collect()
    }

    #[tokio::test]
    async fn ingest_reports_counts() {
        let h = harness(ScriptedChat::replying("ok"));
        let report = h.service.ingest_pdfs(&paths(&["A-101.pdf", "A-201.pdf"]), Some("p1")).await.unwrap();

        assert_eq!(report.namespace, "p1");
        assert_eq!(report.files_ingested, 2);
        assert_eq!(report.documents_loaded, 2);
        assert_eq!(report.chunks_indexed, 2);
        assert!(report.failures.is_empty());
        assert_eq!(h.ocr.calls(), 1);
        assert_eq!(h.store.len("p1").await, 2);
    }

    #[tokio::test]
    async fn bad_file_is_recorded_and_batch_continues() {
        let h = harness(ScriptedChat::replying("ok"));
        let report =
            h.service.ingest_pdfs(&paths(&["missing.pdf", "A-101.pdf"]), None).await.unwrap();

        assert_eq!(report.namespace, DEFAULT_NAMESPACE);
        assert_eq!(report.files_ingested, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, PathBuf::from("/drawings/missing.pdf"));
        assert!(report.failures[0].error.contains("Extraction error"));
    }

    #[tokio::test]
    async fn failed_pages_are_counted() {
        let h = harness(ScriptedChat::replying("ok"));
        let report = h
            .service
            .ingest_pdfs(&paths(&["S-502.pdf", "S-503.pdf", "A-101.pdf"]), None)
            .await
            .unwrap();

        assert_eq!(report.files_ingested, 2);
        assert_eq!(report.chunks_indexed, 2);
        assert_eq!(report.pages_failed, 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, PathBuf::from("/drawings/S-503.pdf"));
        assert!(report.failures[0].error.contains("no page could be read (2 failed"));
    }

    #[tokio::test]
    async fn all_files_failing_returns_the_error() {
        let h = harness(ScriptedChat::replying("ok"));
        let err = h.service.ingest_pdfs(&paths(&["missing.pdf"]), None).await.unwrap_err();
        assert!(matches!(err, RagError::Extraction { .. }));
    }

    #[tokio::test]
    async fn empty_outcomes_are_explicit() {
        let h = harness(ScriptedChat::replying("ok"));
        assert!(matches!(h.service.ingest_pdfs(&[], None).await, Err(RagError::NoPdfs(_))));
        assert!(matches!(
            h.service.ingest_pdfs(&paths(&["BLANK.pdf"]), None).await,
            Err(RagError::NoContent(_))
        ));
        assert!(matches!(
            h.service.ingest_uploads(&[("notes.txt".to_string(), b"hi".to_vec())], None).await,
            Err(RagError::NoPdfs(_))
        ));
    }

    #[tokio::test]
    async fn measurement_answer_with_scale_and_dimension_is_high_confidence() {
        let h = harness(ScriptedChat::replying("The wall is 300mm thick (A-101.pdf)."));
        h.service.ingest_pdfs(&paths(&["A-101.pdf"]), None).await.unwrap();

        let answer = h.service.answer_query("what is the wall width?", None, None, &[]).await.unwrap();
        assert!(answer.validation.safe);
        assert_eq!(answer.confidence, Confidence::High);
        assert_eq!(answer.answer, "The wall is 300mm thick (A-101.pdf).");
        assert_eq!(answer.drawings_referenced, vec!["A-101.pdf"]);
        assert_eq!(answer.sources[0].text, WALL);
        assert_eq!(answer.sources[0].page, 0);
        assert!(answer.sources[0].bbox.is_some());

        let prompt = h.chat.last_prompt();
        assert_eq!(prompt.len(), 2);
        assert_eq!(prompt[0].role, Role::System);
        assert!(prompt[1].content.contains("[Source: A-101.pdf, page 1]"));
        assert!(prompt[1].content.ends_with("Question: what is the wall width?"));
    }

    #[tokio::test]
    async fn nts_evidence_overrides_to_low_confidence() {
        let h = harness(ScriptedChat::replying("The beam is 20 feet long."));
        h.service.ingest_pdfs(&paths(&["S-501.pdf", "A-101.pdf"]), Some("mixed")).await.unwrap();

        let answer = h
            .service
            .answer_query("what is the length of the beam?", Some(6), Some("mixed"), &[])
            .await
            .unwrap();
        assert!(!answer.validation.safe);
        assert_eq!(answer.confidence, Confidence::Low);
        assert!(answer.answer.starts_with("⚠️ **CONSTRUCTION SAFETY WARNING:**"));
        assert!(answer.answer.ends_with("**Original Response:**\nThe beam is 20 feet long."));
        assert_eq!(answer.sources.len(), 2);
    }

    #[tokio::test]
    async fn ocr_evidence_is_medium_confidence_with_notes() {
        let h = harness(ScriptedChat::replying("The parapet is 3'-6\" high."));
        h.service.ingest_pdfs(&paths(&["A-201.pdf"]), None).await.unwrap();

        let answer = h.service.answer_query("parapet height", None, None, &[]).await.unwrap();
        assert_eq!(answer.confidence, Confidence::Medium);
        assert!(answer.answer.contains("📋 **Construction Notes:**"));
        assert!(answer.sources[0].metadata.ocr);
    }

    #[tokio::test]
    async fn non_measurement_query_uses_score_heuristic() {
        let h = harness(ScriptedChat::replying("Concrete."));
        h.service.ingest_pdfs(&paths(&["A-101.pdf"]), None).await.unwrap();

        let answer = h.service.answer_query("wall thickness scale", None, None, &[]).await.unwrap();
        assert!(answer.validation.safe);
        assert_eq!(answer.validation.confidence_override, None);
        let scores: Vec<f32> = answer.sources.iter().map(|s| s.score).collect();
        assert_eq!(answer.confidence, Confidence::from_scores(&scores));
        assert_eq!(answer.answer, "Concrete.");
    }

    #[tokio::test]
    async fn empty_namespace_answers_with_low_confidence() {
        let h = harness(ScriptedChat::replying("I could not find that on the drawings."));
        let answer = h.service.answer_query("who is the architect?", None, Some("empty"), &[]).await.unwrap();
        assert!(answer.sources.is_empty());
        assert!(answer.drawings_referenced.is_empty());
        assert_eq!(answer.confidence, Confidence::Low);
    }

    #[tokio::test]
    async fn history_is_forwarded_in_order() {
        let h = harness(ScriptedChat::replying("ok"));
        h.service.ingest_pdfs(&paths(&["A-101.pdf"]), None).await.unwrap();
        let history = vec![
            ConversationTurn::user("Which sheet shows the walls?"),
            ConversationTurn::assistant("A-101.pdf"),
        ];

        h.service.answer_query("and the wall width?", None, None, &history).await.unwrap();
        let prompt = h.chat.last_prompt();
        assert_eq!(prompt.len(), 4);
        assert_eq!(prompt[1].content, "Which sheet shows the walls?");
        assert_eq!(prompt[2].role, Role::Assistant);
    }

    #[tokio::test]
    async fn generation_failure_is_surfaced() {
        let h = harness(ScriptedChat::failing("rate limited"));
        h.service.ingest_pdfs(&paths(&["A-101.pdf"]), None).await.unwrap();
        let err = h.service.answer_query("what is the wall width?", None, None, &[]).await.unwrap_err();
        assert!(matches!(err, RagError::Generation { .. }));
    }

    #[tokio::test]
    async fn blank_query_is_rejected() {
        let h = harness(ScriptedChat::replying("ok"));
        assert!(matches!(
            h.service.answer_query("   ", None, None, &[]).await,
            Err(RagError::Retrieval(_))
        ));
    }

    #[tokio::test]
    async fn clear_namespace_removes_vectors() {
        let h = harness(ScriptedChat::replying("ok"));
        h.service.ingest_pdfs(&paths(&["A-101.pdf"]), Some("tmp")).await.unwrap();
        h.service.clear_namespace(Some("tmp")).await.unwrap();
        assert_eq!(h.store.len("tmp").await, 0);
    }

    #[tokio::test]
    async fn uploads_are_staged_and_ingested() {
        let h = harness(ScriptedChat::replying("ok"));
        let report = h
            .service
            .ingest_uploads(
                &[
                    ("A-101.pdf".to_string(), b"%PDF-1.5".to_vec()),
                    ("readme.md".to_string(), b"# notes".to_vec()),
                ],
                Some("uploads"),
            )
            .await
            .unwrap();
        assert_eq!(report.files_ingested, 1);
        assert_eq!(h.store.len("uploads").await, 1);
    }

    #[test]
    fn builder_requires_collaborators() {
        let err = DrawingRagService::builder().build().err().unwrap();
        assert!(matches!(err, RagError::Config(_)));
    }
}
