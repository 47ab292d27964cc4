//! # drawing-rag
//!
//! Retrieval-augmented question answering over architectural and
//! construction PDF drawings.
//!
//! ## Overview
//!
//! Ingest path: a PDF goes through [`PdfExtractor`] (native text blocks,
//! page-level OCR fallback for scanned sheets), then [`RecursiveChunker`],
//! then [`Indexer`], which embeds the chunks and writes them into a
//! namespace of a [`VectorStore`].
//!
//! Query path: [`Retriever`] fetches the closest chunks, [`ContextAssembler`]
//! builds a token-budgeted prompt with conversation history, a
//! [`ChatModel`] answers, and [`ConstructionValidator`] checks the evidence
//! for scale and Not-To-Scale markings before the answer is trusted.
//! [`DrawingRagService`] wires it all together.
//!
//! ## Features
//!
//! | Feature | Adds |
//! |---------|------|
//! | `openai` | [`OpenAIEmbeddingProvider`](openai::OpenAIEmbeddingProvider), [`OpenAIChatModel`](openai::OpenAIChatModel) |
//! | `pinecone` | [`PineconeVectorStore`](pinecone::PineconeVectorStore) |
//! | `full` | all of the above |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use drawing_rag::{DrawingRagService, InMemoryVectorStore, TesseractOcr};
//!
//! let service = DrawingRagService::builder()
//!     .embedding_provider(Arc::new(embedder))
//!     .vector_store(Arc::new(InMemoryVectorStore::new()))
//!     .chat_model(Arc::new(chat))
//!     .ocr_engine(Arc::new(TesseractOcr::new()))
//!     .build()?;
//!
//! service.ingest_dir("data/raw", Some("tower-a")).await?;
//! let answer = service
//!     .answer_query("what is the wall width on A-101?", None, Some("tower-a"), &[])
//!     .await?;
//! println!("{} ({})", answer.answer, answer.confidence);
//! ```

pub mod chunking;
pub mod config;
pub mod context;
pub mod document;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
pub mod indexer;
pub mod inmemory;
pub mod ocr;
#[cfg(feature = "openai")]
pub mod openai;
pub mod pdf;
#[cfg(feature = "pinecone")]
pub mod pinecone;
pub mod retriever;
pub mod service;
pub mod validation;
pub mod vectorstore;

pub use chunking::{Chunker, RecursiveChunker};
pub use config::{RagConfig, RagConfigBuilder};
pub use context::{ContextAssembler, DEFAULT_SYSTEM_PROMPT, Prompt};
pub use document::{
    BoundingBox, ChatMessage, Chunk, Confidence, ConversationTurn, DrawingMetadata, Fragment,
    IndexedVector, RetrievedMatch, Role, SourceDocument, TurnRole,
};
pub use embedding::EmbeddingProvider;
pub use error::{RagError, Result};
pub use extract::{Extraction, PageFailure, PdfExtractor};
pub use generation::ChatModel;
pub use indexer::Indexer;
pub use inmemory::InMemoryVectorStore;
pub use ocr::{OcrEngine, TesseractOcr};
#[cfg(feature = "openai")]
pub use openai::{OpenAIChatModel, OpenAIEmbeddingProvider};
pub use pdf::{LopdfBackend, PdfBackend, PdfPages, TextBlock};
#[cfg(feature = "pinecone")]
pub use pinecone::{IndexSpec, Metric, PineconeVectorStore};
pub use retriever::Retriever;
pub use service::{
    DEFAULT_NAMESPACE, DrawingRagService, DrawingRagServiceBuilder, IngestFailure, IngestReport,
    QueryAnswer, SourceRef,
};
pub use validation::{ConstructionValidator, DetectionRule, EnhancedAnswer, RuleKind, ValidationResult};
pub use vectorstore::VectorStore;
