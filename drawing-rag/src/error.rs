//! Error types for the `drawing-rag` crate.

use thiserror::Error;

/// Errors that can occur while ingesting drawings or answering questions.
#[derive(Debug, Error)]
pub enum RagError {
    /// A PDF could not be opened or parsed.
    #[error("Extraction error ({path}): {message}")]
    Extraction {
        /// The file that failed to extract.
        path: String,
        /// A description of the failure.
        message: String,
    },

    /// The OCR engine failed to recognize a rasterized page.
    #[error("OCR error ({engine}): {message}")]
    Ocr {
        /// The OCR engine that produced the error.
        engine: String,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred during embedding generation.
    #[error("Embedding error ({provider}): {message}")]
    Embedding {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred in the vector store backend.
    #[error("Vector store error ({backend}): {message}")]
    VectorStore {
        /// The vector store backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// Embedding or writing chunks failed. Vectors already written stay written.
    #[error("Indexing error after {written} vector(s) written: {message}")]
    Indexing {
        /// Number of vectors persisted before the failure.
        written: usize,
        /// A description of the failure.
        message: String,
    },

    /// Embedding the query or querying the vector store failed.
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// The language model call failed.
    #[error("Generation error ({provider}): {message}")]
    Generation {
        /// The generation provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// No PDF files were supplied or found.
    #[error("No PDFs found: {0}")]
    NoPdfs(String),

    /// PDFs were read but produced nothing to index.
    #[error("No content extracted: {0}")]
    NoContent(String),

    /// Filesystem error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A convenience result type for drawing RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;
