//! Configuration for ingestion and query answering.

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Tunable parameters shared by the extractor, chunker, retriever and
/// context assembler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Number of overlapping characters between consecutive chunks.
    pub chunk_overlap: usize,
    /// Number of matches retrieved when the caller does not say otherwise.
    pub top_k: usize,
    /// Minimum trimmed length of a native text block, and of OCR output.
    pub min_block_chars: usize,
    /// Whether text-poor pages are rasterized and sent to OCR.
    pub ocr_fallback: bool,
    /// Rasterization resolution for OCR.
    pub ocr_dpi: u32,
    /// Token budget for system prompt, context, query and history.
    pub history_token_budget: usize,
    /// Characters per estimated token.
    pub chars_per_token: usize,
    /// Number of chunk texts sent per embedding request.
    pub embedding_batch_size: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1200,
            chunk_overlap: 150,
            top_k: 6,
            min_block_chars: 40,
            ocr_fallback: true,
            ocr_dpi: 300,
            history_token_budget: 8000,
            chars_per_token: 4,
            embedding_batch_size: 64,
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Check that the parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if:
    /// - `chunk_overlap >= chunk_size`
    /// - `top_k == 0`
    /// - `chars_per_token == 0`
    /// - `embedding_batch_size == 0`
    /// - `ocr_dpi == 0`
    pub fn validate(&self) -> Result<()> {
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::Config(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(RagError::Config("top_k must be greater than zero".to_string()));
        }
        if self.chars_per_token == 0 {
            return Err(RagError::Config("chars_per_token must be greater than zero".to_string()));
        }
        if self.embedding_batch_size == 0 {
            return Err(RagError::Config(
                "embedding_batch_size must be greater than zero".to_string(),
            ));
        }
        if self.ocr_dpi == 0 {
            return Err(RagError::Config("ocr_dpi must be greater than zero".to_string()));
        }
        Ok(())
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the maximum chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the default number of matches to retrieve.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the minimum block / OCR text length.
    pub fn min_block_chars(mut self, chars: usize) -> Self {
        self.config.min_block_chars = chars;
        self
    }

    /// Enable or disable the OCR fallback.
    pub fn ocr_fallback(mut self, enabled: bool) -> Self {
        self.config.ocr_fallback = enabled;
        self
    }

    /// Set the OCR rasterization resolution.
    pub fn ocr_dpi(mut self, dpi: u32) -> Self {
        self.config.ocr_dpi = dpi;
        self
    }

    /// Set the prompt token budget.
    pub fn history_token_budget(mut self, tokens: usize) -> Self {
        self.config.history_token_budget = tokens;
        self
    }

    /// Set the characters-per-token estimate.
    pub fn chars_per_token(mut self, chars: usize) -> Self {
        self.config.chars_per_token = chars;
        self
    }

    /// Set how many texts are embedded per request.
    pub fn embedding_batch_size(mut self, size: usize) -> Self {
        self.config.embedding_batch_size = size;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// See [`RagConfig::validate`].
    pub fn build(self) -> Result<RagConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
