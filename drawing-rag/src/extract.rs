//! Layout-aware PDF extraction with a page-level OCR fallback.
//!
//! Each page contributes its native text blocks of at least
//! `min_block_chars` trimmed characters. Short blocks are usually stamps,
//! borders and noise. A page whose retained blocks add up to fewer than
//! `min_block_chars` characters is treated as scanned: it is rasterized at
//! `ocr_dpi` and run through the OCR engine, producing at most one fragment
//! that covers the whole page. A page with some native text is never OCR'd,
//! even if part of it is an unreadable raster.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::RagConfig;
use crate::document::{Fragment, SourceDocument};
use crate::error::{RagError, Result};
use crate::ocr::OcrEngine;
use crate::pdf::{PdfBackend, PdfPages};

/// A page that contributed nothing because reading it failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageFailure {
    /// 0-based page index.
    pub page: u32,
    pub error: String,
}

/// Everything [`PdfExtractor::extract`] got out of one PDF.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub fragments: Vec<Fragment>,
    /// Pages whose text layer, rasterization or OCR failed and which the
    /// OCR fallback did not recover. Text-poor pages without an OCR engine,
    /// or whose OCR text is too short, are not failures.
    pub page_failures: Vec<PageFailure>,
}

/// Turns one PDF into [`Fragment`]s.
pub struct PdfExtractor {
    backend: Arc<dyn PdfBackend>,
    ocr: Option<Arc<dyn OcrEngine>>,
    min_block_chars: usize,
    ocr_fallback: bool,
    ocr_dpi: u32,
}

impl PdfExtractor {
    /// Create an extractor without an OCR engine. Text-poor pages are
    /// skipped until one is attached with [`with_ocr`](Self::with_ocr).
    pub fn new(backend: Arc<dyn PdfBackend>, config: &RagConfig) -> Self {
        Self {
            backend,
            ocr: None,
            min_block_chars: config.min_block_chars,
            ocr_fallback: config.ocr_fallback,
            ocr_dpi: config.ocr_dpi,
        }
    }

    /// Attach the engine used for the OCR fallback.
    pub fn with_ocr(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.ocr = Some(engine);
        self
    }

    /// Extract fragments from `source`. Blocking; see [`extract_async`](Self::extract_async).
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Extraction`] if the PDF cannot be opened. Failures
    /// on individual pages (unreadable text layer, rasterization or OCR
    /// error) are logged, the page contributes nothing, and it is listed in
    /// [`Extraction::page_failures`].
    pub fn extract(&self, source: &SourceDocument) -> Result<Extraction> {
        let pdf = self.backend.open(&source.path).map_err(|e| match e {
            RagError::Extraction { message, .. } => {
                RagError::Extraction { path: source.path.display().to_string(), message }
            }
            other => RagError::Extraction {
                path: source.path.display().to_string(),
                message: other.to_string(),
            },
        })?;

        let mut extraction = Extraction::default();
        let mut ocr_pages = 0;
        for page in 0..pdf.page_count() {
            let fragments = &mut extraction.fragments;
            let before = fragments.len();
            let (native_chars, mut failure) =
                match self.native_fragments(source, &*pdf, page, fragments) {
                    Ok(chars) => (chars, None),
                    Err(e) => (0, Some(e)),
                };

            if self.ocr_fallback && native_chars < self.min_block_chars {
                match self.ocr_page(source, &*pdf, page) {
                    Ok(Some(fragment)) => {
                        fragments.push(fragment);
                        ocr_pages += 1;
                        failure = None;
                    }
                    Ok(None) => {}
                    Err(e) => failure = Some(e),
                }
            }
            debug!(
                document.source = %source.name,
                page,
                native_chars,
                fragments = fragments.len() - before,
                "extracted page"
            );
            if let Some(error) = failure {
                extraction.page_failures.push(PageFailure { page: page as u32, error });
            }
        }

        info!(
            document.source = %source.name,
            pages = pdf.page_count(),
            ocr_pages,
            fragment_count = extraction.fragments.len(),
            pages_failed = extraction.page_failures.len(),
            "extracted document"
        );
        Ok(extraction)
    }

    /// Run [`extract`](Self::extract) on the blocking thread pool so a long
    /// OCR job does not stall the async runtime.
    pub async fn extract_async(self: Arc<Self>, source: SourceDocument) -> Result<Extraction> {
        let path = source.path.display().to_string();
        tokio::task::spawn_blocking(move || self.extract(&source)).await.map_err(|e| {
            RagError::Extraction { path, message: format!("extraction task failed: {e}") }
        })?
    }

    /// Push the page's retained native blocks and return their total length.
    fn native_fragments(
        &self,
        source: &SourceDocument,
        pdf: &dyn PdfPages,
        page: usize,
        fragments: &mut Vec<Fragment>,
    ) -> std::result::Result<usize, String> {
        let blocks = match pdf.text_blocks(page) {
            Ok(blocks) => blocks,
            Err(e) => {
                warn!(document.source = %source.name, page, error = %e, "unreadable text layer");
                return Err(e.to_string());
            }
        };

        let mut total_chars = 0;
        for block in blocks {
            let text = block.text.trim();
            let chars = text.chars().count();
            if chars < self.min_block_chars {
                continue;
            }
            total_chars += chars;
            fragments.push(Fragment::native(source, page as u32, block.bbox, text));
        }
        Ok(total_chars)
    }

    /// OCR a text-poor page. `Ok(None)` when there is nothing to read;
    /// `Err` when rasterizing or recognizing failed.
    fn ocr_page(
        &self,
        source: &SourceDocument,
        pdf: &dyn PdfPages,
        page: usize,
    ) -> std::result::Result<Option<Fragment>, String> {
        let Some(engine) = &self.ocr else {
            debug!(document.source = %source.name, page, "text-poor page, no OCR engine configured");
            return Ok(None);
        };

        let image = match pdf.render(page, self.ocr_dpi) {
            Ok(Some(image)) => image,
            Ok(None) => {
                debug!(document.source = %source.name, page, "nothing to rasterize");
                return Ok(None);
            }
            Err(e) => {
                warn!(document.source = %source.name, page, error = %e, "rasterization failed");
                return Err(e.to_string());
            }
        };

        let text = match engine.recognize(&image) {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    document.source = %source.name,
                    page,
                    engine = engine.name(),
                    error = %e,
                    "OCR failed, skipping page"
                );
                return Err(e.to_string());
            }
        };

        let text = text.trim();
        if text.chars().count() < self.min_block_chars {
            debug!(document.source = %source.name, page, "OCR text below threshold");
            return Ok(None);
        }
        Ok(Some(Fragment::ocr(source, page as u32, pdf.page_rect(page), text)))
    }
}
