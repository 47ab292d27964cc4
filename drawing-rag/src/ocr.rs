//! OCR engine capability.

use std::path::PathBuf;
use std::process::Command;

use image::{DynamicImage, ImageFormat};
use tracing::debug;

use crate::error::{RagError, Result};

/// Recognizes text in a rasterized page.
///
/// Recognition is CPU-bound and blocking; callers run it off the async
/// runtime (the extractor runs inside `spawn_blocking`).
pub trait OcrEngine: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Return the text recognized in `image`, untrimmed.
    fn recognize(&self, image: &DynamicImage) -> Result<String>;
}

/// [`OcrEngine`] that shells out to the `tesseract` command-line tool.
///
/// Each call writes the image to a temporary PNG that is removed when the
/// call returns, on success or failure.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    binary: PathBuf,
    language: String,
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self { binary: PathBuf::from("tesseract"), language: "eng".to_string() }
    }
}

impl TesseractOcr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific `tesseract` executable.
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Set the language pack (`-l`), e.g. `eng` or `eng+fra`.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    fn error(&self, message: impl Into<String>) -> RagError {
        RagError::Ocr { engine: "tesseract".to_string(), message: message.into() }
    }
}

impl OcrEngine for TesseractOcr {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize(&self, image: &DynamicImage) -> Result<String> {
        let input = tempfile::Builder::new().prefix("page_").suffix(".png").tempfile()?;
        image
            .save_with_format(input.path(), ImageFormat::Png)
            .map_err(|e| self.error(format!("failed to write page image: {e}")))?;

        debug!(
            width = image.width(),
            height = image.height(),
            language = %self.language,
            "running tesseract"
        );
        let output = Command::new(&self.binary)
            .arg(input.path())
            .arg("stdout")
            .args(["-l", &self.language])
            .output()
            .map_err(|e| {
                self.error(format!("failed to run '{}': {e}", self.binary.display()))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.error(format!("exited with {}: {}", output.status, stderr.trim())));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
