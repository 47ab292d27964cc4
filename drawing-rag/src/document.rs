//! Data types for drawings, fragments, chunks, stored vectors and matches.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{RagError, Result};

/// One PDF drawing set on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceDocument {
    /// Location of the PDF.
    pub path: PathBuf,
    /// Display name, the file name of `path`.
    pub name: String,
}

impl SourceDocument {
    /// Describe the PDF at `path`, using its file name as the display name.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self { path, name }
    }
}

/// Axis-aligned rectangle in page space: PDF points, top-left origin.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BoundingBox {
    /// Create a box, normalizing the corners so `x0 <= x1` and `y0 <= y1`.
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0: x0.min(x1), y0: y0.min(y1), x1: x0.max(x1), y1: y0.max(y1) }
    }

    /// The smallest box containing both `self` and `other`.
    pub fn union(&self, other: &BoundingBox) -> Self {
        Self {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }
}

/// Typed metadata carried from extraction through to retrieved matches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DrawingMetadata {
    /// Drawing display name (PDF file name).
    pub source: String,
    /// Path of the PDF at ingest time.
    pub path: String,
    /// 0-based page index.
    pub page: u32,
    /// Region of the page the text came from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
    /// `true` when the text came from OCR rather than the native text layer.
    pub ocr: bool,
    /// Position of the chunk within its fragment, set by the chunker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
}

impl DrawingMetadata {
    /// Flatten into a vector store payload. Stores only accept scalar values,
    /// so the bounding box is spread over four numeric keys.
    pub fn to_payload(&self, text: &str) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("text".into(), Value::String(text.to_string()));
        payload.insert("source".into(), Value::String(self.source.clone()));
        payload.insert("path".into(), Value::String(self.path.clone()));
        payload.insert("page".into(), Value::from(self.page));
        payload.insert("ocr".into(), Value::Bool(self.ocr));
        if let Some(index) = self.chunk_index {
            payload.insert("chunk_index".into(), Value::from(index));
        }
        if let Some(bbox) = &self.bbox {
            payload.insert("bbox_x0".into(), Value::from(bbox.x0));
            payload.insert("bbox_y0".into(), Value::from(bbox.y0));
            payload.insert("bbox_x1".into(), Value::from(bbox.x1));
            payload.insert("bbox_y1".into(), Value::from(bbox.y1));
        }
        payload
    }

    /// Rebuild metadata and chunk text from a stored payload.
    ///
    /// Numbers may come back as floats (`3.0`), so they are read as `f64`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::VectorStore`] if `text`, `source` or `page` is missing.
    pub fn from_payload(payload: &Map<String, Value>) -> Result<(Self, String)> {
        let missing = |key: &str| RagError::VectorStore {
            backend: "payload".to_string(),
            message: format!("stored vector is missing '{key}'"),
        };
        let text = payload.get("text").and_then(Value::as_str).ok_or_else(|| missing("text"))?;
        let source =
            payload.get("source").and_then(Value::as_str).ok_or_else(|| missing("source"))?;
        let page = payload.get("page").and_then(Value::as_f64).ok_or_else(|| missing("page"))?;
        let path = payload.get("path").and_then(Value::as_str).unwrap_or(source);
        let ocr = payload.get("ocr").and_then(Value::as_bool).unwrap_or(false);
        let chunk_index =
            payload.get("chunk_index").and_then(Value::as_f64).map(|i| i as usize);

        let coord = |key: &str| payload.get(key).and_then(Value::as_f64).map(|v| v as f32);
        let bbox = match (coord("bbox_x0"), coord("bbox_y0"), coord("bbox_x1"), coord("bbox_y1")) {
            (Some(x0), Some(y0), Some(x1), Some(y1)) => Some(BoundingBox::new(x0, y0, x1, y1)),
            _ => None,
        };

        let metadata = Self {
            source: source.to_string(),
            path: path.to_string(),
            page: page as u32,
            bbox,
            ocr,
            chunk_index,
        };
        Ok((metadata, text.to_string()))
    }
}

/// One extracted unit of text: a native text block or a whole OCR'd page.
///
/// Native fragments always carry a bounding box; OCR fragments carry the
/// full-page box. Construct through [`Fragment::native`] / [`Fragment::ocr`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fragment {
    pub text: String,
    pub metadata: DrawingMetadata,
}

impl Fragment {
    /// A fragment read from the PDF text layer.
    pub fn native(
        source: &SourceDocument,
        page: u32,
        bbox: BoundingBox,
        text: impl Into<String>,
    ) -> Self {
        Self { text: text.into(), metadata: fragment_metadata(source, page, Some(bbox), false) }
    }

    /// A fragment recognized from a rasterized page. `page_rect` is the
    /// fallback region when the engine gives no finer location.
    pub fn ocr(
        source: &SourceDocument,
        page: u32,
        page_rect: Option<BoundingBox>,
        text: impl Into<String>,
    ) -> Self {
        Self { text: text.into(), metadata: fragment_metadata(source, page, page_rect, true) }
    }
}

fn fragment_metadata(
    source: &SourceDocument,
    page: u32,
    bbox: Option<BoundingBox>,
    ocr: bool,
) -> DrawingMetadata {
    DrawingMetadata {
        source: source.name.clone(),
        path: source.path.to_string_lossy().into_owned(),
        page,
        bbox,
        ocr,
        chunk_index: None,
    }
}

/// A bounded slice of a fragment's text, ready for embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub metadata: DrawingMetadata,
}

/// A chunk's embedding plus its payload, as written to a namespace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexedVector {
    /// Unique within the namespace.
    pub id: String,
    pub values: Vec<f32>,
    pub text: String,
    pub metadata: DrawingMetadata,
}

/// A stored chunk returned by a similarity query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedMatch {
    pub id: String,
    /// Similarity score: higher is more relevant.
    pub score: f32,
    pub text: String,
    pub metadata: DrawingMetadata,
}

/// Who authored a turn of conversation supplied by the caller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One prior turn of the conversation. The service keeps no session state;
/// callers pass the history on every query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub text: String,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: TurnRole::User, text: text.into() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: TurnRole::Assistant, text: text.into() }
    }
}

/// Role of a message sent to the generation service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of a generation request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

impl From<&ConversationTurn> for ChatMessage {
    fn from(turn: &ConversationTurn) -> Self {
        let role = match turn.role {
            TurnRole::User => Role::User,
            TurnRole::Assistant => Role::Assistant,
        };
        Self { role, content: turn.text.clone() }
    }
}

/// Trust level reported with an answer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    /// Generic heuristic from similarity scores (higher is better):
    /// mean `>= 0.75` is high, `>= 0.5` is medium, anything else is low.
    pub fn from_scores(scores: &[f32]) -> Self {
        if scores.is_empty() {
            return Confidence::Low;
        }
        let mean = scores.iter().sum::<f32>() / scores.len() as f32;
        if mean >= 0.75 {
            Confidence::High
        } else if mean >= 0.5 {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
