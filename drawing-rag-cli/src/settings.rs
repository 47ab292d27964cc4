//! Settings file handling.
//!
//! Values come from, in increasing precedence: built-in defaults, the TOML
//! settings file, then command-line flags and their environment variables.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use drawing_rag::{Metric, RagConfig};
use serde::{Deserialize, Serialize};

/// File read when `--config` is not given, if it exists.
pub const DEFAULT_SETTINGS_FILE: &str = "drawing-rag.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub openai: OpenAISettings,
    pub pinecone: PineconeSettings,
    pub ocr: OcrSettings,
    pub data: DataSettings,
    pub rag: RagConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAISettings {
    pub api_key: Option<String>,
    pub chat_model: String,
    pub temperature: f32,
    pub embedding_model: String,
    pub embedding_dim: usize,
    pub timeout_secs: u64,
}

impl Default for OpenAISettings {
    fn default() -> Self {
        Self {
            api_key: None,
            chat_model: "gpt-4o-mini".to_string(),
            temperature: 0.1,
            embedding_model: "text-embedding-3-large".to_string(),
            embedding_dim: 3072,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PineconeSettings {
    pub api_key: Option<String>,
    pub index_name: String,
    /// Data-plane host; looked up from `index_name` when unset.
    pub index_host: Option<String>,
    pub cloud: String,
    pub region: String,
    pub metric: Metric,
    pub namespace: String,
    pub timeout_secs: u64,
}

impl Default for PineconeSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            index_name: "construction-rag".to_string(),
            index_host: None,
            cloud: "aws".to_string(),
            region: "us-east-1".to_string(),
            metric: Metric::Cosine,
            namespace: drawing_rag::DEFAULT_NAMESPACE.to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    pub tesseract: PathBuf,
    pub language: String,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self { tesseract: PathBuf::from("tesseract"), language: "eng".to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    /// Directory ingested when `ingest` is given no paths.
    pub dir: PathBuf,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self { dir: PathBuf::from("data/raw") }
    }
}

/// Values supplied on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub openai_api_key: Option<String>,
    pub pinecone_api_key: Option<String>,
    pub pinecone_index_host: Option<String>,
    pub namespace: Option<String>,
    pub data_dir: Option<PathBuf>,
}

impl Settings {
    /// Load `path`, or [`DEFAULT_SETTINGS_FILE`] when it exists, or defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_SETTINGS_FILE);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid settings file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let settings: Self = toml::from_str(text)?;
        settings.rag.validate()?;
        Ok(settings)
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if overrides.openai_api_key.is_some() {
            self.openai.api_key = overrides.openai_api_key;
        }
        if overrides.pinecone_api_key.is_some() {
            self.pinecone.api_key = overrides.pinecone_api_key;
        }
        if overrides.pinecone_index_host.is_some() {
            self.pinecone.index_host = overrides.pinecone_index_host;
        }
        if let Some(namespace) = overrides.namespace {
            self.pinecone.namespace = namespace;
        }
        if let Some(dir) = overrides.data_dir {
            self.data.dir = dir;
        }
    }

    pub fn openai_api_key(&self) -> Result<&str> {
        self.openai
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .context("OpenAI API key missing: set OPENAI_API_KEY or [openai] api_key")
    }

    pub fn pinecone_api_key(&self) -> Result<&str> {
        self.pinecone
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .context("Pinecone API key missing: set PINECONE_API_KEY or [pinecone] api_key")
    }
}
