//! Retriever configuration
//!
//! Every tunable of the pipeline lives in [`RetrieverConfig`], which is passed
//! into the engine at construction. Values come from a JSON file (explicit
//! path or the per-user default location) and fall back to built-in defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::documents::chunker::ChunkerConfig;

/// Application directory name under the platform config dir
const APP_DIR_NAME: &str = "docseek";

/// Config file name inside the application directory
const CONFIG_FILE_NAME: &str = "config.json";

pub const DEFAULT_CORPUS_DIR: &str = "data";
pub const DEFAULT_INDEX_DIR: &str = "vector_index";
pub const DEFAULT_EXTENSION: &str = "pdf";
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 150;
pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_REPORT_PATH: &str = "retrieval_output.txt";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl Serialize for ConfigError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Embedding backend selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmbeddingProvider {
    /// Offline feature-hashing embeddings
    FeatureHash,
    /// Any OpenAI-compatible `/embeddings` endpoint
    #[serde(rename = "openai")]
    OpenAi,
}

/// Embedding model settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    /// Model identifier, recorded in the index manifest
    pub model: String,
    /// Output dimension. Feature hashing falls back to 256; HTTP providers
    /// request it as `dimensions` and otherwise accept what the server returns.
    pub dimension: Option<usize>,
    pub base_url: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: usize,
    /// Passages per embedding request during a build
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::FeatureHash,
            model: "feature-hash-v1".to_string(),
            dimension: None,
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            timeout_secs: 60,
            max_retries: 5,
            batch_size: 64,
        }
    }
}

/// Top-level retriever configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrieverConfig {
    pub corpus_dir: PathBuf,
    pub index_dir: PathBuf,
    /// Extension (without dot) of the documents to ingest
    pub document_extension: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub report_path: PathBuf,
    /// Rebuild the index on first use even if one is persisted
    pub force_rebuild: bool,
    pub embedding: EmbeddingConfig,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            corpus_dir: PathBuf::from(DEFAULT_CORPUS_DIR),
            index_dir: PathBuf::from(DEFAULT_INDEX_DIR),
            document_extension: DEFAULT_EXTENSION.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            top_k: DEFAULT_TOP_K,
            report_path: PathBuf::from(DEFAULT_REPORT_PATH),
            force_rebuild: false,
            embedding: EmbeddingConfig::default(),
        }
    }
}

impl RetrieverConfig {
    /// Read a config file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: RetrieverConfig = serde_json::from_str(&content)?;
        debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    /// Resolve configuration: explicit file, then the per-user file, then defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match default_config_path() {
            Some(path) if path.is_file() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn chunker(&self) -> ChunkerConfig {
        ChunkerConfig {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunker()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.top_k == 0 {
            return Err(ConfigError::Invalid("topK must be positive".to_string()));
        }
        if self.document_extension.trim().is_empty() {
            return Err(ConfigError::Invalid("documentExtension must not be empty".to_string()));
        }
        if self.embedding.batch_size == 0 {
            return Err(ConfigError::Invalid("embedding.batchSize must be positive".to_string()));
        }
        if self.embedding.model.trim().is_empty() {
            return Err(ConfigError::Invalid("embedding.model must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Per-user config location, e.g. `~/.config/docseek/config.json`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}
