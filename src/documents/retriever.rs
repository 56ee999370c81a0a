//! Document Retrieval
//!
//! [`RetrievalEngine`] owns the build-or-load decision and answers top-k
//! queries. On first use it loads the persisted index if the index directory
//! exists; otherwise it runs load → chunk → embed → build → persist. The
//! decision is made once per engine: a corpus that changes afterwards is not
//! detected, and the persisted index keeps being served until it is removed
//! or rebuilt explicitly with [`RetrievalEngine::rebuild`] / `force_rebuild`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::chunker::{split_pages, ChunkerError, Passage};
use super::embeddings::{
    build_embedder, CachedEmbedder, Embedding, EmbeddingError, EmbeddingModel, DEFAULT_CACHE_SIZE,
};
use super::index::{index_exists, IndexError, SearchHit, VectorIndex};
use super::loader::{load_pages, LoaderError};
use crate::config::{ConfigError, RetrieverConfig};

#[derive(Error, Debug)]
pub enum RetrieverError {
    #[error("Loader error: {0}")]
    Loader(#[from] LoaderError),
    #[error("Chunker error: {0}")]
    Chunker(#[from] ChunkerError),
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error("Index error: {0}")]
    Index(#[from] IndexError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    #[error("Index not initialized")]
    NotInitialized,
}

impl Serialize for RetrieverError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// How the engine obtained its index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexOrigin {
    /// Read from the persisted index directory
    Loaded,
    /// Built from the corpus and persisted
    Built,
}

/// Summary of the engine's current index
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub index_dir: String,
    pub origin: IndexOrigin,
    pub model_id: String,
    pub dimension: usize,
    pub passages: usize,
    pub documents: usize,
    pub built_at: DateTime<Utc>,
}

enum EngineState {
    Uninitialized,
    Ready { index: VectorIndex, origin: IndexOrigin },
}

/// Build-or-load retrieval over a document corpus
pub struct RetrievalEngine {
    config: RetrieverConfig,
    embedder: CachedEmbedder<Box<dyn EmbeddingModel>>,
    state: EngineState,
}

impl RetrievalEngine {
    pub fn new(config: RetrieverConfig, embedder: Box<dyn EmbeddingModel>) -> Result<Self, RetrieverError> {
        config.validate()?;
        Ok(Self {
            config,
            embedder: CachedEmbedder::new(embedder, DEFAULT_CACHE_SIZE),
            state: EngineState::Uninitialized,
        })
    }

    /// Engine with the embedding provider selected by `config.embedding`.
    pub fn from_config(config: RetrieverConfig) -> Result<Self, RetrieverError> {
        let embedder = build_embedder(&config.embedding)?;
        Self::new(config, embedder)
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, EngineState::Ready { .. })
    }

    /// Load or build the index. Only the first call does any work.
    pub fn ensure_index(&mut self) -> Result<IndexOrigin, RetrieverError> {
        if let EngineState::Ready { origin, .. } = &self.state {
            return Ok(*origin);
        }

        let index_dir = &self.config.index_dir;
        let (index, origin) = if !self.config.force_rebuild && index_exists(index_dir) {
            info!(path = %index_dir.display(), "Found persisted index, loading");
            let index = VectorIndex::load(index_dir)?;
            self.check_compatible(&index)?;
            (index, IndexOrigin::Loaded)
        } else {
            if self.config.force_rebuild {
                info!(path = %index_dir.display(), "Forced rebuild requested");
            }
            (self.build_index()?, IndexOrigin::Built)
        };

        self.state = EngineState::Ready { index, origin };
        Ok(origin)
    }

    /// Rebuild from the corpus, replacing the persisted index.
    pub fn rebuild(&mut self) -> Result<IndexStats, RetrieverError> {
        let index = self.build_index()?;
        self.state = EngineState::Ready {
            index,
            origin: IndexOrigin::Built,
        };
        self.stats().ok_or(RetrieverError::NotInitialized)
    }

    /// Top-k passages for `query`, most similar first.
    pub fn retrieve(&mut self, query: &str, k: usize) -> Result<Vec<SearchHit>, RetrieverError> {
        if query.trim().is_empty() {
            return Err(RetrieverError::InvalidQuery("query is empty".to_string()));
        }
        if k == 0 {
            return Err(RetrieverError::InvalidQuery("k must be positive".to_string()));
        }

        self.ensure_index()?;
        let index = match &self.state {
            EngineState::Ready { index, .. } => index,
            EngineState::Uninitialized => return Err(RetrieverError::NotInitialized),
        };

        let vector = self.embedder.embed(query)?;
        let hits = index.search(&vector, k)?;

        debug!(k = k, hits = hits.len(), top_score = hits.first().map(|h| h.score), "Served query");
        Ok(hits)
    }

    /// [`retrieve`](Self::retrieve) with the configured `top_k`.
    pub fn retrieve_default(&mut self, query: &str) -> Result<Vec<SearchHit>, RetrieverError> {
        let k = self.config.top_k;
        self.retrieve(query, k)
    }

    pub fn stats(&self) -> Option<IndexStats> {
        let (index, origin) = match &self.state {
            EngineState::Ready { index, origin } => (index, *origin),
            EngineState::Uninitialized => return None,
        };

        let documents: BTreeSet<&str> = index.passages().map(|p| p.source.as_str()).collect();
        let manifest = index.manifest();

        Some(IndexStats {
            index_dir: self.config.index_dir.to_string_lossy().to_string(),
            origin,
            model_id: manifest.model_id.clone(),
            dimension: manifest.dimension,
            passages: index.len(),
            documents: documents.len(),
            built_at: manifest.built_at,
        })
    }

    fn build_index(&self) -> Result<VectorIndex, RetrieverError> {
        let pages = load_pages(&self.config.corpus_dir, &self.config.document_extension)?;
        let passages = split_pages(&pages, &self.config.chunker())?;
        let embeddings = self.embed_passages(&passages)?;

        let index = VectorIndex::build(passages, embeddings, self.embedder.model_id())?;
        // Never persist an index the next load would reject
        self.check_compatible(&index)?;
        index.persist(&self.config.index_dir)?;
        Ok(index)
    }

    /// Embed passages in configured batches, bypassing the query cache.
    fn embed_passages(&self, passages: &[Passage]) -> Result<Vec<Embedding>, RetrieverError> {
        let batch_size = self.config.embedding.batch_size;
        let mut embeddings = Vec::with_capacity(passages.len());

        for batch in passages.chunks(batch_size) {
            let texts: Vec<&str> = batch.iter().map(|p| p.text.as_str()).collect();
            embeddings.extend(self.embedder.inner().embed_batch(&texts)?);
            debug!(done = embeddings.len(), total = passages.len(), "Embedding passages");
        }

        info!(count = embeddings.len(), model = %self.embedder.model_id(), "Embedded passages");
        Ok(embeddings)
    }

    /// A loaded index must match the embedder's output size. A differing
    /// model id is only worth a warning: ids are free-form labels.
    fn check_compatible(&self, index: &VectorIndex) -> Result<(), RetrieverError> {
        if let Some(dim) = self.embedder.dimension() {
            if dim != index.dimension() {
                return Err(IndexError::CorruptOrIncompatible(format!(
                    "index dimension {} does not match embedding model dimension {}",
                    index.dimension(),
                    dim
                ))
                .into());
            }
        }

        let model_id = &index.manifest().model_id;
        if model_id != self.embedder.model_id() {
            warn!(
                index_model = %model_id,
                configured_model = %self.embedder.model_id(),
                "Index was built with a different embedding model"
            );
        }
        Ok(())
    }
}
