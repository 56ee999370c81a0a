//! Embedding Models
//!
//! The retrieval engine only talks to [`EmbeddingModel`]. Providers:
//! - [`FeatureHashEmbedder`]: local feature hashing. Each token is hashed
//!   to a fixed bucket and the term-frequency vector is L2-normalised, so the
//!   same text always yields the same vector without any vocabulary state.
//! - [`OpenAiEmbedder`](super::openai::OpenAiEmbedder): OpenAI-compatible HTTP
//!   endpoints.
//!
//! [`CachedEmbedder`] memoises query embeddings in front of any provider.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

use super::openai::OpenAiEmbedder;
use crate::config::{EmbeddingConfig, EmbeddingProvider};

/// Default dimensionality of feature-hash vectors.
pub const DEFAULT_HASH_DIM: usize = 256;

/// Default capacity of the query embedding cache.
pub const DEFAULT_CACHE_SIZE: usize = 1024;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Invalid embedding config: {0}")]
    InvalidConfig(String),
    #[error("Missing API key: environment variable {0} is not set")]
    MissingApiKey(String),
    #[error("Embedding HTTP error: {0}")]
    Http(String),
    #[error("Malformed embedding response: {0}")]
    MalformedResponse(String),
}

impl Serialize for EmbeddingError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(e: reqwest::Error) -> Self {
        EmbeddingError::Http(e.to_string())
    }
}

/// Embedding vector
pub type Embedding = Vec<f32>;

/// Maps text to a fixed-dimensionality vector. Implementations must be
/// deterministic: the same text always produces the same vector.
pub trait EmbeddingModel {
    /// Identifier recorded in the index manifest
    fn model_id(&self) -> &str;

    /// Output dimension, when known before the first call
    fn dimension(&self) -> Option<usize>;

    fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError>;

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, EmbeddingError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

impl<M: EmbeddingModel + ?Sized> EmbeddingModel for Box<M> {
    fn model_id(&self) -> &str {
        (**self).model_id()
    }

    fn dimension(&self) -> Option<usize> {
        (**self).dimension()
    }

    fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        (**self).embed(text)
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, EmbeddingError> {
        (**self).embed_batch(texts)
    }
}

/// Select the provider named in the config.
pub fn build_embedder(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingModel>, EmbeddingError> {
    match config.provider {
        EmbeddingProvider::FeatureHash => {
            let dim = config.dimension.unwrap_or(DEFAULT_HASH_DIM);
            Ok(Box::new(FeatureHashEmbedder::new(&config.model, dim)?))
        }
        EmbeddingProvider::OpenAi => Ok(Box::new(OpenAiEmbedder::from_config(config)?)),
    }
}

// ============ FEATURE HASHING ============

/// Offline embedder using the hashing trick
#[derive(Debug, Clone)]
pub struct FeatureHashEmbedder {
    model_id: String,
    dim: usize,
}

impl FeatureHashEmbedder {
    pub fn new(model_id: &str, dim: usize) -> Result<Self, EmbeddingError> {
        if dim == 0 {
            return Err(EmbeddingError::InvalidConfig("dimension must be positive".to_string()));
        }
        Ok(Self {
            model_id: model_id.to_string(),
            dim,
        })
    }

    /// Hash a token to a bucket index in `[0, dim)`.
    ///
    /// FNV-1a rather than `DefaultHasher`: persisted vectors must match
    /// query vectors computed by any later build of the binary.
    fn bucket(&self, token: &str) -> usize {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in token.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        (hash % self.dim as u64) as usize
    }
}

impl EmbeddingModel for FeatureHashEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.dim)
    }

    fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let mut tf = vec![0.0f32; self.dim];

        let tokens = text
            .split_whitespace()
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|t| !t.is_empty());

        for token in tokens {
            tf[self.bucket(&token.to_lowercase())] += 1.0;
        }

        // L2 normalize
        let norm: f32 = tf.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut tf {
                *x /= norm;
            }
        }

        Ok(tf)
    }
}

// ============ QUERY CACHE ============

/// Bounded memo of embeddings keyed by the embedded text
struct EmbeddingCache {
    entries: HashMap<String, Embedding>,
    max_size: usize,
}

impl EmbeddingCache {
    fn new(max_size: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(max_size.min(DEFAULT_CACHE_SIZE)),
            max_size,
        }
    }

    fn insert(&mut self, key: String, embedding: Embedding) {
        // At capacity: drop half the entries
        if self.entries.len() >= self.max_size {
            let evict: Vec<_> = self.entries.keys().take(self.max_size / 2 + 1).cloned().collect();
            for key in evict {
                self.entries.remove(&key);
            }
        }
        self.entries.insert(key, embedding);
    }
}

/// Caches embeddings of repeated texts (typically queries) in front of a provider
pub struct CachedEmbedder<M> {
    inner: M,
    cache: RwLock<EmbeddingCache>,
}

impl<M: EmbeddingModel> CachedEmbedder<M> {
    pub fn new(inner: M, max_size: usize) -> Self {
        Self {
            inner,
            cache: RwLock::new(EmbeddingCache::new(max_size.max(1))),
        }
    }

    /// The wrapped provider, for bulk work that should bypass the cache
    pub fn inner(&self) -> &M {
        &self.inner
    }

    pub fn cached_len(&self) -> usize {
        self.cache.read().entries.len()
    }

    pub fn clear(&self) {
        self.cache.write().entries.clear();
    }
}

impl<M: EmbeddingModel> EmbeddingModel for CachedEmbedder<M> {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dimension(&self) -> Option<usize> {
        self.inner.dimension()
    }

    fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        if let Some(hit) = self.cache.read().entries.get(text) {
            debug!("Embedding cache hit");
            return Ok(hit.clone());
        }

        let embedding = self.inner.embed(text)?;
        self.cache.write().insert(text.to_string(), embedding.clone());
        Ok(embedding)
    }
}

/// Cosine similarity between two embeddings. Zero for mismatched, zero or
/// non-finite vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let similarity = dot / (norm_a * norm_b);
    // Overflowing components (inf / inf) carry no usable signal
    if similarity.is_finite() {
        similarity
    } else {
        0.0
    }
}
