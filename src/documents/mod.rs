//! Document Retrieval Module
//!
//! Loads a document corpus, splits it into passages, embeds them, and serves
//! top-k similarity queries from a persisted index.

pub mod chunker;
pub mod embeddings;
pub mod index;
pub mod loader;
pub mod openai;
pub mod report;
pub mod retriever;

#[cfg(test)]
mod test_support;

// Re-export key public types
pub use chunker::{split_pages, split_text, ChunkerConfig, ChunkerError, Passage};
pub use embeddings::{
    build_embedder, cosine_similarity, CachedEmbedder, Embedding, EmbeddingError, EmbeddingModel,
    FeatureHashEmbedder,
};
pub use index::{index_exists, IndexError, IndexManifest, SearchHit, VectorIndex};
pub use loader::{discover_documents, load_pages, DocumentFormat, LoaderError, Page};
pub use openai::OpenAiEmbedder;
pub use report::{render_console, render_report, save_report, snippet};
pub use retriever::{IndexOrigin, IndexStats, RetrievalEngine, RetrieverError};
