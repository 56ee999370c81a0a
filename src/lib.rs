// Docseek Library
// Exports core modules for use by the CLI binary

pub mod config;
pub mod documents;

// Re-export commonly used types for CLI
pub use config::{ConfigError, EmbeddingConfig, EmbeddingProvider, RetrieverConfig};
pub use documents::{
    IndexOrigin, IndexStats, Passage, RetrievalEngine, RetrieverError, SearchHit,
};
