//! Configuration: process settings and the embeddings index record

pub mod embeddings;
pub mod settings;

pub use embeddings::{
    Backend, CloudConfig, CloudProvider, EmbeddingsConfig, HybridWeights, ScoringConfig,
    ScoringMethod, MEMORY_CONTENT_PATH,
};
pub use settings::{LlmProvider, Settings, StorageType};
