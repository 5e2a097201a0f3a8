//! embeddings-service library
//!
//! Embeddings index with semantic, hybrid (BM25) and SQL search, persisted
//! locally or to a cloud bucket, and served over an authenticated HTTP API.
//!
//! # Modules
//!
//! - `embeddings`: the index (vectors, flat ANN, SQLite content + FTS5)
//! - `services`: document indexer, query dispatcher and RAG answers
//! - `config`: process settings and the index configuration record
//! - `cloud`: object stores for persisted indexes
//! - `api`: axum HTTP surface with bearer auth
//! - `pipeline`: text segmentation
//! - `mcp`: MCP server for agent integration

pub mod api;
pub mod cloud;
pub mod config;
pub mod embeddings;
pub mod error;
#[cfg(feature = "mcp")]
pub mod mcp;
pub mod pipeline;
pub mod services;

// Re-exports for convenience
pub use config::{EmbeddingsConfig, Settings, StorageType};
pub use embeddings::{Embeddings, IndexDocument, SearchResult};
pub use error::{Error, Result};
pub use services::{
    Document, EmbeddingsService, Query, QueryResult, QueryService, RagAnswer, RagService,
};
