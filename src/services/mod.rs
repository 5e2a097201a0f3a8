//! Services wrapping the embeddings index
//!
//! - `embeddings`: document indexer owning the index handle
//! - `query`: semantic, SQL and hybrid query dispatch
//! - `rag`: answers built from hybrid search context and an LLM
//! - `llm`: chat completion clients

pub mod embeddings;
pub mod llm;
pub mod query;
pub mod rag;

pub use embeddings::{encode_tags, Document, EmbeddingsService};
pub use llm::{HttpLlm, Llm};
pub use query::{Query, QueryResult, QueryService};
pub use rag::{RagAnswer, RagService};
