//! MCP Server for the embeddings index
//!
//! Exposes search, SQL, similarity and count tools over stdio.

mod server;

pub use server::{run_mcp_server, EmbeddingsMcp};
