//! Embeddings MCP Server implementation

use anyhow::Result;
use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::SharedService;
use crate::services::query::{DEFAULT_LIMIT, SQL_ROW_LIMIT};
use crate::services::{EmbeddingsService, QueryResult};

/// Upper bound on results per tool call
const MAX_LIMIT: usize = 100;

/// Parameters for embeddings_search tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchParams {
    /// Natural language search query
    #[schemars(description = "Natural language search query")]
    pub query: String,
    /// Maximum number of results to return (default: 10)
    #[schemars(description = "Maximum number of results (default: 10)")]
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

/// Parameters for embeddings_sql tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SqlParams {
    /// SELECT statement against the txtai table
    #[schemars(
        description = "SELECT statement over the txtai table (columns: id, text, tags, indexed_at, score). Filter metadata with tags LIKE '%\"key\": \"value\"%'; similar('query') ranks by meaning."
    )]
    pub statement: String,
    #[schemars(description = "Maximum rows (default: 1000)")]
    #[serde(default = "default_sql_limit")]
    pub limit: usize,
}

fn default_sql_limit() -> usize {
    SQL_ROW_LIMIT
}

/// Parameters for embeddings_similarity tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SimilarityParams {
    #[schemars(description = "Query text")]
    pub query: String,
    #[schemars(description = "Candidate texts to rank against the query")]
    pub texts: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SimilarityJson {
    id: usize,
    text: String,
    score: f32,
}

/// Embeddings MCP Service
#[derive(Clone)]
pub struct EmbeddingsMcp {
    service: SharedService,
    tool_router: ToolRouter<Self>,
}

impl EmbeddingsMcp {
    pub fn new(service: SharedService) -> Self {
        Self {
            service,
            tool_router: Self::tool_router(),
        }
    }

    /// Run `f` against the locked service on the blocking pool
    async fn with_service<F, T>(&self, f: F) -> Result<T, McpError>
    where
        F: FnOnce(&mut EmbeddingsService) -> crate::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let mut guard = self.service.clone().lock_owned().await;
        tokio::task::spawn_blocking(move || f(&mut *guard))
            .await
            .map_err(|e| McpError::internal_error(format!("Index task failed: {}", e), None))?
            .map_err(|e| {
                if e.is_client_error() {
                    McpError::invalid_params(e.to_string(), None)
                } else {
                    McpError::internal_error(e.to_string(), None)
                }
            })
    }
}

fn clamp(limit: usize, max: usize) -> usize {
    limit.clamp(1, max)
}

fn json_content<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let output = serde_json::to_string_pretty(value).map_err(|e| {
        McpError::internal_error(format!("JSON serialization failed: {}", e), None)
    })?;
    Ok(CallToolResult::success(vec![Content::text(output)]))
}

#[tool_router]
impl EmbeddingsMcp {
    /// Search the index by meaning (blended with BM25 when hybrid is enabled)
    #[tool(description = "Search the embeddings index. Returns documents ranked by semantic similarity (blended with keyword BM25 when hybrid search is enabled) with their parsed metadata.")]
    async fn embeddings_search(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, McpError> {
        let SearchParams { query, limit } = params.0;
        let limit = clamp(limit, MAX_LIMIT);

        let results: Vec<QueryResult> = self
            .with_service(move |service| {
                let results = service.embeddings_mut()?.search(&query, limit)?;
                Ok(results.into_iter().map(QueryResult::from).collect())
            })
            .await?;

        json_content(&results)
    }

    /// Run a read-only SQL statement
    #[tool(description = "Run a read-only SQL SELECT against the embeddings index table `txtai` (columns: id, text, tags, indexed_at, score). Metadata is JSON text in `tags`.")]
    async fn embeddings_sql(&self, params: Parameters<SqlParams>) -> Result<CallToolResult, McpError> {
        let SqlParams { statement, limit } = params.0;
        let limit = clamp(limit, SQL_ROW_LIMIT);

        let rows = self
            .with_service(move |service| {
                let rows = service.embeddings_mut()?.sql(&statement, limit)?;
                Ok(rows
                    .into_iter()
                    .map(|row| row.into_iter().collect::<serde_json::Map<_, _>>())
                    .collect::<Vec<_>>())
            })
            .await?;

        json_content(&rows)
    }

    /// Rank candidate texts against a query
    #[tool(description = "Score a list of texts against a query by semantic similarity, best first.")]
    async fn embeddings_similarity(
        &self,
        params: Parameters<SimilarityParams>,
    ) -> Result<CallToolResult, McpError> {
        let SimilarityParams { query, texts } = params.0;

        let scored = self
            .with_service(move |service| {
                let scores = service.embeddings()?.similarity(&query, &texts);
                Ok(scores
                    .into_iter()
                    .map(|(id, score)| SimilarityJson {
                        id,
                        text: texts[id].clone(),
                        score,
                    })
                    .collect::<Vec<_>>())
            })
            .await?;

        json_content(&scored)
    }

    /// Number of indexed documents
    #[tool(description = "Get the number of documents in the embeddings index and when it was last written.")]
    async fn embeddings_count(&self) -> Result<CallToolResult, McpError> {
        let stats = self
            .with_service(|service| service.embeddings()?.stats())
            .await?;

        json_content(&serde_json::json!({
            "count": stats.documents,
            "vectors": stats.vectors,
            "last_indexed": stats
                .last_indexed
                .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
                .map(|dt| dt.to_rfc3339()),
        }))
    }
}

#[tool_handler]
impl ServerHandler for EmbeddingsMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some(
                "Embeddings index MCP Server. Provides semantic, hybrid and SQL search over indexed documents.".to_string()
            ),
            ..Default::default()
        }
    }
}

/// Run the MCP server over stdio
pub async fn run_mcp_server(service: SharedService) -> Result<()> {
    use tokio::io::{stdin, stdout};

    info!("starting MCP server on stdio");
    let transport = (stdin(), stdout());
    let server = EmbeddingsMcp::new(service).serve(transport).await?;
    server.waiting().await?;

    Ok(())
}
