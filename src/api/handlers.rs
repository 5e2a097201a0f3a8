use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use super::AppState;
use crate::embeddings::SearchResult;
use crate::services::query::DEFAULT_LIMIT;
use crate::services::rag::{DEFAULT_CONTEXT_LIMIT, DEFAULT_TEMPERATURE};
use crate::services::{Document, RagAnswer, RagService};

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct BatchSearchRequest {
    pub queries: Vec<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SimilarityRequest {
    pub query: String,
    pub texts: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RagRequest {
    #[serde(alias = "query")]
    pub question: String,
    #[serde(default = "default_context_limit")]
    pub limit: usize,
    #[serde(default)]
    pub min_score: f32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_context_limit() -> usize {
    DEFAULT_CONTEXT_LIMIT
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

#[derive(Debug, Deserialize)]
pub struct TextParams {
    pub text: String,
}

/// Position of a text in the request and its score
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct SimilarityScore {
    pub id: usize,
    pub score: f32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub count: Option<usize>,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let count = state.run(|service| service.count()).await.ok();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        count,
    })
}

/// Stage documents for the next `/index` or `/upsert`
pub async fn add(
    State(state): State<AppState>,
    Json(documents): Json<Vec<Document>>,
) -> Result<Json<usize>, ApiError> {
    let staged = state.run(move |service| service.stage(&documents)).await?;
    Ok(Json(staged))
}

pub async fn index(State(state): State<AppState>) -> Result<Json<usize>, ApiError> {
    Ok(Json(state.run(|service| service.index_staged()).await?))
}

pub async fn upsert(State(state): State<AppState>) -> Result<Json<usize>, ApiError> {
    Ok(Json(state.run(|service| service.upsert_staged()).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    Json(ids): Json<Vec<String>>,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.run(move |service| service.delete_documents(&ids)).await?))
}

pub async fn search_get(
    State(state): State<AppState>,
    Query(request): Query<SearchRequest>,
) -> Result<Json<Vec<SearchResult>>, ApiError> {
    search(state, request).await
}

pub async fn search_post(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<Vec<SearchResult>>, ApiError> {
    search(state, request).await
}

async fn search(state: AppState, request: SearchRequest) -> Result<Json<Vec<SearchResult>>, ApiError> {
    let limit = request.limit.unwrap_or(DEFAULT_LIMIT);
    let results = state
        .run(move |service| service.embeddings_mut()?.search(&request.query, limit))
        .await?;
    Ok(Json(results))
}

pub async fn batch_search(
    State(state): State<AppState>,
    Json(request): Json<BatchSearchRequest>,
) -> Result<Json<Vec<Vec<SearchResult>>>, ApiError> {
    let limit = request.limit.unwrap_or(DEFAULT_LIMIT);
    let results = state
        .run(move |service| service.embeddings_mut()?.batch_search(&request.queries, limit))
        .await?;
    Ok(Json(results))
}

pub async fn similarity(
    State(state): State<AppState>,
    Json(request): Json<SimilarityRequest>,
) -> Result<Json<Vec<SimilarityScore>>, ApiError> {
    let scores = state
        .run(move |service| Ok(service.embeddings()?.similarity(&request.query, &request.texts)))
        .await?;
    Ok(Json(
        scores
            .into_iter()
            .map(|(id, score)| SimilarityScore { id, score })
            .collect(),
    ))
}

pub async fn transform(
    State(state): State<AppState>,
    Query(params): Query<TextParams>,
) -> Result<Json<Vec<f32>>, ApiError> {
    let vector = state
        .run(move |service| Ok(service.embeddings()?.transform(&params.text)))
        .await?;
    Ok(Json(vector))
}

pub async fn count(State(state): State<AppState>) -> Result<Json<usize>, ApiError> {
    Ok(Json(state.run(|service| service.count()).await?))
}

pub async fn segment(
    State(state): State<AppState>,
    Query(params): Query<TextParams>,
) -> Json<Vec<String>> {
    Json(state.segmentation.segment(&params.text))
}

/// Answer a question from hybrid search context
pub async fn rag_query(
    State(state): State<AppState>,
    Json(request): Json<RagRequest>,
) -> Result<Json<RagAnswer>, ApiError> {
    let llm = state.llm.clone().ok_or_else(|| {
        ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "no language model configured, set an LLM API key",
        )
    })?;

    let answer = state
        .run(move |service| {
            let system_prompt = service.settings().rag_system_prompt.clone();
            let mut rag = RagService::new(service.query()?, llm.as_ref(), &system_prompt);
            rag.answer(
                &request.question,
                request.limit,
                request.min_score,
                request.temperature,
            )
        })
        .await?;
    Ok(Json(answer))
}
