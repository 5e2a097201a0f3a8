//! HTTP API
//!
//! One `EmbeddingsService` behind a tokio mutex is shared by every handler.
//! Operations are serialized and run on the blocking pool since SQLite and
//! cloud persistence block.

pub mod auth;
pub mod error;
pub mod handlers;

use anyhow::Context;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Settings;
use crate::pipeline::Segmentation;
use crate::services::{EmbeddingsService, HttpLlm, Llm};
pub use error::ApiError;

/// Shared handle to the index service
pub type SharedService = Arc<Mutex<EmbeddingsService>>;

#[derive(Clone)]
pub struct AppState {
    pub service: SharedService,
    pub api_key: Arc<str>,
    pub segmentation: Segmentation,
    /// Answers `/rag/query`; the route returns 503 without one
    pub llm: Option<Arc<dyn Llm>>,
}

impl AppState {
    pub fn new(service: SharedService, api_key: &str) -> Self {
        Self {
            service,
            api_key: Arc::from(api_key),
            segmentation: Segmentation::sentences(),
            llm: None,
        }
    }

    pub fn with_llm(mut self, llm: Option<Arc<dyn Llm>>) -> Self {
        self.llm = llm;
        self
    }

    /// Run `f` with exclusive access to the service on the blocking pool
    pub async fn run<F, T>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&mut EmbeddingsService) -> crate::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let mut guard = self.service.clone().lock_owned().await;
        let result = tokio::task::spawn_blocking(move || f(&mut *guard)).await?;
        Ok(result?)
    }
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/add", post(handlers::add))
        .route("/index", get(handlers::index))
        .route("/upsert", get(handlers::upsert))
        .route("/delete", post(handlers::delete))
        .route("/search", get(handlers::search_get).post(handlers::search_post))
        .route("/batchsearch", post(handlers::batch_search))
        .route("/similarity", post(handlers::similarity))
        .route("/transform", get(handlers::transform))
        .route("/count", get(handlers::count))
        .route("/segment", get(handlers::segment))
        .route("/rag/query", post(handlers::rag_query))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Serve until ctrl-c; refuses to start without an API key
pub async fn serve(settings: &Settings, service: SharedService) -> anyhow::Result<()> {
    let api_key = settings
        .api_key()
        .context("API_KEY must be set to start the HTTP server")?;

    let llm = HttpLlm::from_settings(settings).context("Failed to create LLM client")?;
    match &llm {
        Some(llm) => info!("answering /rag/query with {} ({})", llm.provider(), llm.model()),
        None => warn!("no {} API key configured, /rag/query is disabled", settings.llm_provider),
    }
    let llm = llm.map(|llm| Arc::new(llm) as Arc<dyn Llm>);

    let app = router(AppState::new(service, api_key).with_llm(llm));
    let address = settings.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;

    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
