//! Serve command - HTTP API (and the MCP stdio server)

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use embeddings_service::api;
use embeddings_service::config::Settings;

use super::open_service;

pub fn run(mut settings: Settings, host: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(host) = host {
        settings.host = host;
    }
    if let Some(port) = port {
        settings.port = port;
    }
    // Checked before the index is opened so a misconfigured server fails fast
    settings
        .api_key()
        .context("API_KEY must be set to start the HTTP server")?;

    let service = open_service(settings.clone())?;
    info!(
        "embeddings service ready ({} documents)",
        service.count().unwrap_or(0)
    );

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(api::serve(&settings, Arc::new(Mutex::new(service))))
}

#[cfg(feature = "mcp")]
pub fn run_mcp(settings: Settings) -> Result<()> {
    let service = open_service(settings)?;
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(embeddings_service::mcp::run_mcp_server(Arc::new(Mutex::new(service))))
}
