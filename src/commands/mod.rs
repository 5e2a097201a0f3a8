pub mod ask;
pub mod delete;
pub mod index;
pub mod search;
pub mod serve;
pub mod status;

use anyhow::{Context, Result};

use embeddings_service::config::Settings;
use embeddings_service::services::EmbeddingsService;

/// Open the index the settings describe, loading the saved copy if any
fn open_service(settings: Settings) -> Result<EmbeddingsService> {
    EmbeddingsService::from_settings(settings).context("Failed to open embeddings index")
}
