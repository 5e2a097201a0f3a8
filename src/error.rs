//! Error type shared by the index, services and persistence layers.

use thiserror::Error;

/// Errors raised by the embeddings index and the services wrapping it
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration rejected at construction time
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Service used before `create_index`
    #[error("no embeddings index created, call create_index first")]
    NotInitialized,

    /// SQL needs stored content
    #[error("content storage is disabled, SQL queries require `content: true`")]
    ContentDisabled,

    /// Statement rejected before or during execution
    #[error("invalid SQL query: {0}")]
    Sql(String),

    /// Nothing persisted at the requested location
    #[error("index not found at {0}")]
    IndexNotFound(String),

    /// Persisted artifact could not be decoded
    #[error("corrupt index artifact `{artifact}`: {reason}")]
    Corrupt { artifact: String, reason: String },

    /// Object store failure (auth, transport, unexpected status)
    #[error("cloud storage error: {0}")]
    Cloud(String),

    /// Chat completion request failed or returned nothing usable
    #[error("language model error: {0}")]
    Llm(String),

    #[error(transparent)]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// True when the caller sent something unusable rather than the server failing
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::ContentDisabled | Error::Sql(_) | Error::IndexNotFound(_)
        )
    }
}

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, Error>;
