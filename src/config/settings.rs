//! Process settings.
//!
//! Uses Figment to merge built-in defaults, an optional YAML file and the
//! plain (unprefixed) environment variables the deployment scripts export.

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// YAML settings file picked up from the working directory when present
pub const DEFAULT_SETTINGS_FILE: &str = "embeddings.yml";

/// Environment variables read into [`Settings`]
pub const ENV_KEYS: &[&str] = &[
    "HOST",
    "PORT",
    "LOG_LEVEL",
    "API_KEY",
    "EMBEDDINGS_MODEL",
    "EMBEDDINGS_STORAGE_TYPE",
    "EMBEDDINGS_CONTENT_PATH",
    "EMBEDDINGS_BATCH_SIZE",
    "EMBEDDINGS_INDEX_PATH",
    "EMBEDDINGS_CONFIG",
    "GOOGLE_CLOUD_BUCKET",
    "EMBEDDINGS_PREFIX",
    "GOOGLE_APPLICATION_CREDENTIALS",
    "GOOGLE_CREDENTIALS",
    "LLM_PROVIDER",
    "LLM_MODEL",
    "LLM_API_KEY",
    "LLM_BASE_URL",
    "ANTHROPIC_API_KEY",
    "RAG_SYSTEM_PROMPT",
];

/// Where document content lives while the process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Memory,
    Sqlite,
    Cloud,
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageType::Memory => write!(f, "memory"),
            StorageType::Sqlite => write!(f, "sqlite"),
            StorageType::Cloud => write!(f, "cloud"),
        }
    }
}

/// Chat completion API used to answer `/rag/query`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Anthropic,
    Openai,
}

impl LlmProvider {
    pub fn default_model(self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "claude-3-5-sonnet-20240620",
            LlmProvider::Openai => "gpt-4o-mini",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "https://api.anthropic.com",
            LlmProvider::Openai => "https://api.openai.com",
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmProvider::Anthropic => write!(f, "anthropic"),
            LlmProvider::Openai => write!(f, "openai"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub api_key: Option<String>,
    pub embeddings_model: String,
    pub embeddings_storage_type: StorageType,
    pub embeddings_content_path: String,
    pub embeddings_batch_size: usize,
    /// Index location loaded at startup and rewritten after every change
    pub embeddings_index_path: Option<String>,
    /// Full `EmbeddingsConfig` YAML, replaces the storage presets
    pub embeddings_config: Option<PathBuf>,
    pub google_cloud_bucket: Option<String>,
    pub embeddings_prefix: Option<String>,
    pub google_application_credentials: Option<PathBuf>,
    pub google_credentials: Option<PathBuf>,
    pub llm_provider: LlmProvider,
    /// Overrides the provider's default model
    pub llm_model: Option<String>,
    /// Key for the OpenAI provider
    pub llm_api_key: Option<String>,
    /// Overrides the provider's API endpoint
    pub llm_base_url: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub rag_system_prompt: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            log_level: "info".to_string(),
            api_key: None,
            embeddings_model: "sentence-transformers/nli-mpnet-base-v2".to_string(),
            embeddings_storage_type: StorageType::Memory,
            embeddings_content_path: ":memory:".to_string(),
            embeddings_batch_size: 32,
            embeddings_index_path: None,
            embeddings_config: None,
            google_cloud_bucket: None,
            embeddings_prefix: None,
            google_application_credentials: None,
            google_credentials: None,
            llm_provider: LlmProvider::Anthropic,
            llm_model: None,
            llm_api_key: None,
            llm_base_url: None,
            anthropic_api_key: None,
            rag_system_prompt: "You are a helpful AI assistant.".to_string(),
        }
    }
}

impl Settings {
    /// Build the layered figment without extracting it
    pub fn figment(settings_file: Option<&Path>) -> Figment {
        let file = settings_file
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));

        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Yaml::file(file))
            .merge(Env::raw().only(ENV_KEYS))
    }

    /// Load settings: defaults, then YAML file, then environment
    pub fn load(settings_file: Option<&Path>) -> Result<Self> {
        Self::figment(settings_file)
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// API key, treating an empty variable as unset
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }

    pub fn has_cloud_credentials(&self) -> bool {
        self.google_cloud_bucket
            .as_deref()
            .is_some_and(|b| !b.trim().is_empty())
    }

    /// Credential file, `GOOGLE_APPLICATION_CREDENTIALS` first
    pub fn credentials_path(&self) -> Option<&Path> {
        self.google_application_credentials
            .as_deref()
            .or(self.google_credentials.as_deref())
    }

    /// Key for the configured LLM provider, treating an empty variable as unset
    pub fn llm_key(&self) -> Option<&str> {
        let key = match self.llm_provider {
            LlmProvider::Anthropic => self.anthropic_api_key.as_deref(),
            LlmProvider::Openai => self.llm_api_key.as_deref(),
        };
        key.filter(|k| !k.trim().is_empty())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.port, 8000);
        assert_eq!(settings.embeddings_storage_type, StorageType::Memory);
        assert_eq!(settings.embeddings_content_path, ":memory:");
        assert!(settings.api_key().is_none());
        assert!(!settings.has_cloud_credentials());
    }

    #[test]
    fn test_env_overrides() {
        Jail::expect_with(|jail| {
            jail.set_env("API_KEY", "secret-token");
            jail.set_env("PORT", "9090");
            jail.set_env("EMBEDDINGS_STORAGE_TYPE", "cloud");
            jail.set_env("GOOGLE_CLOUD_BUCKET", "my-bucket");
            jail.set_env("EMBEDDINGS_PREFIX", "indexes/prod");

            let settings = Settings::load(None).map_err(|e| e.to_string())?;
            assert_eq!(settings.api_key(), Some("secret-token"));
            assert_eq!(settings.port, 9090);
            assert_eq!(settings.embeddings_storage_type, StorageType::Cloud);
            assert!(settings.has_cloud_credentials());
            assert_eq!(settings.embeddings_prefix.as_deref(), Some("indexes/prod"));
            Ok(())
        });
    }

    #[test]
    fn test_yaml_file_then_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                DEFAULT_SETTINGS_FILE,
                "embeddings_model: local/model\nembeddings_batch_size: 64\nport: 7000\n",
            )?;
            jail.set_env("PORT", "7100");

            let settings = Settings::load(None).map_err(|e| e.to_string())?;
            assert_eq!(settings.embeddings_model, "local/model");
            assert_eq!(settings.embeddings_batch_size, 64);
            assert_eq!(settings.port, 7100);
            Ok(())
        });
    }

    #[test]
    fn test_empty_api_key_is_unset() {
        let settings = Settings {
            api_key: Some("  ".to_string()),
            ..Settings::default()
        };
        assert!(settings.api_key().is_none());
    }

    #[test]
    fn test_llm_key_follows_provider() {
        Jail::expect_with(|jail| {
            jail.set_env("ANTHROPIC_API_KEY", "sk-ant");
            jail.set_env("LLM_API_KEY", "sk-openai");

            let settings = Settings::load(None).map_err(|e| e.to_string())?;
            assert_eq!(settings.llm_provider, LlmProvider::Anthropic);
            assert_eq!(settings.llm_key(), Some("sk-ant"));

            jail.set_env("LLM_PROVIDER", "openai");
            let settings = Settings::load(None).map_err(|e| e.to_string())?;
            assert_eq!(settings.llm_key(), Some("sk-openai"));
            assert_eq!(settings.llm_provider.default_model(), "gpt-4o-mini");
            Ok(())
        });
    }

    #[test]
    fn test_credentials_precedence() {
        let settings = Settings {
            google_application_credentials: Some(PathBuf::from("/a.json")),
            google_credentials: Some(PathBuf::from("/b.json")),
            ..Settings::default()
        };
        assert_eq!(settings.credentials_path(), Some(Path::new("/a.json")));
    }
}
