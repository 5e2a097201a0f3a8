//! Embeddings index configuration.
//!
//! A plain serde record: building one has no side effects, it only takes
//! effect when handed to [`crate::embeddings::Embeddings::new`].

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::settings::{Settings, StorageType};
use crate::error::{Error, Result};

/// Content path meaning "keep the SQLite database in memory"
pub const MEMORY_CONTENT_PATH: &str = ":memory:";

/// Vector backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Exact scan over every stored vector
    #[default]
    Flat,
}

/// Term scoring method
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringMethod {
    #[default]
    Bm25,
}

/// Blend weights for hybrid search
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HybridWeights {
    /// Weight of the semantic (vector) score
    pub hybrid: f32,
    /// Weight of the BM25 term score
    pub terms: f32,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            hybrid: 0.7,
            terms: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub method: ScoringMethod,
    /// Maintain the term index
    pub terms: bool,
    /// Scale term scores into 0..=1 per query
    pub normalize: bool,
    pub weights: HybridWeights,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            method: ScoringMethod::Bm25,
            terms: true,
            normalize: true,
            weights: HybridWeights::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    /// Google Cloud Storage
    Gcs,
    /// Directory on the local filesystem standing in for a bucket
    Local,
}

/// Cloud persistence target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudConfig {
    pub provider: CloudProvider,
    /// Bucket name (gcs) or root directory (local)
    pub container: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingsConfig {
    /// Model identifier
    pub path: String,
    /// Store document text (required for SQL queries)
    pub content: bool,
    /// `:memory:` or a SQLite file path
    pub contentpath: String,
    pub backend: Backend,
    /// Blend BM25 term scores into default searches
    pub hybrid: bool,
    /// L2-normalize vectors
    pub normalize: bool,
    pub scoring: ScoringConfig,
    pub batch: usize,
    pub dimensions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud: Option<CloudConfig>,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            path: Settings::default().embeddings_model,
            content: true,
            contentpath: MEMORY_CONTENT_PATH.to_string(),
            backend: Backend::Flat,
            hybrid: true,
            normalize: true,
            scoring: ScoringConfig::default(),
            batch: 32,
            dimensions: 384,
            cloud: None,
        }
    }
}

impl EmbeddingsConfig {
    /// Build the configuration for the storage type selected in settings
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        if let Some(file) = &settings.embeddings_config {
            return Self::from_yaml_file(file);
        }

        let base = Self {
            path: settings.embeddings_model.clone(),
            batch: settings.embeddings_batch_size,
            ..Self::default()
        };

        let config = match settings.embeddings_storage_type {
            StorageType::Memory => Self {
                contentpath: MEMORY_CONTENT_PATH.to_string(),
                batch: 100,
                ..base
            },
            StorageType::Sqlite => Self {
                contentpath: settings.embeddings_content_path.clone(),
                batch: 1000,
                ..base
            },
            StorageType::Cloud => {
                let bucket = settings
                    .google_cloud_bucket
                    .clone()
                    .filter(|_| settings.has_cloud_credentials())
                    .ok_or_else(|| {
                        Error::Config(
                            "cloud storage selected but GOOGLE_CLOUD_BUCKET is not configured"
                                .to_string(),
                        )
                    })?;
                Self {
                    contentpath: settings.embeddings_content_path.clone(),
                    batch: 500,
                    cloud: Some(CloudConfig {
                        provider: CloudProvider::Gcs,
                        container: bucket,
                        prefix: settings.embeddings_prefix.clone(),
                    }),
                    ..base
                }
            }
        };

        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn is_memory(&self) -> bool {
        self.contentpath == MEMORY_CONTENT_PATH
    }

    /// Reject configurations the index cannot be built from
    pub fn validate(&self) -> Result<()> {
        if self.dimensions == 0 || self.dimensions % 2 != 0 {
            return Err(Error::Config(format!(
                "dimensions must be a positive even number, got {}",
                self.dimensions
            )));
        }
        if self.batch == 0 {
            return Err(Error::Config("batch must be at least 1".to_string()));
        }
        if self.contentpath.trim().is_empty() {
            return Err(Error::Config("contentpath must not be empty".to_string()));
        }

        let weights = self.scoring.weights;
        if weights.hybrid < 0.0 || weights.terms < 0.0 || weights.hybrid + weights.terms <= 0.0 {
            return Err(Error::Config(format!(
                "scoring weights must be non-negative with a positive sum, got hybrid={} terms={}",
                weights.hybrid, weights.terms
            )));
        }
        if self.hybrid && !self.scoring.terms {
            return Err(Error::Config(
                "hybrid search requires `scoring.terms: true`".to_string(),
            ));
        }

        if let Some(cloud) = &self.cloud {
            if cloud.container.trim().is_empty() {
                return Err(Error::Config("cloud container must not be empty".to_string()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_preset() {
        let config = EmbeddingsConfig::from_settings(&Settings::default()).unwrap();
        assert!(config.is_memory());
        assert_eq!(config.batch, 100);
        assert!(config.hybrid);
        assert!(config.content);
        assert_eq!(config.scoring.weights, HybridWeights { hybrid: 0.7, terms: 0.3 });
        assert!(config.cloud.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_sqlite_preset() {
        let settings = Settings {
            embeddings_storage_type: StorageType::Sqlite,
            embeddings_content_path: "data/content.db".to_string(),
            ..Settings::default()
        };
        let config = EmbeddingsConfig::from_settings(&settings).unwrap();
        assert_eq!(config.contentpath, "data/content.db");
        assert_eq!(config.batch, 1000);
    }

    #[test]
    fn test_cloud_preset_requires_bucket() {
        let settings = Settings {
            embeddings_storage_type: StorageType::Cloud,
            ..Settings::default()
        };
        let err = EmbeddingsConfig::from_settings(&settings).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let settings = Settings {
            embeddings_storage_type: StorageType::Cloud,
            google_cloud_bucket: Some("bucket".to_string()),
            embeddings_prefix: Some("prod".to_string()),
            ..Settings::default()
        };
        let config = EmbeddingsConfig::from_settings(&settings).unwrap();
        assert_eq!(config.batch, 500);
        assert_eq!(
            config.cloud,
            Some(CloudConfig {
                provider: CloudProvider::Gcs,
                container: "bucket".to_string(),
                prefix: Some("prod".to_string()),
            })
        );
    }

    #[test]
    fn test_yaml_config() {
        let config = EmbeddingsConfig::from_yaml(
            r#"
path: custom/model
hybrid: false
dimensions: 64
scoring:
  terms: true
  weights:
    hybrid: 0.5
    terms: 0.5
cloud:
  provider: local
  container: /tmp/bucket
"#,
        )
        .unwrap();
        assert_eq!(config.path, "custom/model");
        assert!(!config.hybrid);
        assert_eq!(config.dimensions, 64);
        assert_eq!(config.scoring.method, ScoringMethod::Bm25);
        assert_eq!(config.scoring.weights.terms, 0.5);
        assert_eq!(config.cloud.unwrap().provider, CloudProvider::Local);
    }

    #[test]
    fn test_unknown_backend_rejected() {
        assert!(EmbeddingsConfig::from_yaml("backend: faiss\n").is_err());
    }

    #[test]
    fn test_validation() {
        let odd = EmbeddingsConfig {
            dimensions: 7,
            ..EmbeddingsConfig::default()
        };
        assert!(odd.validate().is_err());

        let no_terms = EmbeddingsConfig {
            scoring: ScoringConfig {
                terms: false,
                ..ScoringConfig::default()
            },
            ..EmbeddingsConfig::default()
        };
        assert!(no_terms.validate().is_err());

        let zero_weights = EmbeddingsConfig {
            scoring: ScoringConfig {
                weights: HybridWeights { hybrid: 0.0, terms: 0.0 },
                ..ScoringConfig::default()
            },
            ..EmbeddingsConfig::default()
        };
        assert!(zero_weights.validate().is_err());

        let zero_batch = EmbeddingsConfig {
            batch: 0,
            ..EmbeddingsConfig::default()
        };
        assert!(zero_batch.validate().is_err());
    }
}
