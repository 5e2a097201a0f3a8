//! Document indexer
//!
//! Owns the process-wide index handle: created once via `create_index`,
//! mutated by add/stage/delete, persisted by save/load.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use tracing::{info, warn};

use super::query::QueryService;
use crate::config::{EmbeddingsConfig, Settings, StorageType};
use crate::embeddings::{Embeddings, IndexDocument};
use crate::error::{Error, Result};

/// Application document: metadata is stored JSON-encoded in the tags column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = metadata {
            self.metadata = Some(map);
        }
        self
    }

    fn to_index_document(&self) -> Result<IndexDocument> {
        let empty = serde_json::Map::new();
        Ok(IndexDocument {
            id: self.id.clone(),
            text: self.text.clone(),
            tags: Some(encode_tags(self.metadata.as_ref().unwrap_or(&empty))?),
        })
    }
}

/// JSON with `", "` and `": "` separators, so tag LIKE patterns written as
/// `'%"category": "tech"%'` match
struct SpacedFormatter;

impl serde_json::ser::Formatter for SpacedFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }
}

/// Encode metadata for the tags column
pub fn encode_tags(metadata: &serde_json::Map<String, serde_json::Value>) -> Result<String> {
    let mut buf = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, SpacedFormatter);
    metadata.serialize(&mut serializer)?;
    String::from_utf8(buf).map_err(|e| Error::Config(format!("non UTF-8 metadata: {}", e)))
}

pub struct EmbeddingsService {
    settings: Settings,
    embeddings: Option<Embeddings>,
    staged: Vec<IndexDocument>,
}

impl EmbeddingsService {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            embeddings: None,
            staged: Vec::new(),
        }
    }

    /// Build the service and create the index the settings describe
    ///
    /// When `EMBEDDINGS_INDEX_PATH` names a saved index, it is loaded.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let storage_type = settings.embeddings_storage_type;
        let content_path = settings.embeddings_content_path.clone();
        let mut service = Self::new(settings);
        service.create_index(storage_type, &content_path)?;

        if let Some(path) = service.settings.embeddings_index_path.clone() {
            let embeddings = service.embeddings_mut()?;
            if embeddings.exists(&path)? {
                embeddings.load(&path)?;
            } else {
                info!("no saved index at {}, starting empty", path);
            }
        }
        Ok(service)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Create a fresh index with the given storage configuration
    pub fn create_index(&mut self, storage_type: StorageType, content_path: &str) -> Result<()> {
        self.settings.embeddings_storage_type = storage_type;
        self.settings.embeddings_content_path = content_path.to_string();

        let config = EmbeddingsConfig::from_settings(&self.settings)?;
        info!("creating embeddings index with {} storage", storage_type);

        let credentials = self.settings.credentials_path().map(Path::to_path_buf);
        let embeddings = Embeddings::new(config)?.with_credentials(credentials);
        self.embeddings = Some(embeddings);
        self.staged.clear();
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.embeddings.is_some()
    }

    pub fn embeddings(&self) -> Result<&Embeddings> {
        self.embeddings.as_ref().ok_or(Error::NotInitialized)
    }

    pub fn embeddings_mut(&mut self) -> Result<&mut Embeddings> {
        self.embeddings.as_mut().ok_or(Error::NotInitialized)
    }

    /// Query dispatcher over this index
    pub fn query(&mut self) -> Result<QueryService<'_>> {
        Ok(QueryService::new(self.embeddings_mut()?))
    }

    /// Upsert documents immediately; returns the index size afterwards
    pub fn add_documents(&mut self, documents: &[Document]) -> Result<usize> {
        let converted = convert(documents)?;
        info!("adding {} documents to index", converted.len());

        let embeddings = self.embeddings_mut()?;
        embeddings.upsert(converted)?;
        let count = embeddings.count()?;
        self.persist();
        Ok(count)
    }

    /// Queue documents for the next `index_staged` / `upsert_staged`
    pub fn stage(&mut self, documents: &[Document]) -> Result<usize> {
        self.embeddings()?;
        self.staged.extend(convert(documents)?);
        Ok(self.staged.len())
    }

    pub fn staged(&self) -> usize {
        self.staged.len()
    }

    /// Rebuild the index from the staged documents
    pub fn index_staged(&mut self) -> Result<usize> {
        self.apply_staged(true)
    }

    /// Merge the staged documents into the index
    pub fn upsert_staged(&mut self) -> Result<usize> {
        self.apply_staged(false)
    }

    /// Staged documents stay queued when the write fails
    fn apply_staged(&mut self, rebuild: bool) -> Result<usize> {
        let embeddings = self.embeddings.as_mut().ok_or(Error::NotInitialized)?;
        let staged = std::mem::take(&mut self.staged);
        info!(
            "{} from {} staged documents",
            if rebuild { "rebuilding index" } else { "upserting" },
            staged.len()
        );

        let written = if rebuild {
            embeddings.index(staged.iter().cloned())
        } else {
            embeddings.upsert(staged.iter().cloned())
        };
        if let Err(e) = written {
            self.staged = staged;
            return Err(e);
        }

        let count = embeddings.count()?;
        self.persist();
        Ok(count)
    }

    pub fn delete_documents(&mut self, ids: &[String]) -> Result<Vec<String>> {
        let deleted = self.embeddings_mut()?.delete(ids)?;
        if !deleted.is_empty() {
            self.persist();
        }
        Ok(deleted)
    }

    pub fn count(&self) -> Result<usize> {
        self.embeddings()?.count()
    }

    pub fn save_index(&self, path: &str) -> Result<()> {
        info!("saving embeddings index to {}", path);
        self.embeddings()?.save(path)
    }

    pub fn load_index(&mut self, path: &str) -> Result<()> {
        info!("loading embeddings index from {}", path);
        self.embeddings_mut()?.load(path)
    }

    /// Save to `EMBEDDINGS_INDEX_PATH` when one is configured
    ///
    /// Runs after a write has been applied, so a failed save is logged and
    /// the write still reports success; the next successful save catches up.
    fn persist(&self) {
        if let Some(path) = &self.settings.embeddings_index_path {
            if let Err(e) = self.save_index(path) {
                warn!("failed to persist index to {}: {}", path, e);
            }
        }
    }
}

fn convert(documents: &[Document]) -> Result<Vec<IndexDocument>> {
    documents.iter().map(Document::to_index_document).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn docs() -> Vec<Document> {
        vec![
            Document::new(
                "doc1",
                "Machine learning models require significant computational resources",
            )
            .with_metadata(json!({"category": "tech", "tags": ["ML", "computing"], "priority": 1})),
            Document::new("doc2", "Natural language processing advances with transformer models")
                .with_metadata(json!({"category": "tech", "tags": ["NLP", "ML"], "priority": 2})),
            Document::new("doc3", "Slow cooked stews taste better the next day"),
        ]
    }

    fn service() -> EmbeddingsService {
        let mut service = EmbeddingsService::new(Settings::default());
        service.create_index(StorageType::Memory, ":memory:").unwrap();
        service
    }

    #[test]
    fn test_encode_tags_spacing() {
        let metadata = json!({"category": "tech", "tags": ["ML", "computing"]});
        let encoded = encode_tags(metadata.as_object().unwrap()).unwrap();
        assert_eq!(encoded, r#"{"category": "tech", "tags": ["ML", "computing"]}"#);
        assert_eq!(encode_tags(&serde_json::Map::new()).unwrap(), "{}");
    }

    #[test]
    fn test_requires_create_index() {
        let mut service = EmbeddingsService::new(Settings::default());
        assert!(!service.is_initialized());
        assert!(matches!(service.add_documents(&docs()), Err(Error::NotInitialized)));
        assert!(matches!(service.count(), Err(Error::NotInitialized)));
        assert!(matches!(service.save_index("/tmp/never"), Err(Error::NotInitialized)));
        assert!(matches!(service.stage(&docs()), Err(Error::NotInitialized)));
    }

    #[test]
    fn test_add_documents_stores_metadata_as_tags() {
        let mut service = service();
        assert_eq!(service.add_documents(&docs()).unwrap(), 3);

        let embeddings = service.embeddings().unwrap();
        let doc1 = embeddings.get("doc1").unwrap().unwrap();
        assert!(doc1.tags.unwrap().contains(r#""category": "tech""#));
        let doc3 = embeddings.get("doc3").unwrap().unwrap();
        assert_eq!(doc3.tags.as_deref(), Some("{}"));
    }

    #[test]
    fn test_staging() {
        let mut service = service();
        service.add_documents(&docs()).unwrap();

        assert_eq!(service.stage(&[Document::new("doc4", "staged text")]).unwrap(), 1);
        assert_eq!(service.count().unwrap(), 3);
        assert_eq!(service.upsert_staged().unwrap(), 4);
        assert_eq!(service.staged(), 0);

        service.stage(&[Document::new("only", "rebuild from this")]).unwrap();
        assert_eq!(service.index_staged().unwrap(), 1);
    }

    #[test]
    fn test_staged_documents_kept_when_write_fails() {
        let mut service = EmbeddingsService::new(Settings::default());
        service.staged.push(IndexDocument::from(("doc1", "queued text", "{}")));

        assert!(matches!(service.index_staged(), Err(Error::NotInitialized)));
        assert!(matches!(service.upsert_staged(), Err(Error::NotInitialized)));
        assert_eq!(service.staged(), 1);
    }

    #[test]
    fn test_failed_persist_keeps_write() {
        let dir = tempfile::tempdir().unwrap();
        // a regular file where the index directory should go
        let blocked = dir.path().join("index");
        std::fs::write(&blocked, b"not a directory").unwrap();
        let settings = Settings {
            embeddings_index_path: Some(blocked.to_string_lossy().to_string()),
            ..Settings::default()
        };

        let mut service = EmbeddingsService::new(settings);
        service.create_index(StorageType::Memory, ":memory:").unwrap();
        assert_eq!(service.add_documents(&docs()).unwrap(), 3);
        assert_eq!(service.delete_documents(&["doc1".to_string()]).unwrap().len(), 1);
        assert_eq!(service.count().unwrap(), 2);
    }

    #[test]
    fn test_delete_documents() {
        let mut service = service();
        service.add_documents(&docs()).unwrap();
        let deleted = service.delete_documents(&["doc2".to_string()]).unwrap();
        assert_eq!(deleted, vec!["doc2".to_string()]);
        assert_eq!(service.count().unwrap(), 2);
    }

    #[test]
    fn test_auto_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            embeddings_index_path: Some(dir.path().join("index").to_string_lossy().to_string()),
            ..Settings::default()
        };

        let mut service = EmbeddingsService::from_settings(settings.clone()).unwrap();
        assert_eq!(service.count().unwrap(), 0);
        service.add_documents(&docs()).unwrap();
        assert!(dir.path().join("index/config").is_file());

        let reloaded = EmbeddingsService::from_settings(settings).unwrap();
        assert_eq!(reloaded.count().unwrap(), 3);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved").to_string_lossy().to_string();

        let mut original = service();
        original.add_documents(&docs()).unwrap();
        let before = original.query().unwrap().semantic_search("machine learning", 1).unwrap();
        original.save_index(&path).unwrap();

        let mut fresh = service();
        fresh.load_index(&path).unwrap();
        let after = fresh.query().unwrap().semantic_search("machine learning", 1).unwrap();
        assert_eq!(before[0].id, after[0].id);
    }
}
