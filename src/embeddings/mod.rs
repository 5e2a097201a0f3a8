//! Embeddings index - vector model, flat ANN backend and content database
//!
//! Semantic search scores the query vector against every stored vector,
//! hybrid search blends in BM25 from the FTS5 term table, and SQL runs
//! against the `txtai` view of the content database.

pub mod ann;
pub mod database;
pub mod scoring;
pub mod sql;
pub mod vectors;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::cloud;
use crate::config::EmbeddingsConfig;
use crate::error::{Error, Result};
use ann::{rank, FlatIndex};
use database::{Database, SqlRow};
use vectors::{cosine_similarity, HarmonicVectors, Vectors};

pub use database::DocumentRecord;

/// Artifacts written by [`Embeddings::save`]
pub const ARTIFACTS: [&str; 3] = ["config", "documents", "embeddings"];

/// Default candidate pool for `similar()` clauses per requested row
const SIMILAR_CANDIDATES_FACTOR: usize = 10;
const MIN_SIMILAR_CANDIDATES: usize = 100;

/// The (id, text, tags) triple the index consumes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub id: String,
    pub text: String,
    /// JSON-encoded metadata
    pub tags: Option<String>,
}

impl<I, T, G> From<(I, T, G)> for IndexDocument
where
    I: Into<String>,
    T: Into<String>,
    G: Into<String>,
{
    fn from((id, text, tags): (I, T, G)) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            tags: Some(tags.into()),
        }
    }
}

/// A search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    /// JSON-encoded metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    /// Extra columns selected by a SQL query
    #[serde(default, flatten, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SearchResult {
    /// Build from a SQL row; the row must carry an `id` column
    fn from_row(row: SqlRow) -> Result<Self> {
        let mut result = SearchResult {
            id: String::new(),
            text: None,
            score: None,
            tags: None,
            extra: serde_json::Map::new(),
        };
        let mut has_id = false;

        for (column, value) in row {
            match (column.as_str(), value) {
                ("id", serde_json::Value::String(id)) => {
                    result.id = id;
                    has_id = true;
                }
                ("id", serde_json::Value::Null) => {}
                ("id", other) => {
                    result.id = other.to_string();
                    has_id = true;
                }
                ("text", serde_json::Value::String(text)) => result.text = Some(text),
                ("tags", serde_json::Value::String(tags)) => result.tags = Some(tags),
                ("score", serde_json::Value::Number(n)) => result.score = n.as_f64().map(|s| s as f32),
                ("text" | "tags" | "score", serde_json::Value::Null) => {}
                (_, value) => {
                    result.extra.insert(column.clone(), value);
                }
            }
        }

        if !has_id {
            return Err(Error::Sql(
                "search queries must select an `id` column".to_string(),
            ));
        }
        Ok(result)
    }
}

/// Index statistics
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub documents: usize,
    pub vectors: usize,
    pub last_indexed: Option<i64>,
    /// When `index` last rebuilt everything
    pub last_full_index: Option<i64>,
}

/// Embeddings index
pub struct Embeddings {
    config: EmbeddingsConfig,
    vectors: HarmonicVectors,
    ann: FlatIndex,
    database: Database,
    credentials: Option<PathBuf>,
}

impl Embeddings {
    /// Validate `config` and open the content database it names
    ///
    /// A file-backed content database that already holds documents has its
    /// vectors rebuilt from the stored term text.
    pub fn new(config: EmbeddingsConfig) -> Result<Self> {
        config.validate()?;

        let vectors = HarmonicVectors::new(&config.path, config.dimensions, config.normalize);
        let database = open_database(&config)?;
        let mut embeddings = Self {
            ann: FlatIndex::new(config.dimensions),
            vectors,
            database,
            config,
            credentials: None,
        };

        if !embeddings.config.is_memory() {
            embeddings.rebuild_vectors()?;
        }

        info!(
            "embeddings index ready (model: {}, backend: {:?}, hybrid: {}, content: {})",
            embeddings.vectors.model(),
            embeddings.config.backend,
            embeddings.config.hybrid,
            embeddings.config.contentpath
        );
        Ok(embeddings)
    }

    /// Credential file used for cloud persistence
    pub fn with_credentials(mut self, credentials: Option<PathBuf>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn config(&self) -> &EmbeddingsConfig {
        &self.config
    }

    fn rebuild_vectors(&mut self) -> Result<()> {
        let texts = self.database.term_texts()?;
        if texts.is_empty() {
            return Ok(());
        }
        self.ann.clear();
        for chunk in texts.chunks(self.config.batch.max(1)) {
            let refs: Vec<&str> = chunk.iter().map(|(_, text)| text.as_str()).collect();
            let encoded = self.vectors.encode_batch(&refs);
            for ((id, _), vector) in chunk.iter().zip(encoded) {
                self.ann.upsert(id, &vector)?;
            }
        }
        info!("rebuilt {} vectors from stored content", self.ann.len());
        Ok(())
    }

    /// Replace the whole index with `documents`
    pub fn index<I, D>(&mut self, documents: I) -> Result<usize>
    where
        I: IntoIterator<Item = D>,
        D: Into<IndexDocument>,
    {
        self.database.clear()?;
        self.ann.clear();
        let count = self.upsert(documents)?;
        self.database
            .set_meta("last_full_index", &chrono::Utc::now().timestamp().to_string())?;
        Ok(count)
    }

    /// Insert `documents`, overwriting any existing entry with the same id
    ///
    /// When a call repeats an id, the last occurrence wins. Documents are
    /// encoded and written `config.batch` at a time, one transaction per batch.
    pub fn upsert<I, D>(&mut self, documents: I) -> Result<usize>
    where
        I: IntoIterator<Item = D>,
        D: Into<IndexDocument>,
    {
        let documents = dedup_last(documents.into_iter().map(Into::into).collect());
        if documents.is_empty() {
            return Ok(0);
        }

        let batches = documents.chunks(self.config.batch.max(1));
        let total = batches.len();
        for (n, batch) in batches.enumerate() {
            let texts: Vec<&str> = batch.iter().map(|d| d.text.as_str()).collect();
            let encoded = self.vectors.encode_batch(&texts);

            let rows: Vec<(String, String, Option<String>)> = batch
                .iter()
                .map(|d| (d.id.clone(), d.text.clone(), d.tags.clone()))
                .collect();
            self.database.upsert(&rows)?;

            for (document, vector) in batch.iter().zip(encoded) {
                self.ann.upsert(&document.id, &vector)?;
            }
            debug!("wrote batch {}/{} ({} documents)", n + 1, total, batch.len());
        }

        self.database
            .set_meta("indexed_count", &self.ann.len().to_string())?;
        debug!("upserted {} documents ({} total)", documents.len(), self.ann.len());
        Ok(documents.len())
    }

    /// Delete by id; returns the ids that were present
    pub fn delete(&mut self, ids: &[String]) -> Result<Vec<String>> {
        let deleted = self.database.delete(ids)?;
        for id in ids {
            self.ann.delete(id);
        }
        self.database
            .set_meta("indexed_count", &self.ann.len().to_string())?;
        debug!("deleted {} of {} requested ids", deleted.len(), ids.len());
        Ok(deleted)
    }

    /// Dispatch on the query: SQL statements run as SQL, anything else as a
    /// hybrid or semantic search depending on configuration
    pub fn search(&mut self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        if sql::is_sql(query) {
            self.sql(query, limit)?
                .into_iter()
                .map(SearchResult::from_row)
                .collect()
        } else if self.config.hybrid {
            self.hybrid_search(query, limit)
        } else {
            self.semantic_search(query, limit)
        }
    }

    pub fn batch_search(&mut self, queries: &[String], limit: usize) -> Result<Vec<Vec<SearchResult>>> {
        queries.iter().map(|q| self.search(q, limit)).collect()
    }

    /// Rank by vector similarity only
    pub fn semantic_search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let hits = self.semantic_scores(query, limit);
        self.hydrate(hits)
    }

    /// Rank by the configured blend of vector similarity and BM25
    pub fn hybrid_search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let hits = self.hybrid_scores(query, limit)?;
        self.hydrate(hits)
    }

    fn semantic_scores(&self, query: &str, limit: usize) -> Vec<(String, f32)> {
        let query_vector = self.vectors.encode(query);
        self.ann.search(&query_vector, limit)
    }

    fn hybrid_scores(&self, query: &str, limit: usize) -> Result<Vec<(String, f32)>> {
        let query_vector = self.vectors.encode(query);
        let mut terms = self.database.term_scores(&scoring::fts_query(query))?;
        if self.config.scoring.normalize {
            scoring::normalize(&mut terms);
        }

        let weights = self.config.scoring.weights;
        let mut combined: Vec<(String, f32)> = self
            .ann
            .scores(&query_vector)
            .into_iter()
            .map(|(id, semantic)| {
                let term = terms.get(&id).copied().unwrap_or(0.0);
                (id, scoring::blend(semantic, term, weights))
            })
            .collect();

        rank(&mut combined);
        combined.truncate(limit);
        Ok(combined)
    }

    fn hydrate(&self, hits: Vec<(String, f32)>) -> Result<Vec<SearchResult>> {
        let ids: Vec<String> = hits.iter().map(|(id, _)| id.clone()).collect();
        let mut records = self.database.get_many(&ids)?;

        Ok(hits
            .into_iter()
            .map(|(id, score)| {
                let record = records.remove(&id);
                SearchResult {
                    text: record.as_ref().and_then(|r| r.text.clone()),
                    tags: record.and_then(|r| r.tags),
                    score: Some(score),
                    id,
                    extra: serde_json::Map::new(),
                }
            })
            .collect())
    }

    /// Run a read-only SQL statement against the `txtai` view
    pub fn sql(&mut self, statement: &str, limit: usize) -> Result<Vec<SqlRow>> {
        if !self.config.content {
            return Err(Error::ContentDisabled);
        }
        if !sql::is_sql(statement) {
            return Err(Error::Sql("only SELECT statements are allowed".to_string()));
        }

        let parsed = sql::parse(statement)?;
        let scores = match &parsed.similar {
            Some(similar) => {
                let candidates = similar.candidates.unwrap_or_else(|| {
                    limit
                        .saturating_mul(SIMILAR_CANDIDATES_FACTOR)
                        .max(MIN_SIMILAR_CANDIDATES)
                });
                if self.config.hybrid {
                    self.hybrid_scores(&similar.query, candidates)?
                } else {
                    self.semantic_scores(&similar.query, candidates)
                }
            }
            None => Vec::new(),
        };

        self.database.set_similar_scores(&scores)?;
        let rows = self.database.query(&parsed.sql, limit);
        self.database.set_similar_scores(&[])?;
        rows
    }

    /// Score each of `texts` against `query`, best first, as (position, score)
    pub fn similarity(&self, query: &str, texts: &[String]) -> Vec<(usize, f32)> {
        let query_vector = self.vectors.encode(query);
        let mut scores: Vec<(usize, f32)> = texts
            .iter()
            .enumerate()
            .map(|(i, text)| (i, cosine_similarity(&query_vector, &self.vectors.encode(text))))
            .collect();
        scores.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scores
    }

    /// Vector for `text`
    pub fn transform(&self, text: &str) -> Vec<f32> {
        self.vectors.encode(text)
    }

    pub fn count(&self) -> Result<usize> {
        self.database.count()
    }

    pub fn stats(&self) -> Result<IndexStats> {
        Ok(IndexStats {
            documents: self.database.count()?,
            vectors: self.ann.len(),
            last_indexed: self.database.last_indexed()?,
            last_full_index: self
                .database
                .get_meta("last_full_index")?
                .and_then(|ts| ts.parse().ok()),
        })
    }

    pub fn get(&self, id: &str) -> Result<Option<DocumentRecord>> {
        self.database.get(id)
    }

    /// Persist to a local directory, or to `prefix/path` in the cloud store
    pub fn save(&self, path: &str) -> Result<()> {
        let Some(cloud_config) = &self.config.cloud else {
            return self.save_local(Path::new(path));
        };

        let staging = tempfile::tempdir()?;
        self.save_local(staging.path())?;

        let store = cloud::open(cloud_config, self.credentials.as_deref())?;
        for artifact in ARTIFACTS {
            let key = cloud::object_key(cloud_config.prefix.as_deref(), path, artifact);
            store.put(&key, std::fs::read(staging.path().join(artifact))?)?;
        }
        info!("saved index to {:?} {}", cloud_config.provider, path);
        Ok(())
    }

    fn save_local(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        std::fs::write(dir.join("config"), serde_json::to_vec_pretty(&self.config)?)?;
        self.database.export(&dir.join("documents"))?;
        self.ann.save(&dir.join("embeddings"))?;
        info!("saved {} documents to {}", self.ann.len(), dir.display());
        Ok(())
    }

    /// Replace the index with one saved at `path`
    ///
    /// The saved model and scoring settings are adopted; `contentpath` and
    /// `cloud` stay as configured for this process.
    pub fn load(&mut self, path: &str) -> Result<()> {
        let Some(cloud_config) = self.config.cloud.clone() else {
            return self.load_local(Path::new(path));
        };

        let staging = tempfile::tempdir()?;
        let store = cloud::open(&cloud_config, self.credentials.as_deref())?;
        for artifact in ARTIFACTS {
            let key = cloud::object_key(cloud_config.prefix.as_deref(), path, artifact);
            let data = store.get(&key)?.ok_or_else(|| Error::IndexNotFound(key.clone()))?;
            std::fs::write(staging.path().join(artifact), data)?;
        }
        self.load_local(staging.path())
    }

    fn load_local(&mut self, dir: &Path) -> Result<()> {
        if !self.exists_local(dir) {
            return Err(Error::IndexNotFound(dir.display().to_string()));
        }

        let saved: EmbeddingsConfig = serde_json::from_slice(&std::fs::read(dir.join("config"))?)
            .map_err(|e| Error::Corrupt {
                artifact: "config".to_string(),
                reason: e.to_string(),
            })?;
        let config = EmbeddingsConfig {
            contentpath: self.config.contentpath.clone(),
            cloud: self.config.cloud.clone(),
            ..saved
        };
        config.validate()?;

        let ann = FlatIndex::load(&dir.join("embeddings"))?;
        if ann.dimensions() != config.dimensions {
            return Err(Error::Corrupt {
                artifact: "embeddings".to_string(),
                reason: format!(
                    "vectors have {} dimensions, config says {}",
                    ann.dimensions(),
                    config.dimensions
                ),
            });
        }

        let mut database = open_database(&config)?;
        database.import(&dir.join("documents"))?;

        self.vectors = HarmonicVectors::new(&config.path, config.dimensions, config.normalize);
        self.ann = ann;
        self.database = database;
        self.config = config;
        info!("loaded {} documents from {}", self.ann.len(), dir.display());
        Ok(())
    }

    /// Whether an index was saved at `path`
    pub fn exists(&self, path: &str) -> Result<bool> {
        match &self.config.cloud {
            None => Ok(self.exists_local(Path::new(path))),
            Some(cloud_config) => {
                let store = cloud::open(cloud_config, self.credentials.as_deref())?;
                store.exists(&cloud::object_key(cloud_config.prefix.as_deref(), path, "config"))
            }
        }
    }

    fn exists_local(&self, dir: &Path) -> bool {
        ARTIFACTS.iter().all(|artifact| dir.join(artifact).is_file())
    }
}

fn open_database(config: &EmbeddingsConfig) -> Result<Database> {
    if config.is_memory() {
        Database::open_in_memory(config.content)
    } else {
        Database::open(Path::new(&config.contentpath), config.content)
    }
}

/// Keep the last occurrence of each id, preserving the order of survivors
fn dedup_last(documents: Vec<IndexDocument>) -> Vec<IndexDocument> {
    let mut seen = HashSet::new();
    let mut kept: Vec<IndexDocument> = documents
        .into_iter()
        .rev()
        .filter(|d| seen.insert(d.id.clone()))
        .collect();
    kept.reverse();
    kept
}
