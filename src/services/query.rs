//! Query dispatcher: semantic, SQL and hybrid requests over one index

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::embeddings::{sql, Embeddings, SearchResult};
use crate::error::{Error, Result};

pub const DEFAULT_LIMIT: usize = 10;

/// Row cap for SQL statements that do not bound themselves
pub const SQL_ROW_LIMIT: usize = 1000;

/// A query request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Query {
    Semantic {
        text: String,
        #[serde(default = "default_limit")]
        limit: usize,
    },
    Sql {
        statement: String,
        #[serde(default = "sql_row_limit")]
        limit: usize,
    },
    Hybrid {
        text: String,
        #[serde(default = "default_limit")]
        limit: usize,
        /// Results scoring at or below this are dropped
        #[serde(default)]
        min_score: f32,
    },
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

fn sql_row_limit() -> usize {
    SQL_ROW_LIMIT
}

/// A formatted result: tags parsed back into a metadata object
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub id: String,
    pub text: Option<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

impl From<SearchResult> for QueryResult {
    fn from(result: SearchResult) -> Self {
        let metadata = match result.tags.as_deref() {
            None | Some("") => serde_json::Map::new(),
            Some(tags) => match serde_json::from_str::<serde_json::Value>(tags) {
                Ok(serde_json::Value::Object(map)) => map,
                Ok(other) => {
                    warn!("tags of {} are not a JSON object: {}", result.id, other);
                    serde_json::Map::new()
                }
                Err(e) => {
                    warn!("failed to parse tags of {}: {}", result.id, e);
                    serde_json::Map::new()
                }
            },
        };

        Self {
            id: result.id,
            text: result.text,
            metadata,
            score: result.score,
        }
    }
}

pub struct QueryService<'a> {
    embeddings: &'a mut Embeddings,
}

impl<'a> QueryService<'a> {
    pub fn new(embeddings: &'a mut Embeddings) -> Self {
        Self { embeddings }
    }

    pub fn run(&mut self, query: &Query) -> Result<Vec<QueryResult>> {
        match query {
            Query::Semantic { text, limit } => self.semantic_search(text, *limit),
            Query::Sql { statement, limit } => self.sql_search(statement, *limit),
            Query::Hybrid {
                text,
                limit,
                min_score,
            } => self.hybrid_search(text, *limit, *min_score),
        }
    }

    /// Rank by vector similarity
    pub fn semantic_search(&mut self, text: &str, limit: usize) -> Result<Vec<QueryResult>> {
        info!("semantic search: {:?} (limit {})", text, limit);
        let results = self.embeddings.semantic_search(text, limit)?;
        Ok(format(results))
    }

    /// Run a SELECT against the `txtai` view, typically filtering on tags
    pub fn sql_search(&mut self, statement: &str, limit: usize) -> Result<Vec<QueryResult>> {
        info!("sql search: {}", statement.trim());
        if !sql::is_sql(statement) {
            return Err(Error::Sql(
                "expected a SELECT or WITH statement".to_string(),
            ));
        }
        let results = self.embeddings.search(statement, limit)?;
        Ok(format(results))
    }

    /// Rank by the configured semantic/BM25 blend, keeping scores above `min_score`
    pub fn hybrid_search(&mut self, text: &str, limit: usize, min_score: f32) -> Result<Vec<QueryResult>> {
        info!("hybrid search: {:?} (limit {}, min_score {})", text, limit, min_score);
        let results: Vec<SearchResult> = self
            .embeddings
            .hybrid_search(text, limit)?
            .into_iter()
            .filter(|r| r.score.unwrap_or(0.0) > min_score)
            .collect();
        info!("{} results above score threshold", results.len());
        Ok(format(results))
    }

    /// Document count as reported by SQL
    pub fn verify(&mut self) -> Result<usize> {
        let rows = self
            .embeddings
            .sql("SELECT COUNT(*) AS count FROM txtai", 1)?;
        let count = rows
            .first()
            .and_then(|row| row.iter().find(|(name, _)| name == "count"))
            .and_then(|(_, value)| value.as_u64())
            .unwrap_or(0);
        info!("verified count: {}", count);
        Ok(count as usize)
    }
}

fn format(results: Vec<SearchResult>) -> Vec<QueryResult> {
    results.into_iter().map(QueryResult::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingsConfig;
    use crate::services::embeddings::encode_tags;
    use serde_json::json;

    fn embeddings() -> Embeddings {
        let mut embeddings = Embeddings::new(EmbeddingsConfig::default()).unwrap();
        let tech = json!({"category": "tech", "priority": 1});
        let cooking = json!({"category": "cooking"});
        embeddings
            .index([
                (
                    "doc1",
                    "Machine learning models require significant computational resources",
                    encode_tags(tech.as_object().unwrap()).unwrap(),
                ),
                (
                    "doc2",
                    "Natural language processing advances with transformer models",
                    encode_tags(tech.as_object().unwrap()).unwrap(),
                ),
                (
                    "doc3",
                    "Braised short ribs need hours in a low oven",
                    encode_tags(cooking.as_object().unwrap()).unwrap(),
                ),
                ("doc4", "A document with broken tags", "{not json".to_string()),
            ])
            .unwrap();
        embeddings
    }

    #[test]
    fn test_semantic_results_carry_metadata() {
        let mut embeddings = embeddings();
        let mut service = QueryService::new(&mut embeddings);
        let results = service.semantic_search("machine learning models", 1).unwrap();
        assert_eq!(results[0].id, "doc1");
        assert_eq!(results[0].metadata["category"], json!("tech"));
        assert!(results[0].score.is_some());
    }

    #[test]
    fn test_sql_filter_on_tags() {
        let mut embeddings = embeddings();
        let mut service = QueryService::new(&mut embeddings);
        let results = service
            .sql_search(
                r#"SELECT id, text, tags FROM txtai WHERE tags LIKE '%"category": "tech"%'"#,
                DEFAULT_LIMIT,
            )
            .unwrap();
        let mut ids: Vec<_> = results.iter().map(|r| r.id.clone()).collect();
        ids.sort();
        assert_eq!(ids, vec!["doc1", "doc2"]);
        assert!(results.iter().all(|r| r.score.is_none()));

        assert!(matches!(
            service.sql_search("machine learning", 5),
            Err(Error::Sql(_))
        ));
    }

    #[test]
    fn test_invalid_tags_become_empty_metadata() {
        let mut embeddings = embeddings();
        let mut service = QueryService::new(&mut embeddings);
        let results = service
            .sql_search("SELECT id, text, tags FROM txtai WHERE id = 'doc4'", 1)
            .unwrap();
        assert!(results[0].metadata.is_empty());
    }

    #[test]
    fn test_hybrid_min_score() {
        let mut embeddings = embeddings();
        let mut service = QueryService::new(&mut embeddings);
        let all = service.hybrid_search("short ribs oven", 4, f32::MIN).unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].id, "doc3");

        let top_score = all[0].score.unwrap();
        let filtered = service.hybrid_search("short ribs oven", 4, top_score).unwrap();
        assert!(filtered.is_empty());
        assert!(service.hybrid_search("short ribs oven", 4, 2.0).unwrap().is_empty());
    }

    #[test]
    fn test_run_and_verify() {
        let mut embeddings = embeddings();
        let mut service = QueryService::new(&mut embeddings);
        let query: Query =
            serde_json::from_value(json!({"type": "hybrid", "text": "transformer models"})).unwrap();
        assert_eq!(
            query,
            Query::Hybrid {
                text: "transformer models".to_string(),
                limit: DEFAULT_LIMIT,
                min_score: 0.0
            }
        );
        let results = service.run(&query).unwrap();
        assert_eq!(results[0].id, "doc2");
        assert_eq!(service.verify().unwrap(), 4);
    }
}
