//! Content database using SQLite
//!
//! Holds document text and JSON tags, an FTS5 table used for BM25 term
//! scoring, and a per-connection `txtai` view that SQL queries run against.

use rusqlite::{params, types::ValueRef, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};

/// A stored document row
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRecord {
    pub id: String,
    /// `None` when content storage is disabled
    pub text: Option<String>,
    /// JSON-encoded metadata
    pub tags: Option<String>,
    pub indexed_at: i64,
}

/// One row of a SQL query, column name to JSON value, in select order
pub type SqlRow = Vec<(String, serde_json::Value)>;

pub struct Database {
    conn: Connection,
    content: bool,
}

impl Database {
    /// Open or create the database at `path`
    pub fn open(path: &Path, content: bool) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let db = Self {
            conn: Connection::open(path)?,
            content,
        };
        db.init_schema()?;
        Ok(db)
    }

    pub fn open_in_memory(content: bool) -> Result<Self> {
        let db = Self {
            conn: Connection::open_in_memory()?,
            content,
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                text TEXT,
                tags TEXT,  -- JSON object
                indexed_at INTEGER NOT NULL
            );

            CREATE VIRTUAL TABLE IF NOT EXISTS terms USING fts5(id UNINDEXED, text);

            CREATE TABLE IF NOT EXISTS index_meta (
                key TEXT PRIMARY KEY,
                value TEXT
            );

            -- Per-connection objects: scores of the current similar() clause
            -- and the view SQL queries address
            CREATE TEMP TABLE IF NOT EXISTS similar_scores (
                id TEXT PRIMARY KEY,
                score REAL NOT NULL
            );

            CREATE TEMP VIEW IF NOT EXISTS txtai AS
                SELECT d.id AS id, d.text AS text, d.tags AS tags,
                       d.indexed_at AS indexed_at, s.score AS score
                FROM main.documents d
                LEFT JOIN similar_scores s ON s.id = d.id;
            "#,
        )?;

        Ok(())
    }

    /// Insert or replace documents and their term entries in one transaction
    pub fn upsert(&mut self, documents: &[(String, String, Option<String>)]) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let content = self.content;
        let tx = self.conn.transaction()?;
        {
            let mut upsert = tx.prepare(
                r#"
                INSERT INTO documents (id, text, tags, indexed_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(id) DO UPDATE SET
                    text = excluded.text,
                    tags = excluded.tags,
                    indexed_at = excluded.indexed_at
                "#,
            )?;
            let mut clear_terms = tx.prepare("DELETE FROM terms WHERE id = ?1")?;
            let mut insert_terms = tx.prepare("INSERT INTO terms (id, text) VALUES (?1, ?2)")?;

            for (id, text, tags) in documents {
                let stored_text = content.then_some(text.as_str());
                upsert.execute(params![id, stored_text, tags, now])?;
                clear_terms.execute(params![id])?;
                insert_terms.execute(params![id, text])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Delete by id; returns the ids that existed
    pub fn delete(&mut self, ids: &[String]) -> Result<Vec<String>> {
        let tx = self.conn.transaction()?;
        let mut deleted = Vec::new();
        {
            let mut delete_doc = tx.prepare("DELETE FROM documents WHERE id = ?1")?;
            let mut delete_terms = tx.prepare("DELETE FROM terms WHERE id = ?1")?;
            for id in ids {
                if delete_doc.execute(params![id])? > 0 {
                    deleted.push(id.clone());
                }
                delete_terms.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(deleted)
    }

    /// Remove every document and term entry
    pub fn clear(&self) -> Result<()> {
        self.conn
            .execute_batch("DELETE FROM documents; DELETE FROM terms;")?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<DocumentRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT id, text, tags, indexed_at FROM documents WHERE id = ?1",
                params![id],
                |row| {
                    Ok(DocumentRecord {
                        id: row.get(0)?,
                        text: row.get(1)?,
                        tags: row.get(2)?,
                        indexed_at: row.get(3)?,
                    })
                },
            )
            .optional()?;

        Ok(record)
    }

    /// Fetch several documents keyed by id; unknown ids are skipped
    pub fn get_many(&self, ids: &[String]) -> Result<HashMap<String, DocumentRecord>> {
        let mut records = HashMap::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.get(id)? {
                records.insert(id.clone(), record);
            }
        }
        Ok(records)
    }

    /// Raw BM25 relevance per matching id (larger is better)
    ///
    /// `fts_query` is an FTS5 MATCH expression; an empty one matches nothing.
    pub fn term_scores(&self, fts_query: &str) -> Result<HashMap<String, f32>> {
        if fts_query.is_empty() {
            return Ok(HashMap::new());
        }

        let mut stmt = self
            .conn
            .prepare("SELECT id, bm25(terms) FROM terms WHERE terms MATCH ?1")?;
        let rows = stmt.query_map(params![fts_query], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;

        let mut scores = HashMap::new();
        for row in rows {
            let (id, bm25) = row?;
            // FTS5 bm25() is lower-is-better and negative
            scores.insert(id, (-bm25) as f32);
        }
        Ok(scores)
    }

    /// Indexed text per id, kept even when content storage is disabled
    pub fn term_texts(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare("SELECT id, text FROM terms ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn last_indexed(&self) -> Result<Option<i64>> {
        Ok(self
            .conn
            .query_row("SELECT MAX(indexed_at) FROM documents", [], |row| row.get(0))
            .optional()?
            .flatten())
    }

    /// Replace the scores the `txtai.score` column exposes
    pub fn set_similar_scores(&mut self, scores: &[(String, f32)]) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM similar_scores", [])?;
        {
            let mut insert = tx.prepare("INSERT OR REPLACE INTO similar_scores (id, score) VALUES (?1, ?2)")?;
            for (id, score) in scores {
                insert.execute(params![id, *score as f64])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Run a single SELECT (or WITH ... SELECT), returning at most `limit` rows
    ///
    /// SQLite counts BEGIN, SAVEPOINT, ATTACH and DETACH as read-only, so the
    /// statement must also open with SELECT/WITH and leave the connection in
    /// autocommit mode.
    pub fn query(&self, sql: &str, limit: usize) -> Result<Vec<SqlRow>> {
        if !self.content {
            return Err(Error::ContentDisabled);
        }
        if !super::sql::is_sql(sql) {
            return Err(Error::Sql("only SELECT statements are allowed".to_string()));
        }

        let rows = self.select(sql, limit);
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK")?;
            return Err(Error::Sql("statement left a transaction open".to_string()));
        }
        rows
    }

    fn select(&self, sql: &str, limit: usize) -> Result<Vec<SqlRow>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| Error::Sql(e.to_string()))?;
        if !stmt.readonly() {
            return Err(Error::Sql("only read-only statements are allowed".to_string()));
        }

        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query([]).map_err(|e| Error::Sql(e.to_string()))?;
        let mut out = Vec::new();

        while out.len() < limit {
            let Some(row) = rows.next().map_err(|e| Error::Sql(e.to_string()))? else {
                break;
            };
            let mut values = Vec::with_capacity(names.len());
            for (i, name) in names.iter().enumerate() {
                values.push((name.clone(), json_value(row.get_ref(i)?)));
            }
            out.push(values);
        }

        Ok(out)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO index_meta (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM index_meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Write a standalone copy of the database (the `documents` artifact)
    pub fn export(&self, path: &Path) -> Result<()> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let target = path.to_string_lossy().to_string();
        self.conn.execute("VACUUM INTO ?1", params![target])?;
        Ok(())
    }

    /// Replace current contents with a copy written by [`Database::export`]
    pub fn import(&mut self, path: &Path) -> Result<()> {
        let source = path.to_string_lossy().to_string();
        self.conn
            .execute("ATTACH DATABASE ?1 AS saved", params![source])?;

        let copied = self.copy_from_saved();
        self.conn.execute_batch("DETACH DATABASE saved")?;
        copied
    }

    fn copy_from_saved(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(
            r#"
            DELETE FROM main.documents;
            DELETE FROM main.terms;
            DELETE FROM main.index_meta;
            INSERT INTO main.documents (id, text, tags, indexed_at)
                SELECT id, text, tags, indexed_at FROM saved.documents;
            INSERT INTO main.terms (id, text) SELECT id, text FROM saved.terms;
            INSERT INTO main.index_meta (key, value) SELECT key, value FROM saved.index_meta;
            "#,
        )?;
        tx.commit()?;
        Ok(())
    }
}

fn json_value(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Value::from(f),
        ValueRef::Text(t) => serde_json::Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => serde_json::Value::String(format!("<{} bytes>", b.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, text: &str, tags: &str) -> (String, String, Option<String>) {
        (id.to_string(), text.to_string(), Some(tags.to_string()))
    }

    fn sample() -> Database {
        let mut db = Database::open_in_memory(true).unwrap();
        db.upsert(&[
            doc("doc1", "Machine learning models need compute", r#"{"category": "tech"}"#),
            doc("doc2", "Bread rises with yeast", r#"{"category": "cooking"}"#),
        ])
        .unwrap();
        db
    }

    #[test]
    fn test_upsert_get_delete() -> Result<()> {
        let mut db = sample();
        assert_eq!(db.count()?, 2);

        let record = db.get("doc1")?.unwrap();
        assert_eq!(record.text.as_deref(), Some("Machine learning models need compute"));
        assert_eq!(record.tags.as_deref(), Some(r#"{"category": "tech"}"#));

        db.upsert(&[doc("doc1", "Replaced text", "{}")])?;
        assert_eq!(db.count()?, 2);
        assert_eq!(db.get("doc1")?.unwrap().text.as_deref(), Some("Replaced text"));

        let deleted = db.delete(&["doc1".to_string(), "missing".to_string()])?;
        assert_eq!(deleted, vec!["doc1".to_string()]);
        assert!(db.get("doc1")?.is_none());
        assert!(db.last_indexed()?.is_some());
        Ok(())
    }

    #[test]
    fn test_term_scores_follow_upserts() -> Result<()> {
        let mut db = sample();
        let scores = db.term_scores("\"yeast\"")?;
        assert_eq!(scores.len(), 1);
        assert!(scores["doc2"] > 0.0);

        db.upsert(&[doc("doc2", "Pasta needs salted water", "{}")])?;
        assert!(db.term_scores("\"yeast\"")?.is_empty());
        assert!(db.term_scores("")?.is_empty());
        Ok(())
    }

    #[test]
    fn test_sql_like_on_tags() -> Result<()> {
        let db = sample();
        let rows = db.query(
            r#"SELECT id, text, tags FROM txtai WHERE tags LIKE '%"category": "tech"%'"#,
            10,
        )?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], ("id".to_string(), serde_json::json!("doc1")));
        Ok(())
    }

    #[test]
    fn test_sql_limit_and_count() -> Result<()> {
        let db = sample();
        assert_eq!(db.query("SELECT id FROM txtai", 1)?.len(), 1);

        let rows = db.query("SELECT COUNT(*) AS count FROM txtai", 10)?;
        assert_eq!(rows[0][0].1, serde_json::json!(2));
        Ok(())
    }

    #[test]
    fn test_sql_rejects_writes() {
        let db = sample();
        let err = db.query("DELETE FROM documents", 10).unwrap_err();
        assert!(matches!(err, Error::Sql(_)));
        assert!(matches!(db.query("SELEKT nonsense", 10), Err(Error::Sql(_))));
    }

    #[test]
    fn test_sql_rejects_transaction_and_attach() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let planted = dir.path().join("planted.db");
        let mut db = sample();

        for statement in [
            "BEGIN".to_string(),
            "SAVEPOINT s1".to_string(),
            format!("ATTACH DATABASE '{}' AS x", planted.display()),
            "DETACH DATABASE temp".to_string(),
        ] {
            assert!(
                matches!(db.query(&statement, 10), Err(Error::Sql(_))),
                "accepted: {}",
                statement
            );
        }
        assert!(!planted.exists());

        // connection is still in autocommit mode and writable
        db.upsert(&[doc("doc3", "Fresh basil", "{}")])?;
        assert_eq!(db.query("SELECT id FROM txtai", 10)?.len(), 3);
        Ok(())
    }

    #[test]
    fn test_similar_scores_column() -> Result<()> {
        let mut db = sample();
        db.set_similar_scores(&[("doc2".to_string(), 0.5)])?;
        let rows = db.query("SELECT id, score FROM txtai WHERE score IS NOT NULL", 10)?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][1].1, serde_json::json!(0.5));
        Ok(())
    }

    #[test]
    fn test_content_disabled() -> Result<()> {
        let mut db = Database::open_in_memory(false)?;
        db.upsert(&[doc("a", "secret text", "{}")])?;
        assert!(db.get("a")?.unwrap().text.is_none());
        assert_eq!(db.term_scores("\"secret\"")?.len(), 1);
        assert!(matches!(db.query("SELECT id FROM txtai", 10), Err(Error::ContentDisabled)));
        Ok(())
    }

    #[test]
    fn test_export_import() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("documents");
        let db = sample();
        db.set_meta("indexed_count", "2")?;
        db.export(&path)?;

        let mut restored = Database::open_in_memory(true)?;
        restored.upsert(&[doc("stale", "old", "{}")])?;
        restored.import(&path)?;
        assert_eq!(restored.count()?, 2);
        assert!(restored.get("stale")?.is_none());
        assert_eq!(restored.get_meta("indexed_count")?.as_deref(), Some("2"));
        assert_eq!(restored.term_scores("\"machine\"")?.len(), 1);
        Ok(())
    }
}
