//! SQL query detection and `similar()` rewriting.
//!
//! `similar('query')` or `similar('query', candidates)` inside a WHERE
//! clause is replaced by an id filter over the scores of a semantic search
//! run before the statement executes.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{Error, Result};

/// Id filter substituted for a `similar()` clause
const SIMILAR_FILTER: &str = "id IN (SELECT id FROM similar_scores)";

lazy_static! {
    static ref SQL_PREFIX: Regex = Regex::new(r"(?is)^\s*(select|with)\s").unwrap();
    static ref SIMILAR: Regex =
        Regex::new(r"(?i)\bsimilar\s*\(\s*'((?:[^']|'')*)'\s*(?:,\s*(\d+)\s*)?\)").unwrap();
}

/// A statement with its `similar()` clause lifted out
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub similar: Option<Similar>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Similar {
    pub query: String,
    /// Candidate count given in the clause, if any
    pub candidates: Option<usize>,
}

/// Whether `query` should run as SQL rather than as a similarity query
pub fn is_sql(query: &str) -> bool {
    SQL_PREFIX.is_match(query)
}

/// Extract at most one `similar()` clause
pub fn parse(sql: &str) -> Result<Statement> {
    let mut matches = SIMILAR.captures_iter(sql);
    let Some(caps) = matches.next() else {
        return Ok(Statement {
            sql: sql.to_string(),
            similar: None,
        });
    };
    if matches.next().is_some() {
        return Err(Error::Sql(
            "only one similar() clause is supported per query".to_string(),
        ));
    }

    let query = caps[1].replace("''", "'");
    let candidates = caps
        .get(2)
        .map(|m| {
            m.as_str()
                .parse::<usize>()
                .map_err(|_| Error::Sql(format!("invalid candidate count `{}`", m.as_str())))
        })
        .transpose()?;

    Ok(Statement {
        sql: SIMILAR.replace(sql, SIMILAR_FILTER).into_owned(),
        similar: Some(Similar { query, candidates }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_sql() {
        assert!(is_sql("SELECT id FROM txtai"));
        assert!(is_sql("  select\nid from txtai"));
        assert!(is_sql("WITH x AS (SELECT 1) SELECT * FROM x"));
        assert!(!is_sql("selecting the best model"));
        assert!(!is_sql("machine learning"));
    }

    #[test]
    fn test_plain_statement() {
        let stmt = parse("SELECT id FROM txtai WHERE tags LIKE '%tech%'").unwrap();
        assert!(stmt.similar.is_none());
        assert_eq!(stmt.sql, "SELECT id FROM txtai WHERE tags LIKE '%tech%'");
    }

    #[test]
    fn test_similar_rewrite() {
        let stmt = parse("SELECT id, score FROM txtai WHERE similar('it''s ML', 25) AND tags LIKE '%x%'")
            .unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT id, score FROM txtai WHERE id IN (SELECT id FROM similar_scores) AND tags LIKE '%x%'"
        );
        assert_eq!(
            stmt.similar,
            Some(Similar {
                query: "it's ML".to_string(),
                candidates: Some(25),
            })
        );
    }

    #[test]
    fn test_multiple_similar_rejected() {
        let err = parse("SELECT id FROM txtai WHERE similar('a') OR similar('b')").unwrap_err();
        assert!(matches!(err, Error::Sql(_)));
    }
}
