//! Search command - semantic, hybrid or SQL queries against the index

use anyhow::Result;
use colored::Colorize;
use unicode_width::UnicodeWidthChar;

use embeddings_service::config::Settings;
use embeddings_service::embeddings::sql::is_sql;
use embeddings_service::services::query::{DEFAULT_LIMIT, SQL_ROW_LIMIT};
use embeddings_service::services::{Query, QueryResult};

use super::open_service;

/// Display width (terminal columns) of text previews
const PREVIEW_WIDTH: usize = 100;

pub fn run(
    settings: Settings,
    query: &str,
    limit: Option<usize>,
    semantic: bool,
    min_score: Option<f32>,
    json: bool,
) -> Result<()> {
    let mut service = open_service(settings)?;
    let hybrid = service.embeddings()?.config().hybrid;

    let request = if is_sql(query) {
        Query::Sql {
            statement: query.to_string(),
            limit: limit.unwrap_or(SQL_ROW_LIMIT),
        }
    } else if hybrid && !semantic {
        Query::Hybrid {
            text: query.to_string(),
            limit: limit.unwrap_or(DEFAULT_LIMIT),
            min_score: min_score.unwrap_or(0.0),
        }
    } else {
        Query::Semantic {
            text: query.to_string(),
            limit: limit.unwrap_or(DEFAULT_LIMIT),
        }
    };

    let results = service.query()?.run(&request)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("{} No results found for: {}", "→".dimmed(), query.cyan());
        return Ok(());
    }

    let mode = match request {
        Query::Semantic { .. } => "semantic",
        Query::Sql { .. } => "sql",
        Query::Hybrid { .. } => "hybrid",
    };
    println!(
        "{} {} {} results for: {}",
        "→".dimmed(),
        results.len(),
        mode,
        query.cyan()
    );
    println!();

    for (i, result) in results.iter().enumerate() {
        print_result(i + 1, result);
    }

    Ok(())
}

fn print_result(rank: usize, result: &QueryResult) {
    match result.score {
        Some(score) => {
            let score_str = format!("{:.2}", score);
            let score_colored = if score > 0.8 {
                score_str.green()
            } else if score > 0.6 {
                score_str.yellow()
            } else {
                score_str.dimmed()
            };
            println!("{}. [{}] {}", rank.to_string().bold(), score_colored, result.id.cyan());
        }
        None => println!("{}. {}", rank.to_string().bold(), result.id.cyan()),
    }

    if let Some(ref text) = result.text {
        println!("   {}", truncate(text, PREVIEW_WIDTH).dimmed());
    }
    if !result.metadata.is_empty() {
        println!(
            "   {}",
            serde_json::Value::Object(result.metadata.clone())
        );
    }
    println!();
}

/// Cut `text` to `width` terminal columns, appending "..." when shortened
fn truncate(text: &str, width: usize) -> String {
    let mut used = 0;
    let mut out = String::new();
    for c in text.chars() {
        let w = c.width().unwrap_or(0);
        if used + w > width {
            out.push_str("...");
            return out;
        }
        used += w;
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_by_display_width() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 4), "abcd...");
        // wide characters take two columns each
        assert_eq!(truncate("검색엔진", 5), "검색...");
    }
}
