//! Status command - index statistics and configuration

use anyhow::Result;
use colored::*;
use serde::Serialize;

use embeddings_service::config::{Settings, StorageType};

use super::open_service;

#[derive(Serialize)]
struct IndexStatus {
    storage: StorageType,
    model: String,
    content_path: String,
    index_path: Option<String>,
    hybrid: bool,
    dimensions: usize,
    documents: usize,
    vectors: usize,
    last_indexed: Option<String>,
    last_full_index: Option<String>,
}

fn format_timestamp(ts: i64) -> Option<String> {
    chrono::DateTime::from_timestamp(ts, 0).map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
}

pub fn run(settings: Settings, json: bool) -> Result<()> {
    let storage = settings.embeddings_storage_type;
    let index_path = settings.embeddings_index_path.clone();
    let service = open_service(settings)?;
    let embeddings = service.embeddings()?;
    let stats = embeddings.stats()?;
    let config = embeddings.config();

    let status = IndexStatus {
        storage,
        model: config.path.clone(),
        content_path: config.contentpath.clone(),
        index_path,
        hybrid: config.hybrid,
        dimensions: config.dimensions,
        documents: stats.documents,
        vectors: stats.vectors,
        last_indexed: stats.last_indexed.and_then(format_timestamp),
        last_full_index: stats.last_full_index.and_then(format_timestamp),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("{}", "Index Status".bold());
    println!();
    println!("  {} {} documents indexed", "→".dimmed(), status.documents.to_string().cyan());
    println!("  {} {} vectors ({} dimensions)", "→".dimmed(), status.vectors, status.dimensions);
    println!("  {} Storage: {} ({})", "→".dimmed(), status.storage, status.content_path);
    println!(
        "  {} Search: {}",
        "→".dimmed(),
        if status.hybrid { "hybrid (semantic + BM25)" } else { "semantic" }
    );
    println!("  {} Model: {}", "→".dimmed(), status.model);
    match &status.index_path {
        Some(path) => println!("  {} Index path: {}", "→".dimmed(), path),
        None => println!("  {} Index path: {}", "!".yellow(), "not configured".dimmed()),
    }
    if let Some(ref ts) = status.last_indexed {
        println!("  {} Last indexed: {}", "→".dimmed(), ts);
    }
    if let Some(ref ts) = status.last_full_index {
        println!("  {} Last full rebuild: {}", "→".dimmed(), ts);
    }

    if status.documents != status.vectors {
        println!();
        println!(
            "{} {} documents but {} vectors; reindex to repair",
            "!".yellow().bold(),
            status.documents,
            status.vectors
        );
    }

    Ok(())
}
