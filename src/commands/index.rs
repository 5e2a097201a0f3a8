//! Index command - load documents from files and build the index

use anyhow::{bail, Context, Result};
use colored::Colorize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use embeddings_service::config::Settings;
use embeddings_service::services::Document;

use super::open_service;

/// Extensions read as plain-text documents (one document per file)
const TEXT_EXTENSIONS: &[&str] = &["txt", "md"];

pub fn run(settings: Settings, inputs: &[String], upsert: bool, json: bool) -> Result<()> {
    let start = std::time::Instant::now();
    let documents = load_documents(inputs)?;
    if documents.is_empty() {
        bail!("No documents found in {}", inputs.join(", "));
    }

    let persisted = settings.embeddings_index_path.clone();
    let mut service = open_service(settings)?;
    service.stage(&documents)?;
    let count = if upsert {
        service.upsert_staged()?
    } else {
        service.index_staged()?
    };
    let duration_ms = start.elapsed().as_millis();

    if json {
        println!(
            "{}",
            serde_json::json!({
                "loaded": documents.len(),
                "count": count,
                "mode": if upsert { "upsert" } else { "index" },
                "index_path": persisted,
                "duration_ms": duration_ms,
            })
        );
    } else {
        println!(
            "{} {} {} documents in {:.2}s ({} in index)",
            "✓".green().bold(),
            if upsert { "Upserted" } else { "Indexed" },
            documents.len().to_string().cyan(),
            duration_ms as f64 / 1000.0,
            count
        );
        match persisted {
            Some(path) => println!("  {} Index saved to: {}", "→".dimmed(), path),
            None => println!(
                "  {} No index path configured (set {} or pass {}); nothing was persisted",
                "!".yellow(),
                "EMBEDDINGS_INDEX_PATH".cyan(),
                "--index".cyan()
            ),
        }
    }

    Ok(())
}

/// Expand glob patterns and directories into the documents they hold
///
/// `.json` holds one document or an array, `.jsonl` one document per line,
/// `.txt`/`.md` files become a document keyed by their path.
pub fn load_documents(inputs: &[String]) -> Result<Vec<Document>> {
    let mut documents = Vec::new();
    for path in expand_inputs(inputs)? {
        documents.extend(read_file(&path)?);
    }
    Ok(documents)
}

fn expand_inputs(inputs: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        let matches: Vec<PathBuf> = glob::glob(input)
            .with_context(|| format!("Invalid pattern: {}", input))?
            .filter_map(|entry| entry.ok())
            .collect();
        if matches.is_empty() {
            bail!("No files match: {}", input);
        }

        for path in matches {
            if path.is_dir() {
                let mut found: Vec<PathBuf> = WalkDir::new(&path)
                    .into_iter()
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().is_file() && is_supported(e.path()))
                    .map(|e| e.into_path())
                    .collect();
                found.sort();
                files.extend(found);
            } else {
                files.push(path);
            }
        }
    }
    Ok(files)
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn is_supported(path: &Path) -> bool {
    matches!(extension(path).as_deref(), Some("json" | "jsonl"))
        || extension(path).is_some_and(|e| TEXT_EXTENSIONS.contains(&e.as_str()))
}

fn read_file(path: &Path) -> Result<Vec<Document>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    match extension(path).as_deref() {
        Some("json") => {
            let value: serde_json::Value = serde_json::from_str(&raw)
                .with_context(|| format!("Invalid JSON in {}", path.display()))?;
            let documents = match value {
                serde_json::Value::Array(_) => serde_json::from_value(value)?,
                other => vec![serde_json::from_value(other)?],
            };
            Ok(documents)
        }
        Some("jsonl") => raw
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str(line)
                    .with_context(|| format!("Invalid document at {}:{}", path.display(), i + 1))
            })
            .collect(),
        Some(ext) if TEXT_EXTENSIONS.contains(&ext) => {
            let id = path.to_string_lossy().to_string();
            Ok(vec![Document::new(id.clone(), raw)
                .with_metadata(serde_json::json!({ "source": id }))])
        }
        _ => bail!("Unsupported file type: {}", path.display()),
    }
}
