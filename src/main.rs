mod commands;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use embeddings_service::config::{Settings, StorageType};

#[derive(Parser)]
#[command(name = "embeddings")]
#[command(about = "Embeddings index with semantic, hybrid and SQL search", long_about = None)]
#[command(version)]
struct Cli {
    /// Settings file (default: embeddings.yml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Where the index is saved and loaded (overrides EMBEDDINGS_INDEX_PATH)
    #[arg(long, global = true)]
    index: Option<String>,

    /// Storage type (overrides EMBEDDINGS_STORAGE_TYPE)
    #[arg(long, global = true, value_enum)]
    storage: Option<StorageType>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API
    Serve {
        #[arg(long, help = "Bind host (overrides HOST)")]
        host: Option<String>,
        #[arg(long, help = "Bind port (overrides PORT)")]
        port: Option<u16>,
    },
    /// Index documents from JSON, JSONL, text or markdown files
    Index {
        #[arg(required = true, help = "Files, directories or glob patterns")]
        inputs: Vec<String>,
        #[arg(long, help = "Merge into the existing index instead of rebuilding")]
        upsert: bool,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Search with text or a SQL statement
    Search {
        query: String,
        #[arg(long, short, help = "Limit results")]
        limit: Option<usize>,
        #[arg(long, help = "Semantic ranking only (skip BM25 blending)")]
        semantic: bool,
        #[arg(long, help = "Drop hybrid results scoring at or below this")]
        min_score: Option<f32>,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Answer a question from indexed documents with the configured LLM
    Ask {
        question: String,
        #[arg(long, short, help = "Context documents to retrieve (default: 3)")]
        limit: Option<usize>,
        #[arg(long, help = "Ignore context scoring at or below this")]
        min_score: Option<f32>,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Delete documents by id
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Show index status
    Status {
        #[arg(long, help = "JSON output")]
        json: bool,
    },

    // ===== MCP Server =====
    /// Start MCP server on stdio
    #[cfg(feature = "mcp")]
    Mcp,
}

/// Log to stderr; stdout belongs to command output and the MCP transport
fn init_logging(verbose: bool, level: &str) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    if let Some(index) = cli.index {
        settings.embeddings_index_path = Some(index);
    }
    if let Some(storage) = cli.storage {
        settings.embeddings_storage_type = storage;
    }

    init_logging(cli.verbose, &settings.log_level);

    match cli.command {
        Commands::Serve { host, port } => commands::serve::run(settings, host, port),
        Commands::Index {
            inputs,
            upsert,
            json,
        } => commands::index::run(settings, &inputs, upsert, json),
        Commands::Search {
            query,
            limit,
            semantic,
            min_score,
            json,
        } => commands::search::run(settings, &query, limit, semantic, min_score, json),
        Commands::Ask {
            question,
            limit,
            min_score,
            json,
        } => commands::ask::run(settings, &question, limit, min_score, json),
        Commands::Delete { ids, json } => commands::delete::run(settings, &ids, json),
        Commands::Status { json } => commands::status::run(settings, json),

        #[cfg(feature = "mcp")]
        Commands::Mcp => commands::serve::run_mcp(settings),
    }
}
