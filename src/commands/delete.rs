//! Delete command - remove documents by id

use anyhow::Result;
use colored::Colorize;

use embeddings_service::config::Settings;

use super::open_service;

pub fn run(settings: Settings, ids: &[String], json: bool) -> Result<()> {
    let mut service = open_service(settings)?;
    let deleted = service.delete_documents(ids)?;
    let count = service.count()?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "deleted": deleted,
                "missing": ids.iter().filter(|id| !deleted.contains(id)).collect::<Vec<_>>(),
                "count": count,
            })
        );
        return Ok(());
    }

    for id in ids {
        if deleted.contains(id) {
            println!("{} Deleted {}", "✓".green().bold(), id.cyan());
        } else {
            println!("{} Not found: {}", "!".yellow().bold(), id);
        }
    }
    println!("  {} {} documents remain", "→".dimmed(), count);

    Ok(())
}
