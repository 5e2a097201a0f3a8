//! Ask command - answer a question from retrieved context

use anyhow::{Context, Result};
use colored::Colorize;

use embeddings_service::config::Settings;
use embeddings_service::services::rag::{DEFAULT_CONTEXT_LIMIT, DEFAULT_TEMPERATURE};
use embeddings_service::services::{HttpLlm, RagService};

use super::open_service;

pub fn run(
    settings: Settings,
    question: &str,
    limit: Option<usize>,
    min_score: Option<f32>,
    json: bool,
) -> Result<()> {
    let llm = HttpLlm::from_settings(&settings)?.with_context(|| {
        format!(
            "No API key for the {} provider (set ANTHROPIC_API_KEY or LLM_API_KEY)",
            settings.llm_provider
        )
    })?;
    let system_prompt = settings.rag_system_prompt.clone();

    let mut service = open_service(settings)?;
    let answer = RagService::new(service.query()?, &llm, &system_prompt).answer(
        question,
        limit.unwrap_or(DEFAULT_CONTEXT_LIMIT),
        min_score.unwrap_or(0.0),
        DEFAULT_TEMPERATURE,
    )?;

    if json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
        return Ok(());
    }

    println!("{}", answer.answer);
    println!();
    if answer.sources.is_empty() {
        println!("{} No relevant context found", "!".yellow());
    } else {
        println!("{} {}", "Sources:".dimmed(), answer.sources.join(", ").cyan());
    }

    Ok(())
}
