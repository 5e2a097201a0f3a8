//! Retrieval-augmented answers: hybrid search for context, then an LLM call

use serde::Serialize;
use tracing::info;

use super::llm::Llm;
use super::query::{QueryResult, QueryService};
use crate::error::Result;

pub const DEFAULT_CONTEXT_LIMIT: usize = 3;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Context used when retrieval finds nothing above the score threshold
pub const NO_CONTEXT: &str = "No relevant context found.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RagAnswer {
    pub question: String,
    pub context: String,
    pub answer: String,
    /// Ids of the documents the context was built from, in order
    pub sources: Vec<String>,
}

/// Number the retrieved texts as `Document N:` blocks
pub fn build_context(results: &[QueryResult]) -> String {
    if results.is_empty() {
        return NO_CONTEXT.to_string();
    }
    results
        .iter()
        .enumerate()
        .map(|(i, r)| format!("Document {}:\n{}", i + 1, r.text.as_deref().unwrap_or("")))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_prompt(question: &str, context: &str) -> String {
    format!(
        "Answer this question using ONLY the context below:\n\nContext:\n{}\n\nQuestion: {}\n\nAnswer:",
        context, question
    )
}

pub struct RagService<'a> {
    query: QueryService<'a>,
    llm: &'a dyn Llm,
    system_prompt: &'a str,
}

impl<'a> RagService<'a> {
    pub fn new(query: QueryService<'a>, llm: &'a dyn Llm, system_prompt: &'a str) -> Self {
        Self {
            query,
            llm,
            system_prompt,
        }
    }

    pub fn answer(
        &mut self,
        question: &str,
        limit: usize,
        min_score: f32,
        temperature: f32,
    ) -> Result<RagAnswer> {
        let results = self.query.hybrid_search(question, limit, min_score)?;
        let context = build_context(&results);
        info!("answering with {} context documents", results.len());

        let answer = self
            .llm
            .generate(&build_prompt(question, &context), self.system_prompt, temperature)?;

        Ok(RagAnswer {
            question: question.to_string(),
            context,
            answer,
            sources: results.into_iter().map(|r| r.id).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Settings, StorageType};
    use crate::error::Error;
    use crate::services::{Document, EmbeddingsService};
    use std::sync::Mutex;

    /// Echoes a canned answer and remembers what it was asked
    #[derive(Default)]
    struct RecordingLlm {
        calls: Mutex<Vec<(String, String, f32)>>,
    }

    impl Llm for RecordingLlm {
        fn generate(&self, prompt: &str, system_prompt: &str, temperature: f32) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push((prompt.to_string(), system_prompt.to_string(), temperature));
            Ok("canned answer".to_string())
        }
    }

    struct FailingLlm;

    impl Llm for FailingLlm {
        fn generate(&self, _: &str, _: &str, _: f32) -> Result<String> {
            Err(Error::Llm("quota exceeded".to_string()))
        }
    }

    fn service() -> EmbeddingsService {
        let mut service = EmbeddingsService::new(Settings::default());
        service.create_index(StorageType::Memory, ":memory:").unwrap();
        service
            .add_documents(&[
                Document::new("doc1", "Machine learning models require significant computational resources"),
                Document::new("doc2", "Natural language processing advances with transformer models"),
                Document::new("doc3", "Fresh pasta dough rests for thirty minutes"),
            ])
            .unwrap();
        service
    }

    fn result(id: &str, text: &str) -> QueryResult {
        QueryResult {
            id: id.to_string(),
            text: Some(text.to_string()),
            metadata: serde_json::Map::new(),
            score: Some(0.5),
        }
    }

    #[test]
    fn test_build_context() {
        assert_eq!(build_context(&[]), NO_CONTEXT);
        assert_eq!(
            build_context(&[result("a", "first"), result("b", "second")]),
            "Document 1:\nfirst\n\nDocument 2:\nsecond"
        );
    }

    #[test]
    fn test_answer_uses_retrieved_context() {
        let mut service = service();
        let llm = RecordingLlm::default();
        let mut rag = RagService::new(service.query().unwrap(), &llm, "Be precise.");

        let answer = rag.answer("transformer models", 2, 0.0, 0.3).unwrap();
        assert_eq!(answer.answer, "canned answer");
        assert_eq!(answer.sources[0], "doc2");
        assert!(answer.context.starts_with(
            "Document 1:\nNatural language processing advances with transformer models"
        ));

        let calls = llm.calls.lock().unwrap();
        let (prompt, system_prompt, temperature) = &calls[0];
        assert!(prompt.contains(&answer.context));
        assert!(prompt.ends_with("Question: transformer models\n\nAnswer:"));
        assert_eq!(system_prompt, "Be precise.");
        assert_eq!(*temperature, 0.3);
    }

    #[test]
    fn test_answer_without_context() {
        let mut service = service();
        let llm = RecordingLlm::default();
        let mut rag = RagService::new(service.query().unwrap(), &llm, "");

        let answer = rag.answer("transformer models", 3, 10.0, 0.7).unwrap();
        assert_eq!(answer.context, NO_CONTEXT);
        assert!(answer.sources.is_empty());
        assert!(llm.calls.lock().unwrap()[0].0.contains(NO_CONTEXT));
    }

    #[test]
    fn test_llm_failure_propagates() {
        let mut service = service();
        let mut rag = RagService::new(service.query().unwrap(), &FailingLlm, "");
        assert!(matches!(rag.answer("pasta", 1, 0.0, 0.7), Err(Error::Llm(_))));
    }
}
