//! Chat completion clients for answer generation.
//!
//! Blocking reqwest, like the cloud store: call from CLI commands or
//! `spawn_blocking` only.

use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::config::{LlmProvider, Settings};
use crate::error::{Error, Result};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Generates text from a prompt
pub trait Llm: Send + Sync {
    fn generate(&self, prompt: &str, system_prompt: &str, temperature: f32) -> Result<String>;
}

/// Anthropic Messages or OpenAI Chat Completions over HTTP
pub struct HttpLlm {
    provider: LlmProvider,
    model: String,
    api_key: String,
    base_url: String,
    client: Client,
}

impl HttpLlm {
    pub fn new(provider: LlmProvider, model: &str, api_key: &str, base_url: &str) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            provider,
            model: model.to_string(),
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// `None` when no key is configured for the selected provider
    pub fn from_settings(settings: &Settings) -> Result<Option<Self>> {
        let Some(api_key) = settings.llm_key() else {
            return Ok(None);
        };
        let provider = settings.llm_provider;
        let model = settings
            .llm_model
            .as_deref()
            .unwrap_or(provider.default_model());
        let base_url = settings
            .llm_base_url
            .as_deref()
            .unwrap_or(provider.default_base_url());
        Self::new(provider, model, api_key, base_url).map(Some)
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl Llm for HttpLlm {
    fn generate(&self, prompt: &str, system_prompt: &str, temperature: f32) -> Result<String> {
        debug!("{} completion with {} ({} prompt bytes)", self.provider, self.model, prompt.len());

        let request = match self.provider {
            LlmProvider::Anthropic => self
                .client
                .post(format!("{}/v1/messages", self.base_url))
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&anthropic_body(&self.model, prompt, system_prompt, temperature)),
            LlmProvider::Openai => self
                .client
                .post(format!("{}/v1/chat/completions", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&openai_body(&self.model, prompt, system_prompt, temperature)),
        };

        let response = request
            .send()
            .map_err(|e| Error::Llm(format!("request to {} failed: {}", self.provider, e)))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            return Err(Error::Llm(format!("{} returned {}: {}", self.provider, status, detail)));
        }

        let body: Value = response.json()?;
        let text = match self.provider {
            LlmProvider::Anthropic => anthropic_text(body)?,
            LlmProvider::Openai => openai_text(body)?,
        };
        if text.trim().is_empty() {
            return Err(Error::Llm(format!("{} returned an empty answer", self.provider)));
        }
        Ok(text)
    }
}

fn anthropic_body(model: &str, prompt: &str, system_prompt: &str, temperature: f32) -> Value {
    json!({
        "model": model,
        "max_tokens": MAX_TOKENS,
        "temperature": temperature,
        "system": system_prompt,
        "messages": [{"role": "user", "content": prompt}],
    })
}

fn openai_body(model: &str, prompt: &str, system_prompt: &str, temperature: f32) -> Value {
    json!({
        "model": model,
        "max_tokens": MAX_TOKENS,
        "temperature": temperature,
        "messages": [
            {"role": "system", "content": system_prompt},
            {"role": "user", "content": prompt},
        ],
    })
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct OpenaiResponse {
    choices: Vec<OpenaiChoice>,
}

#[derive(Deserialize)]
struct OpenaiChoice {
    message: OpenaiMessage,
}

#[derive(Deserialize)]
struct OpenaiMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Text blocks joined in order
fn anthropic_text(body: Value) -> Result<String> {
    let response: AnthropicResponse = serde_json::from_value(body)?;
    Ok(response
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .map(|block| block.text)
        .collect::<Vec<_>>()
        .join(""))
}

fn openai_text(body: Value) -> Result<String> {
    let response: OpenaiResponse = serde_json::from_value(body)?;
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| Error::Llm("response has no choices".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};

    #[test]
    fn test_request_bodies() {
        let body = anthropic_body("claude", "question", "be brief", 0.2);
        assert_eq!(body["system"], json!("be brief"));
        assert_eq!(body["messages"][0]["content"], json!("question"));
        assert_eq!(body["max_tokens"], json!(MAX_TOKENS));

        let body = openai_body("gpt", "question", "be brief", 0.2);
        assert_eq!(body["messages"][0]["role"], json!("system"));
        assert_eq!(body["messages"][1]["content"], json!("question"));
    }

    #[test]
    fn test_response_text() {
        let anthropic = json!({"content": [
            {"type": "text", "text": "Paris"},
            {"type": "tool_use", "id": "x"},
            {"type": "text", "text": " is the capital."}
        ]});
        assert_eq!(anthropic_text(anthropic).unwrap(), "Paris is the capital.");

        let openai = json!({"choices": [{"message": {"role": "assistant", "content": "Paris"}}]});
        assert_eq!(openai_text(openai).unwrap(), "Paris");
        assert!(matches!(openai_text(json!({"choices": []})), Err(Error::Llm(_))));
    }

    #[test]
    fn test_from_settings_needs_key() {
        assert!(HttpLlm::from_settings(&Settings::default()).unwrap().is_none());

        let settings = Settings {
            llm_provider: LlmProvider::Openai,
            llm_api_key: Some("sk-test".to_string()),
            ..Settings::default()
        };
        let llm = HttpLlm::from_settings(&settings).unwrap().unwrap();
        assert_eq!(llm.provider(), LlmProvider::Openai);
        assert_eq!(llm.model(), "gpt-4o-mini");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_generate_against_local_server() {
        let app = Router::new().route(
            "/v1/messages",
            post(|headers: axum::http::HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(headers["x-api-key"], "sk-test");
                let prompt = body["messages"][0]["content"].as_str().unwrap_or_default().to_string();
                Json(json!({"content": [{"type": "text", "text": format!("echo: {}", prompt)}]}))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let answer = tokio::task::spawn_blocking(move || {
            let llm = HttpLlm::new(
                LlmProvider::Anthropic,
                "claude",
                "sk-test",
                &format!("http://{}/", address),
            )?;
            llm.generate("hello", "system", 0.7)
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(answer, "echo: hello");
    }
}
