//! OpenAI chat-completions client
//!
//! Minimal REST client for the reasoning backend. Both agents share one
//! instance; the endpoint is overridable so tests can point it at a mock
//! server.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Chat completions endpoint.
const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Cost-effective default model; OPENAI_MODEL overrides it.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Backend calls never block longer than this.
const BACKEND_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    model: String,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    total_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// One completion, with the accounting the metrics layer wants.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub total_tokens: u64,
}

/// Reasoning backend client.
#[derive(Clone)]
pub struct ChatClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl ChatClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(BACKEND_TIMEOUT)
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            base_url: OPENAI_API_URL.to_string(),
            model: model.into(),
        }
    }

    /// Point the client at a different completions endpoint.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One chat completion from a system prompt and a user prompt.
    pub async fn complete(
        &self,
        system: &str,
        user: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<Completion> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature,
            max_tokens,
        };

        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to reach the reasoning backend")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read backend response")?;

        if !status.is_success() {
            if let Ok(parsed) = serde_json::from_str::<ApiErrorBody>(&body) {
                anyhow::bail!("Backend error: {}", parsed.error.message);
            }
            anyhow::bail!("Backend error ({}): {}", status, body);
        }

        let parsed: ChatResponse =
            serde_json::from_str(&body).context("Failed to parse backend response")?;

        let text = parsed
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .context("Backend response contained no completion text")?;

        Ok(Completion {
            text,
            model: parsed.model,
            total_tokens: parsed.usage.map(|u| u.total_tokens).unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_parsing_tolerates_missing_usage() {
        let body = r#"{
            "choices": [{"message": {"role": "assistant", "content": "All healthy."}}],
            "model": "gpt-4o-mini"
        }"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some("All healthy.")
        );
        assert!(parsed.usage.is_none());
    }

    #[test]
    fn test_error_body_parsing() {
        let body = r#"{"error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}}"#;
        let parsed: ApiErrorBody = serde_json::from_str(body).unwrap();
        assert!(parsed.error.message.contains("Incorrect API key"));
    }
}
