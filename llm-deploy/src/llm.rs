//! Chat-completions client for the model gateway.
//!
//! Speaks the OpenAI-compatible `/chat/completions` shape used by AI Pipe
//! and OpenRouter. One prompt in, one text reply out; no tools, no streaming.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::generator::GenerationError;

/// A message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    max_tokens: u32,
}

/// Response from the chat-completions endpoint.
#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: Message,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Anything that turns a prompt into text. The generator only sees this.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, GenerationError>;
}

/// HTTP client for an OpenAI-compatible gateway.
pub struct LlmClient {
    api_key: String,
    api_url: String,
    model: String,
    max_tokens: u32,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: String, api_url: String, timeout: Duration) -> Result<Self, GenerationError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(GenerationError::Request)?;
        Ok(Self {
            api_key,
            api_url,
            model: crate::config::DEFAULT_LLM_MODEL.to_string(),
            max_tokens: 8000,
            http,
        })
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Send a conversation and return the raw response.
    pub async fn chat(&self, messages: Vec<Message>) -> Result<ChatResponse, GenerationError> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
        };

        let resp = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(GenerationError::Request)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body: truncate(&body, 500),
            });
        }

        resp.json::<ChatResponse>()
            .await
            .map_err(|e| GenerationError::Malformed(format!("unparseable response: {e}")))
    }
}

#[async_trait]
impl ModelClient for LlmClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, GenerationError> {
        let mut messages = Vec::with_capacity(2);
        if !system.is_empty() {
            messages.push(Message { role: "system".to_string(), content: system.to_string() });
        }
        messages.push(Message { role: "user".to_string(), content: prompt.to_string() });

        let resp = self.chat(messages).await?;
        if let Some(usage) = &resp.usage {
            tracing::debug!(
                model = %self.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "model call finished"
            );
        }
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GenerationError::Malformed("response has no choices".into()))?;
        if choice.finish_reason.as_deref() == Some("length") {
            tracing::warn!(model = %self.model, "model reply hit the token limit");
        }
        Ok(choice.message.content)
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
