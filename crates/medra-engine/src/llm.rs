//! LLM chat-completion adapter.
//!
//! One narrow trait; the production implementation speaks the
//! OpenAI-compatible chat endpoint. Transient endpoint failures (429,
//! 5xx) are retried with backoff before surfacing.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use medra_core::retry::{retry_with_backoff, BackoffPolicy};
use medra_core::settings::LlmSettings;
use medra_core::{MedraError, Result};

/// A single chat completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Chat-completion endpoint the fixer talks to.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<String>;
}

/// OpenAI-compatible chat client.
pub struct OpenAiChat {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    default_max_tokens: u32,
    default_temperature: f32,
}

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

impl OpenAiChat {
    pub fn new(settings: &LlmSettings, timeout: Duration) -> Result<Self> {
        if settings.api_key.is_empty() {
            return Err(MedraError::InvalidInput("LLM_API_KEY is not set".to_string()));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key: settings.api_key.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            default_max_tokens: settings.max_tokens,
            default_temperature: settings.temperature,
        })
    }

    fn is_transient(err: &MedraError) -> bool {
        match err {
            MedraError::Transient { .. } => true,
            MedraError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let payload = CompletionRequest {
            model: self.model.clone(),
            messages: vec![
                Message { role: "system".to_string(), content: request.system.clone() },
                Message { role: "user".to_string(), content: request.user.clone() },
            ],
            max_tokens: request.max_tokens.unwrap_or(self.default_max_tokens),
            temperature: request.temperature.unwrap_or(self.default_temperature),
        };

        retry_with_backoff(
            BackoffPolicy::default(),
            "LLM completion",
            Self::is_transient,
            || async {
                let resp = self
                    .client
                    .post(&url)
                    .header("Authorization", format!("Bearer {}", self.api_key))
                    .json(&payload)
                    .send()
                    .await?;

                let status = resp.status();
                if status.as_u16() == 429 || status.is_server_error() {
                    return Err(MedraError::Transient {
                        attempts: 0,
                        reason: format!("LLM endpoint returned {status}"),
                    });
                }
                if !status.is_success() {
                    let text = resp.text().await.unwrap_or_default();
                    return Err(MedraError::fatal(format!("LLM request failed ({status}): {text}")));
                }

                let completion: CompletionResponse = resp.json().await?;
                completion
                    .choices
                    .into_iter()
                    .next()
                    .map(|c| c.message.content)
                    .ok_or_else(|| MedraError::patch("LLM response had no choices"))
            },
        )
        .await
    }
}
