//! Generator backed by an OpenAI-compatible chat completion endpoint.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use hardloop_core::{GenerationRequest, Generator};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::GeneratorConfig;
use crate::error::Result;
use crate::prompt::{render, SYSTEM_PROMPT};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat completion client
pub struct ChatGenerator {
    config: GeneratorConfig,
    api_key: String,
    http_client: reqwest::Client,
}

impl ChatGenerator {
    /// Create a client; fails when no API key can be resolved.
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        let api_key = config.resolve_api_key()?;
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("hardloop/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(ChatGenerator {
            config,
            api_key,
            http_client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    /// Send one conversation and return the first choice's text.
    pub async fn complete(&self, messages: Vec<ChatMessage>) -> anyhow::Result<String> {
        let body = ChatRequest {
            model: &self.config.model,
            temperature: self.config.temperature,
            messages,
        };

        let response = self
            .http_client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("request to {} failed", self.endpoint()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("chat completion returned {status}: {}", text.trim());
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("malformed chat completion response")?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .context("chat completion returned no content")
    }
}

#[async_trait]
impl Generator for ChatGenerator {
    async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<String> {
        debug!(
            task = %request.task,
            round = request.round,
            model = %self.config.model,
            "requesting generation"
        );
        self.complete(vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(render(request)),
        ])
        .await
    }
}
