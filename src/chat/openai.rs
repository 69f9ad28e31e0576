//! `OpenAI`-compatible chat completions over HTTPS

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ChatCompletion, ChatCompletionClient, ChatMessage, CompletionError, CredentialSource, Usage};
use crate::{Error, Result};

/// Default API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default model identifier
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct CompletionResponse {
    id: String,
    #[serde(default)]
    created: Option<i64>,
    usage: Usage,
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: ChatMessage,
}

/// Chat completion client for the `/chat/completions` endpoint
pub struct OpenAiChatClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    credential: CredentialSource,
}

impl OpenAiChatClient {
    /// Create a client for `base_url` using a fixed `model`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        timeout: Duration,
        credential: CredentialSource,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.into(),
            credential,
        })
    }

    /// Model identifier sent with every request
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ChatCompletionClient for OpenAiChatClient {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
    ) -> std::result::Result<ChatCompletion, CompletionError> {
        let api_key = (self.credential)()
            .filter(|k| !k.is_empty())
            .ok_or(CompletionError::MissingCredential)?;

        tracing::debug!(
            model = %self.model,
            messages = messages.len(),
            "sending chat completion request"
        );

        let request = CompletionRequest {
            model: &self.model,
            messages: &messages,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "chat completion request failed");
                CompletionError::Transport(e.to_string())
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat completion rejected");
            return Err(CompletionError::RequestRejected {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        let parsed: CompletionResponse = serde_json::from_str(&body).map_err(|e| {
            tracing::error!(error = %e, "failed to parse chat completion response");
            CompletionError::MalformedResponse(e.to_string())
        })?;

        let message = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| CompletionError::MalformedResponse("no choices".to_string()))?;

        tracing::info!(
            id = %parsed.id,
            total_tokens = parsed.usage.total_tokens,
            "chat completion received"
        );

        Ok(ChatCompletion {
            id: parsed.id,
            created: parsed.created,
            message,
            usage: parsed.usage,
        })
    }
}
