//! Chat completion client
//!
//! Sends the conversation so far to a remote chat completion endpoint and
//! returns a single reply turn plus token usage. Every failure is terminal for
//! the call: nothing here retries.

mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::Role;

pub use openai::{DEFAULT_BASE_URL, DEFAULT_MODEL, OpenAiChatClient};

/// Produces the bearer credential; evaluated on every request
pub type CredentialSource = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// One message on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Token accounting reported by the endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// A successful completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatCompletion {
    /// Response identifier assigned by the endpoint
    pub id: String,
    /// Unix timestamp of creation, when reported
    pub created: Option<i64>,
    /// First choice's message
    pub message: ChatMessage,
    pub usage: Usage,
}

/// Why a completion call failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompletionError {
    /// No credential available to authenticate the request
    #[error("no API credential configured")]
    MissingCredential,

    /// Network-level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Endpoint answered with a status outside 2xx
    #[error("request rejected with status {status}: {body}")]
    RequestRejected { status: u16, body: String },

    /// Body did not parse or lacked a required field
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// Remote chat completion endpoint
#[async_trait]
pub trait ChatCompletionClient: Send + Sync {
    /// Send `messages` in order and return the first choice
    ///
    /// # Errors
    ///
    /// Returns a [`CompletionError`] describing the failure; callers decide
    /// whether to try again
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
    ) -> std::result::Result<ChatCompletion, CompletionError>;
}
