//! Model backends for voxagent.
//!
//! This crate provides trait-based abstractions for the two remote
//! collaborators of a session: speech-to-text ([`Transcriber`]) and a tool
//! calling chat model ([`ChatModel`]), with HTTP implementations for OpenAI
//! and Anthropic.

mod anthropic;
mod openai;

use async_trait::async_trait;
pub use anthropic::{AnthropicClient, AnthropicConfig};
pub use openai::{OpenAIClient, OpenAIConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use voxagent_core::{ChatMessage, ChatResponse, ToolDefinition};

/// Errors that can occur during transcription.
#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("No API key configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Transcription failed: {0}")]
    TranscriptionFailed(String),
}

/// Errors that can occur during a chat request.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("No API key configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

/// Result type for transcription operations.
pub type Result<T> = std::result::Result<T, TranscribeError>;

/// What a transcription backend heard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub confidence: f32,
    pub language: String,
    /// Wall time of the request
    pub duration_ms: u64,
}

/// Trait for transcription backends.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe audio to text.
    ///
    /// # Arguments
    /// * `audio` - Encoded audio (WAV, WebM, ...)
    /// * `mime_type` - Content type of `audio`, e.g. `audio/wav`
    async fn transcribe(&self, audio: &[u8], mime_type: &str) -> Result<Transcript>;

    /// Returns the name of this transcriber for logging/debugging.
    fn name(&self) -> &str;
}

/// Trait for chat backends that may answer with tool calls.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Send an ordered conversation, advertising `tools` the model may call.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> std::result::Result<ChatResponse, ChatError>;

    /// Returns the name of this backend for logging/debugging.
    fn name(&self) -> &str;
}

/// Builds the shared HTTP client, honoring an optional request timeout.
fn http_client(timeout: Option<std::time::Duration>) -> reqwest::Client {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().unwrap_or_else(|e| {
        tracing::warn!("Failed to build HTTP client with timeout, using defaults: {}", e);
        reqwest::Client::new()
    })
}

/// Pull the vendor's error message out of an error body, if it has one.
fn vendor_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .pointer("/error/message")
        .and_then(|m| m.as_str())
        .map(str::to_owned)
}
