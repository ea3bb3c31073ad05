//! OpenAI backends: Whisper transcription and chat completions.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use voxagent_core::{ChatMessage, ChatResponse, ToolCall, ToolDefinition};

use crate::{
    ChatError, ChatModel, Result, TranscribeError, Transcriber, Transcript, http_client,
    vendor_error_message,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TRANSCRIBE_MODEL: &str = "whisper-1";
const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Configuration for the OpenAI client.
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    /// OpenAI API key
    pub api_key: Option<String>,

    /// Transcription model (defaults to whisper-1)
    pub transcribe_model: Option<String>,

    /// Chat model (defaults to gpt-4o-mini)
    pub chat_model: Option<String>,

    /// Language hint for transcription
    pub language: Option<String>,

    /// Request timeout
    pub timeout: Option<Duration>,

    /// API root, for OpenAI compatible servers
    pub base_url: Option<String>,
}

impl OpenAIConfig {
    /// Create a new OpenAI config with the given API key.
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key,
            transcribe_model: None,
            chat_model: None,
            language: None,
            timeout: None,
            base_url: None,
        }
    }

    pub fn with_transcribe_model(mut self, model: Option<String>) -> Self {
        self.transcribe_model = model;
        self
    }

    pub fn with_chat_model(mut self, model: Option<String>) -> Self {
        self.chat_model = model;
        self
    }

    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn transcribe_model(&self) -> &str {
        self.transcribe_model
            .as_deref()
            .unwrap_or(DEFAULT_TRANSCRIBE_MODEL)
    }

    pub fn chat_model(&self) -> &str {
        self.chat_model.as_deref().unwrap_or(DEFAULT_CHAT_MODEL)
    }

    fn endpoint(&self, path: &str) -> String {
        let base = self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        format!("{}/{}", base.trim_end_matches('/'), path)
    }
}

/// OpenAI API client.
#[derive(Debug, Clone)]
pub struct OpenAIClient {
    client: reqwest::Client,
    config: OpenAIConfig,
}

#[derive(Debug, Deserialize)]
struct WhisperResponse {
    text: String,
    #[serde(default)]
    language: Option<String>,
}

impl OpenAIClient {
    /// Create a new OpenAI client with the given configuration.
    pub fn new(config: OpenAIConfig) -> Self {
        Self {
            client: http_client(config.timeout),
            config,
        }
    }

    fn api_key(&self) -> Option<&str> {
        self.config.api_key.as_deref().filter(|k| !k.is_empty())
    }
}

#[async_trait]
impl Transcriber for OpenAIClient {
    async fn transcribe(&self, audio: &[u8], mime_type: &str) -> Result<Transcript> {
        let api_key = self.api_key().ok_or(TranscribeError::NoApiKey)?;

        debug!(
            model = self.config.transcribe_model(),
            audio_bytes = audio.len(),
            mime_type,
            language = ?self.config.language,
            "Sending transcription request to OpenAI"
        );

        let started = Instant::now();
        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio.to_vec())
                    .file_name(format!("recording.{}", extension_for_mime(mime_type)))
                    .mime_str(mime_type)
                    .map_err(|e| TranscribeError::ApiError(e.to_string()))?,
            )
            .part(
                "model",
                reqwest::multipart::Part::text(self.config.transcribe_model().to_string()),
            )
            .part(
                "response_format",
                reqwest::multipart::Part::text("verbose_json"),
            );

        if let Some(lang) = &self.config.language {
            form = form.part("language", reqwest::multipart::Part::text(lang.clone()));
        }

        let response = self
            .client
            .post(self.config.endpoint("audio/transcriptions"))
            .header("Authorization", format!("Bearer {}", api_key))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = vendor_error_message(&body).unwrap_or(body);
            return Err(TranscribeError::ApiError(format!(
                "Whisper API returned {}: {}",
                status, message
            )));
        }

        let whisper_response: WhisperResponse = response
            .json()
            .await
            .map_err(|e| TranscribeError::TranscriptionFailed(e.to_string()))?;

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            duration_ms,
            text_len = whisper_response.text.len(),
            "transcription completed"
        );

        Ok(Transcript {
            text: whisper_response.text,
            confidence: 1.0,
            language: whisper_response
                .language
                .or_else(|| self.config.language.clone())
                .unwrap_or_default(),
            duration_ms,
        })
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[async_trait]
impl ChatModel for OpenAIClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> std::result::Result<ChatResponse, ChatError> {
        let api_key = self.api_key().ok_or(ChatError::NoApiKey)?;
        let body = chat_request_body(self.config.chat_model(), messages, tools);

        debug!(
            model = self.config.chat_model(),
            messages = messages.len(),
            tools = tools.len(),
            "Sending chat request to OpenAI"
        );

        let response = self
            .client
            .post(self.config.endpoint("chat/completions"))
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = vendor_error_message(&body).unwrap_or(body);
            return Err(ChatError::ApiError(format!(
                "OpenAI API returned {}: {}",
                status, message
            )));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| ChatError::MalformedResponse(e.to_string()))?;

        info!(
            model = self.config.chat_model(),
            prompt_tokens = data.pointer("/usage/prompt_tokens").and_then(serde_json::Value::as_u64),
            completion_tokens = data.pointer("/usage/completion_tokens").and_then(serde_json::Value::as_u64),
            "OpenAI chat completed"
        );

        parse_chat_response(&data)
    }

    fn name(&self) -> &str {
        "openai"
    }
}

fn chat_request_body(model: &str, messages: &[ChatMessage], tools: &[ToolDefinition]) -> Value {
    let mut body = json!({
        "model": model,
        "max_tokens": DEFAULT_MAX_TOKENS,
        "messages": messages,
    });

    if !tools.is_empty() {
        body["tools"] = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
    }

    body
}

fn parse_chat_response(data: &Value) -> std::result::Result<ChatResponse, ChatError> {
    let message = data
        .pointer("/choices/0/message")
        .ok_or_else(|| ChatError::MalformedResponse("response has no choices".into()))?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map(str::to_owned);

    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| calls.iter().filter_map(parse_tool_call).collect())
        .unwrap_or_default();

    Ok(ChatResponse {
        content,
        tool_calls,
    })
}

fn parse_tool_call(call: &Value) -> Option<ToolCall> {
    let id = call.get("id").and_then(Value::as_str).unwrap_or_default();
    let name = call.pointer("/function/name").and_then(Value::as_str)?;
    let raw = call
        .pointer("/function/arguments")
        .and_then(Value::as_str)
        .unwrap_or("{}");

    // Undecodable arguments are passed through so the tool reports the error
    // for this call alone.
    let arguments = serde_json::from_str(raw).unwrap_or_else(|e| {
        warn!(tool = name, error = %e, "tool call arguments are not valid JSON");
        Value::String(raw.to_owned())
    });

    Some(ToolCall {
        id: id.to_owned(),
        name: name.to_owned(),
        arguments,
    })
}

fn extension_for_mime(mime_type: &str) -> &'static str {
    let base = mime_type.split(';').next().unwrap_or_default().trim();
    match base {
        "audio/wav" | "audio/x-wav" => "wav",
        "audio/mp3" | "audio/mpeg" => "mp3",
        "audio/ogg" => "ogg",
        "audio/flac" => "flac",
        "audio/m4a" | "audio/mp4" => "m4a",
        _ => "webm",
    }
}
