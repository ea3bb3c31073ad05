//! Anthropic messages API chat backend.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info};
use voxagent_core::{ChatMessage, ChatResponse, Role, ToolCall, ToolDefinition};

use crate::{ChatError, ChatModel, http_client, vendor_error_message};

const MESSAGES_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Configuration for the Anthropic chat client.
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub timeout: Option<Duration>,
}

impl AnthropicConfig {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key,
            model: None,
            timeout: None,
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }
}

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    client: reqwest::Client,
    config: AnthropicConfig,
}

impl AnthropicClient {
    pub fn new(config: AnthropicConfig) -> Self {
        Self {
            client: http_client(config.timeout),
            config,
        }
    }
}

#[async_trait]
impl ChatModel for AnthropicClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse, ChatError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(ChatError::NoApiKey)?;
        let body = messages_request_body(self.config.model(), messages, tools);

        debug!(
            model = self.config.model(),
            messages = messages.len(),
            tools = tools.len(),
            "Sending chat request to Anthropic"
        );

        let response = self
            .client
            .post(MESSAGES_ENDPOINT)
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = vendor_error_message(&body).unwrap_or(body);
            return Err(ChatError::ApiError(format!(
                "Anthropic API returned {}: {}",
                status, message
            )));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| ChatError::MalformedResponse(e.to_string()))?;

        info!(
            model = self.config.model(),
            input_tokens = data.pointer("/usage/input_tokens").and_then(serde_json::Value::as_u64),
            output_tokens = data.pointer("/usage/output_tokens").and_then(serde_json::Value::as_u64),
            "Anthropic chat completed"
        );

        parse_messages_response(&data)
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

/// The messages API takes the system prompt out of band and has no `tool`
/// role, so tool results are folded into user turns.
fn messages_request_body(model: &str, messages: &[ChatMessage], tools: &[ToolDefinition]) -> Value {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();

    let turns: Vec<Value> = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| match m.role {
            Role::Tool => json!({
                "role": "user",
                "content": format!(
                    "Tool result ({}): {}",
                    m.tool_call_id.as_deref().unwrap_or_default(),
                    m.content
                ),
            }),
            Role::Assistant => json!({"role": "assistant", "content": m.content}),
            _ => json!({"role": "user", "content": m.content}),
        })
        .collect();

    let mut body = json!({
        "model": model,
        "max_tokens": DEFAULT_MAX_TOKENS,
        "messages": turns,
    });

    if !system.is_empty() {
        body["system"] = Value::String(system.join("\n\n"));
    }

    if !tools.is_empty() {
        body["tools"] = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect();
    }

    body
}

fn parse_messages_response(data: &Value) -> Result<ChatResponse, ChatError> {
    let blocks = data
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| ChatError::MalformedResponse("response has no content blocks".into()))?;

    let mut text: Option<String> = None;
    let mut tool_calls = Vec::new();

    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(t) = block.get("text").and_then(Value::as_str) {
                    text = Some(t.to_owned());
                }
            }
            Some("tool_use") => tool_calls.push(ToolCall {
                id: block
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
                name: block
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
                arguments: block.get("input").cloned().unwrap_or_else(|| json!({})),
            }),
            _ => {}
        }
    }

    Ok(ChatResponse {
        content: text.filter(|t| !t.is_empty()),
        tool_calls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_is_lifted_out() {
        let messages = vec![
            ChatMessage::system("You are a desktop assistant."),
            ChatMessage::user("open notes"),
            ChatMessage::tool("toolu_1", r#"{"success":true}"#),
        ];

        let body = messages_request_body("claude-test", &messages, &[]);

        assert_eq!(body["system"], "You are a desktop assistant.");
        let turns = body["messages"].as_array().unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0]["role"], "user");
        assert_eq!(turns[1]["role"], "user");
        assert_eq!(
            turns[1]["content"],
            r#"Tool result (toolu_1): {"success":true}"#
        );
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_tools_use_input_schema() {
        let tools = vec![ToolDefinition {
            name: "list_dir".into(),
            description: "List a directory".into(),
            parameters: json!({"type": "object", "required": ["path"]}),
        }];
        let body = messages_request_body("m", &[ChatMessage::user("ls")], &tools);
        assert_eq!(body["tools"][0]["name"], "list_dir");
        assert_eq!(body["tools"][0]["input_schema"]["required"][0], "path");
    }

    #[test]
    fn test_parse_tool_use_blocks() {
        let data = json!({
            "content": [
                {"type": "text", "text": "Opening it now."},
                {"type": "tool_use", "id": "toolu_1", "name": "open_url", "input": {"url": "https://example.com"}}
            ]
        });

        let response = parse_messages_response(&data).unwrap();

        assert_eq!(response.content.as_deref(), Some("Opening it now."));
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].id, "toolu_1");
        assert_eq!(response.tool_calls[0].arguments["url"], "https://example.com");
    }

    #[test]
    fn test_parse_without_content_is_malformed() {
        assert!(matches!(
            parse_messages_response(&json!({"type": "error"})),
            Err(ChatError::MalformedResponse(_))
        ));
    }
}
