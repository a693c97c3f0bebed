use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::sleep;

use crate::{
    retry::{is_retryable_http_error, parse_retry_after_ms, retry_delay_ms, should_retry_status},
    AiError, ChatRequest, ChatResponse, ChatUsage, ContentBlock, LlmClient, Message, MessageRole,
};

const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_base: String,
    pub api_key: String,
    pub request_timeout_ms: u64,
    pub max_retries: usize,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_base: "https://api.anthropic.com/v1".to_string(),
            api_key: api_key.into(),
            request_timeout_ms: 120_000,
            max_retries: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    client: reqwest::Client,
    config: AnthropicConfig,
}

impl AnthropicClient {
    pub fn new(config: AnthropicConfig) -> Result<Self, AiError> {
        if config.api_key.trim().is_empty() {
            return Err(AiError::MissingApiKey);
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(config.api_key.trim())
                .map_err(|e| AiError::InvalidResponse(format!("invalid API key header: {e}")))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_millis(
                config.request_timeout_ms.max(1),
            ))
            .build()?;

        Ok(Self { client, config })
    }

    fn messages_url(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        if base.ends_with("/messages") {
            return base.to_string();
        }
        format!("{base}/messages")
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, AiError> {
        let body = build_messages_request_body(&request);
        let url = self.messages_url();
        let max_retries = self.config.max_retries;

        for attempt in 0..=max_retries {
            let response = self.client.post(&url).json(&body).send().await;

            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let raw = response.text().await?;
                        return parse_messages_response(&raw);
                    }

                    let retry_after_ms = parse_retry_after_ms(response.headers());
                    let raw = response.text().await?;
                    if attempt < max_retries && should_retry_status(status.as_u16()) {
                        let backoff_ms = retry_delay_ms(attempt, retry_after_ms);
                        sleep(std::time::Duration::from_millis(backoff_ms)).await;
                        continue;
                    }

                    return Err(AiError::HttpStatus {
                        status: status.as_u16(),
                        body: raw,
                    });
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_http_error(&error) {
                        let backoff_ms = retry_delay_ms(attempt, None);
                        sleep(std::time::Duration::from_millis(backoff_ms)).await;
                        continue;
                    }
                    return Err(AiError::Http(error));
                }
            }
        }

        Err(AiError::InvalidResponse(
            "request retry loop terminated unexpectedly".to_string(),
        ))
    }
}

fn build_messages_request_body(request: &ChatRequest) -> Value {
    let system = extract_system_text(&request.messages);
    let messages = to_anthropic_messages(&request.messages);

    let mut body = json!({
        "model": request.model,
        "messages": messages,
        "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
    });

    if request.json_mode {
        let mut segments = vec![
            "Respond with valid JSON only. Do not include markdown code fences or commentary."
                .to_string(),
        ];
        if !system.is_empty() {
            segments.push(system);
        }
        body["system"] = json!(segments.join("\n\n"));
    } else if !system.is_empty() {
        body["system"] = json!(system);
    }

    if !request.tools.is_empty() {
        body["tools"] = Value::Array(
            request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "input_schema": tool.parameters,
                    })
                })
                .collect(),
        );
    }

    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }

    body
}

fn extract_system_text(messages: &[Message]) -> String {
    messages
        .iter()
        .filter(|message| message.role == MessageRole::System)
        .map(Message::text_content)
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn to_anthropic_messages(messages: &[Message]) -> Vec<Value> {
    let mut rendered = Vec::new();
    for message in messages {
        match message.role {
            MessageRole::System => {}
            MessageRole::User => {
                rendered.push(json!({
                    "role": "user",
                    "content": [{ "type": "text", "text": message.text_content() }],
                }));
            }
            MessageRole::Assistant => {
                let blocks: Vec<Value> = message
                    .content
                    .iter()
                    .map(|block| match block {
                        ContentBlock::Text { text } => json!({ "type": "text", "text": text }),
                        ContentBlock::ToolCall {
                            id,
                            name,
                            arguments,
                        } => json!({
                            "type": "tool_use",
                            "id": id,
                            "name": name,
                            "input": arguments,
                        }),
                    })
                    .collect();
                rendered.push(json!({ "role": "assistant", "content": blocks }));
            }
            MessageRole::Tool => {
                let tool_use_id = message.tool_call_id.clone().unwrap_or_default();
                rendered.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": tool_use_id,
                        "content": message.text_content(),
                        "is_error": message.is_error,
                    }],
                }));
            }
        }
    }
    rendered
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<MessagesContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<MessagesUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum MessagesContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize, Default)]
struct MessagesUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

fn parse_messages_response(raw: &str) -> Result<ChatResponse, AiError> {
    let parsed: MessagesResponse = serde_json::from_str(raw)?;

    let mut blocks = Vec::new();
    for block in parsed.content {
        match block {
            MessagesContentBlock::Text { text } => blocks.push(ContentBlock::Text { text }),
            MessagesContentBlock::ToolUse { id, name, input } => {
                blocks.push(ContentBlock::ToolCall {
                    id,
                    name,
                    arguments: input,
                });
            }
            MessagesContentBlock::Unknown => {}
        }
    }

    if blocks.is_empty() {
        return Err(AiError::InvalidResponse(
            "messages response carried no usable content blocks".to_string(),
        ));
    }

    let usage = parsed.usage.unwrap_or_default();
    Ok(ChatResponse {
        message: Message::assistant_blocks(blocks),
        finish_reason: parsed.stop_reason,
        usage: ChatUsage {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            total_tokens: usage.input_tokens + usage.output_tokens,
        },
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{build_messages_request_body, parse_messages_response};
    use crate::{ChatRequest, ContentBlock, Message, ToolDefinition};

    fn request_with(messages: Vec<Message>, tools: Vec<ToolDefinition>) -> ChatRequest {
        ChatRequest {
            model: "claude-3-5-sonnet-20240620".to_string(),
            messages,
            tools,
            max_tokens: Some(1024),
            temperature: Some(0.3),
            json_mode: false,
        }
    }

    #[test]
    fn body_extracts_system_and_maps_tools() {
        let request = request_with(
            vec![Message::system("be useful"), Message::user("do a thing")],
            vec![ToolDefinition {
                name: "calendar_create".to_string(),
                description: "create an event".to_string(),
                parameters: json!({ "type": "object", "properties": {} }),
            }],
        );
        let body = build_messages_request_body(&request);
        assert_eq!(body["system"], json!("be useful"));
        assert_eq!(body["messages"].as_array().map(Vec::len), Some(1));
        assert_eq!(body["tools"][0]["name"], json!("calendar_create"));
        assert_eq!(body["temperature"], json!(0.3));
    }

    #[test]
    fn json_mode_strengthens_system_prompt() {
        let mut request = request_with(vec![Message::user("summarize")], Vec::new());
        request.json_mode = true;
        let body = build_messages_request_body(&request);
        let system = body["system"].as_str().expect("system string");
        assert!(system.contains("valid JSON only"));
    }

    #[test]
    fn tool_results_round_trip_as_user_blocks() {
        let request = request_with(
            vec![
                Message::user("go"),
                Message::assistant_blocks(vec![ContentBlock::ToolCall {
                    id: "tu_1".to_string(),
                    name: "web_search".to_string(),
                    arguments: json!({ "query": "weather" }),
                }]),
                Message::tool_result("tu_1", "web_search", "{\"ok\":true}", false),
            ],
            Vec::new(),
        );
        let body = build_messages_request_body(&request);
        let messages = body["messages"].as_array().expect("messages");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["content"][0]["type"], json!("tool_use"));
        assert_eq!(messages[2]["content"][0]["type"], json!("tool_result"));
        assert_eq!(messages[2]["content"][0]["tool_use_id"], json!("tu_1"));
    }

    #[test]
    fn parses_text_and_tool_use_content() {
        let raw = json!({
            "content": [
                { "type": "text", "text": "working on it" },
                { "type": "tool_use", "id": "tu_9", "name": "send_message", "input": { "to": "me" } }
            ],
            "stop_reason": "tool_use",
            "usage": { "input_tokens": 10, "output_tokens": 4 }
        })
        .to_string();

        let response = parse_messages_response(&raw).expect("parse");
        assert_eq!(response.finish_reason.as_deref(), Some("tool_use"));
        assert_eq!(response.message.tool_calls().len(), 1);
        assert_eq!(response.message.text_content(), "working on it");
        assert_eq!(response.usage.total_tokens, 14);
    }

    #[test]
    fn empty_content_is_an_invalid_response() {
        let raw = json!({ "content": [], "stop_reason": "end_turn" }).to_string();
        assert!(parse_messages_response(&raw).is_err());
    }
}
