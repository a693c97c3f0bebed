//! OpenAI-compatible chat-completions client.
//!
//! Covers both api.openai.com and OpenRouter: the base URL, extra headers,
//! and whether the endpoint honors `response_format` are all configuration.
//! Tool calling is not wired here; the extraction adapter only needs plain
//! completions.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::sleep;

use crate::{
    retry::{is_retryable_http_error, parse_retry_after_ms, retry_delay_ms, should_retry_status},
    AiError, ChatRequest, ChatResponse, ChatUsage, LlmClient, Message, MessageRole,
};

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_base: String,
    pub api_key: String,
    pub request_timeout_ms: u64,
    pub max_retries: usize,
    /// Extra headers some gateways want (OpenRouter's `X-Title`, etc.).
    pub extra_headers: Vec<(String, String)>,
    /// Whether the endpoint supports `response_format: json_object`.
    pub supports_json_response_format: bool,
}

impl OpenAiConfig {
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: api_key.into(),
            request_timeout_ms: 60_000,
            max_retries: 2,
            extra_headers: Vec::new(),
            supports_json_response_format: true,
        }
    }

    pub fn openrouter(api_key: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            api_base: "https://openrouter.ai/api/v1".to_string(),
            api_key: api_key.into(),
            request_timeout_ms: 60_000,
            max_retries: 2,
            extra_headers: vec![("X-Title".to_string(), title.into())],
            supports_json_response_format: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self, AiError> {
        if config.api_key.trim().is_empty() {
            return Err(AiError::MissingApiKey);
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = format!("Bearer {}", config.api_key.trim());
        headers.insert(
            reqwest::header::AUTHORIZATION,
            HeaderValue::from_str(&bearer)
                .map_err(|e| AiError::InvalidResponse(format!("invalid API key header: {e}")))?,
        );
        for (name, value) in &config.extra_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| AiError::InvalidResponse(format!("invalid header name: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| AiError::InvalidResponse(format!("invalid header value: {e}")))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_millis(
                config.request_timeout_ms.max(1),
            ))
            .build()?;

        Ok(Self { client, config })
    }

    fn completions_url(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        format!("{base}/chat/completions")
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, AiError> {
        let body = build_completions_request_body(&request, &self.config);
        let url = self.completions_url();
        let max_retries = self.config.max_retries;

        for attempt in 0..=max_retries {
            let response = self.client.post(&url).json(&body).send().await;

            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let raw = response.text().await?;
                        return parse_completions_response(&raw);
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

fn build_completions_request_body(request: &ChatRequest, config: &OpenAiConfig) -> Value {
    let messages: Vec<Value> = request
        .messages
        .iter()
        .map(|message| {
            json!({
                "role": role_label(message),
                "content": message.text_content(),
            })
        })
        .collect();

    let mut body = json!({
        "model": request.model,
        "messages": messages,
    });
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if request.json_mode && config.supports_json_response_format {
        body["response_format"] = json!({ "type": "json_object" });
    }
    body
}

fn role_label(message: &Message) -> &'static str {
    match message.role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::Tool => "tool",
    }
}

#[derive(Debug, Deserialize)]
struct CompletionsResponse {
    #[serde(default)]
    choices: Vec<CompletionsChoice>,
    #[serde(default)]
    usage: Option<CompletionsUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionsChoice {
    message: CompletionsMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionsMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CompletionsUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

fn parse_completions_response(raw: &str) -> Result<ChatResponse, AiError> {
    let parsed: CompletionsResponse = serde_json::from_str(raw)?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| AiError::InvalidResponse("completions response had no choices".to_string()))?;
    let content = choice.message.content.unwrap_or_default();
    let usage = parsed.usage.unwrap_or_default();

    Ok(ChatResponse {
        message: Message::assistant_text(content),
        finish_reason: choice.finish_reason,
        usage: ChatUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        },
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{build_completions_request_body, parse_completions_response, OpenAiConfig};
    use crate::{ChatRequest, Message};

    fn request() -> ChatRequest {
        ChatRequest {
            model: "gpt-4.1".to_string(),
            messages: vec![Message::system("extract tasks"), Message::user("transcript")],
            tools: Vec::new(),
            max_tokens: None,
            temperature: Some(0.2),
            json_mode: true,
        }
    }

    #[test]
    fn response_format_follows_endpoint_support() {
        let openai = build_completions_request_body(&request(), &OpenAiConfig::openai("k"));
        assert_eq!(openai["response_format"]["type"], json!("json_object"));

        let openrouter =
            build_completions_request_body(&request(), &OpenAiConfig::openrouter("k", "murmur"));
        assert!(openrouter.get("response_format").is_none());
    }

    #[test]
    fn parses_first_choice_content_and_usage() {
        let raw = json!({
            "choices": [
                { "message": { "content": "{\"tasks\":[]}" }, "finish_reason": "stop" }
            ],
            "usage": { "prompt_tokens": 20, "completion_tokens": 5, "total_tokens": 25 }
        })
        .to_string();

        let response = parse_completions_response(&raw).expect("parse");
        assert_eq!(response.message.text_content(), "{\"tasks\":[]}");
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
        assert_eq!(response.usage.total_tokens, 25);
    }

    #[test]
    fn missing_choices_is_an_invalid_response() {
        let raw = json!({ "choices": [] }).to_string();
        assert!(parse_completions_response(&raw).is_err());
    }
}
