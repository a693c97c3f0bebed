//! JSON-RPC 2.0 client for the remote tool gateway.
//!
//! The gateway exposes `tools/list` and `tools/call` over plain HTTP POST;
//! responses arrive either as raw JSON or framed as a single Server-Sent
//! Events `data:` line, so both are accepted. Failures carry a typed kind:
//! the executor's retry policy keys off `GatewayError::is_unavailable()`
//! rather than matching error prose.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

const JSONRPC_VERSION: &str = "2.0";
const TOOLS_LIST_REQUEST_ID: &str = "murmur-tools-list";
const TOOLS_CALL_REQUEST_ID: &str = "murmur-tools-call";
const DEFAULT_TIMEOUT_MS: u64 = 60_000;
const ERROR_BODY_MAX_CHARS: usize = 300;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gateway returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("gateway rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("invalid gateway response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// Transient-unavailability classification. Transport failures and
    /// overload/server status codes are worth a bounded retry; RPC-level
    /// errors and malformed payloads are not.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Http(error) => {
                error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
            }
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Rpc { .. } | Self::InvalidResponse(_) => false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
/// One tool advertised by the gateway catalog.
pub struct GatewayTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

#[async_trait]
/// Seam between the task executor and the concrete gateway transport.
pub trait ToolGateway: Send + Sync {
    fn available_tools(&self) -> &[GatewayTool];
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, GatewayError>;
}

pub struct GatewayClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    tools: Vec<GatewayTool>,
}

impl GatewayClient {
    /// Connect to the gateway and load its tool catalog.
    pub async fn connect(
        endpoint: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .build()?;
        let mut client = Self {
            http,
            endpoint: endpoint.into(),
            api_key,
            tools: Vec::new(),
        };

        let result = client
            .post_rpc(TOOLS_LIST_REQUEST_ID, "tools/list", json!({}))
            .await?;
        let listing: ToolsListResult = serde_json::from_value(result)
            .map_err(|e| GatewayError::InvalidResponse(format!("tools/list payload: {e}")))?;
        tracing::info!(tools = listing.tools.len(), "connected to tool gateway");
        client.tools = listing.tools;
        Ok(client)
    }

    async fn post_rpc(
        &self,
        request_id: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, GatewayError> {
        let body = json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": request_id,
            "method": method,
            "params": params,
        });

        let mut request = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        let raw = response.text().await?;
        if !status.is_success() {
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body: raw.chars().take(ERROR_BODY_MAX_CHARS).collect(),
            });
        }

        let payload = parse_sse_payload(&raw)?;
        let envelope: RpcEnvelope = serde_json::from_value(payload)
            .map_err(|e| GatewayError::InvalidResponse(format!("rpc envelope: {e}")))?;
        if let Some(error) = envelope.error {
            return Err(GatewayError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        envelope
            .result
            .ok_or_else(|| GatewayError::InvalidResponse("rpc envelope had no result".to_string()))
    }
}

#[async_trait]
impl ToolGateway for GatewayClient {
    fn available_tools(&self) -> &[GatewayTool] {
        &self.tools
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, GatewayError> {
        tracing::debug!(tool = name, "calling gateway tool");
        self.post_rpc(
            TOOLS_CALL_REQUEST_ID,
            "tools/call",
            json!({ "name": name, "arguments": arguments }),
        )
        .await
    }
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ToolsListResult {
    #[serde(default)]
    tools: Vec<GatewayTool>,
}

/// Accept either a bare JSON body or an SSE-framed one (`data: {...}`).
fn parse_sse_payload(raw: &str) -> Result<Value, GatewayError> {
    for line in raw.lines() {
        if let Some(data) = line.strip_prefix("data: ") {
            return serde_json::from_str(data)
                .map_err(|e| GatewayError::InvalidResponse(format!("sse data line: {e}")));
        }
    }

    serde_json::from_str(raw.trim()).map_err(|_| {
        let preview: String = raw.chars().take(100).collect();
        GatewayError::InvalidResponse(format!("unparseable gateway payload: {preview}"))
    })
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::{parse_sse_payload, GatewayClient, GatewayError, ToolGateway};

    #[test]
    fn sse_payload_accepts_both_framings() {
        let framed = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"result\":1}\n\n";
        let parsed = parse_sse_payload(framed).expect("framed");
        assert_eq!(parsed["result"], json!(1));

        let bare = "{\"jsonrpc\":\"2.0\",\"result\":2}";
        let parsed = parse_sse_payload(bare).expect("bare");
        assert_eq!(parsed["result"], json!(2));

        assert!(parse_sse_payload("not json at all").is_err());
    }

    #[test]
    fn unavailability_is_a_function_of_the_error_kind() {
        let overloaded = GatewayError::Status {
            status: 503,
            body: "busy".to_string(),
        };
        assert!(overloaded.is_unavailable());

        let rate_limited = GatewayError::Status {
            status: 429,
            body: String::new(),
        };
        assert!(rate_limited.is_unavailable());

        let denied = GatewayError::Status {
            status: 401,
            body: String::new(),
        };
        assert!(!denied.is_unavailable());

        let rpc = GatewayError::Rpc {
            code: -32000,
            message: "tool exploded".to_string(),
        };
        assert!(!rpc.is_unavailable());
    }

    #[tokio::test]
    async fn connect_loads_tool_catalog() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .json_body_includes("{\"method\":\"tools/list\"}");
                then.status(200).json_body(json!({
                    "jsonrpc": "2.0",
                    "id": "murmur-tools-list",
                    "result": {
                        "tools": [
                            { "name": "calendar_create", "description": "create an event",
                              "inputSchema": { "type": "object", "properties": {} } }
                        ]
                    }
                }));
            })
            .await;

        let client = GatewayClient::connect(server.url("/rpc"), Some("key".to_string()))
            .await
            .expect("connect");
        assert_eq!(client.available_tools().len(), 1);
        assert_eq!(client.available_tools()[0].name, "calendar_create");
    }

    #[tokio::test]
    async fn call_tool_surfaces_rpc_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .json_body_includes("{\"method\":\"tools/list\"}");
                then.status(200).json_body(json!({
                    "jsonrpc": "2.0", "id": "murmur-tools-list", "result": { "tools": [] }
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .json_body_includes("{\"method\":\"tools/call\"}");
                then.status(200).json_body(json!({
                    "jsonrpc": "2.0",
                    "id": "murmur-tools-call",
                    "error": { "code": -32000, "message": "no such tool" }
                }));
            })
            .await;

        let client = GatewayClient::connect(server.url("/rpc"), None)
            .await
            .expect("connect");
        let error = client
            .call_tool("missing", json!({}))
            .await
            .expect_err("must fail");
        match error {
            GatewayError::Rpc { code, message } => {
                assert_eq!(code, -32000);
                assert_eq!(message, "no such tool");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
