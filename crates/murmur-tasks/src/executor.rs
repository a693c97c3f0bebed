//! Agent-backed task execution: a bounded tool-calling loop against the
//! gateway catalog, with bounded retry for transient gateway outages.

use std::sync::Arc;
use std::time::Duration;

use murmur_ai::{AiError, ChatRequest, LlmClient, Message, ToolDefinition};
use murmur_gateway::{GatewayError, ToolGateway};
use serde::Deserialize;
use thiserror::Error;
use tokio::time::sleep;

use crate::CandidateTask;

/// Upper bound on model⇄tool round trips for one task.
pub const MAX_TOOL_ITERATIONS: usize = 5;

/// Backoff schedule applied when the execution backend is transiently
/// unavailable. Exhausting it converts the failure into a per-task error.
pub const TRANSIENT_RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
];

const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an agent that carries out the to-do task the user hands you.
Use the tools listed below where they help, then write a short execution report describing what you did and what came out of it.

Available tools:
{tools}

The report is posted as a chat message, so keep it compact, use line breaks, and include links where useful. If none of the tools fit the task, say so plainly in the report.

Always answer with JSON of this exact shape:
{
  "task_report": "..."
}"#;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("execution model error: {0}")]
    Ai(#[from] AiError),
    #[error("tool gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("task execution did not produce a usable result")]
    NoResult,
}

impl ExecutorError {
    /// Retry eligibility is a pure function of the typed error kind; no
    /// message-text matching.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Ai(error) => error.is_transient(),
            Self::Gateway(error) => error.is_unavailable(),
            Self::NoResult => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Successful outcome of one task execution.
pub struct ExecutionReport {
    pub report: String,
}

#[derive(Debug, Error)]
#[error("{error}")]
/// Terminal failure of one task execution, with the number of transient
/// retries that were burned before giving up.
pub struct ExecutionFailure {
    pub error: ExecutorError,
    pub retries: u32,
}

#[derive(Debug, Deserialize)]
struct ReportEnvelope {
    task_report: String,
}

/// Phrasings the execution model uses when the catalog has nothing that
/// fits the task. Matching report text is inherently brittle — if the
/// model's wording drifts this silently stops matching, and the outcome
/// notification reappears. Kept as the single named predicate so a
/// structured signal from the executor can replace it without touching the
/// cycle.
pub fn is_no_suitable_tool_report(report: &str) -> bool {
    const PHRASES: [&str; 4] = [
        "no suitable tool",
        "no appropriate tool",
        "none of the tools fit",
        "no available tool",
    ];
    let lowered = report.to_lowercase();
    PHRASES.iter().any(|phrase| lowered.contains(phrase))
}

/// Executes one task through the tool-calling loop.
pub struct TaskExecutor {
    llm: Arc<dyn LlmClient>,
    gateway: Arc<dyn ToolGateway>,
    model: String,
    system_prompt_override: Option<String>,
}

impl TaskExecutor {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        gateway: Arc<dyn ToolGateway>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            gateway,
            model: model.into(),
            system_prompt_override: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt_override = Some(prompt.into());
        self
    }

    /// Run the task, retrying transient backend outages on the fixed
    /// backoff schedule. Permanent failures surface immediately.
    pub async fn execute(&self, task: &CandidateTask) -> Result<ExecutionReport, ExecutionFailure> {
        let mut attempt = 0usize;
        loop {
            match self.run_tool_loop(task).await {
                Ok(report) => return Ok(report),
                Err(error) if error.is_transient() && attempt < TRANSIENT_RETRY_DELAYS.len() => {
                    let delay = TRANSIENT_RETRY_DELAYS[attempt];
                    attempt += 1;
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "execution backend unavailable, retrying"
                    );
                    sleep(delay).await;
                }
                Err(error) => {
                    return Err(ExecutionFailure {
                        error,
                        retries: attempt as u32,
                    })
                }
            }
        }
    }

    async fn run_tool_loop(&self, task: &CandidateTask) -> Result<ExecutionReport, ExecutorError> {
        let tools: Vec<ToolDefinition> = self
            .gateway
            .available_tools()
            .iter()
            .map(|tool| ToolDefinition {
                name: tool.name.clone(),
                description: tool.description.clone().unwrap_or_default(),
                parameters: tool.input_schema.clone(),
            })
            .collect();

        let system_prompt = self.render_system_prompt();
        let mut messages = vec![
            Message::system(system_prompt),
            Message::user(format!("Task: {}\nTime: {}", task.text, task.timestamp)),
        ];

        for iteration in 0..MAX_TOOL_ITERATIONS {
            let request = ChatRequest {
                model: self.model.clone(),
                messages: messages.clone(),
                tools: tools.clone(),
                max_tokens: Some(4096),
                temperature: Some(0.3),
                json_mode: false,
            };
            let response = self.llm.complete(request).await?;
            let finish_reason = response.finish_reason.as_deref().unwrap_or_default();
            tracing::debug!(iteration, finish_reason, "execution model responded");

            let tool_calls = response.message.tool_calls();
            if finish_reason == "tool_use" && !tool_calls.is_empty() {
                messages.push(response.message.clone());
                for call in tool_calls {
                    match self.gateway.call_tool(&call.name, call.arguments).await {
                        Ok(result) => {
                            messages.push(Message::tool_result(
                                call.id,
                                call.name,
                                result.to_string(),
                                false,
                            ));
                        }
                        Err(error) if error.is_unavailable() => {
                            // Backend outage mid-loop is retryable at the
                            // execute() level, not a tool-result payload.
                            return Err(error.into());
                        }
                        Err(error) => {
                            tracing::warn!(tool = %call.name, error = %error, "tool call failed");
                            messages.push(Message::tool_result(
                                call.id,
                                call.name,
                                serde_json::json!({ "error": error.to_string() }).to_string(),
                                true,
                            ));
                        }
                    }
                }
                continue;
            }

            if finish_reason == "end_turn" || finish_reason == "stop" {
                let text = response.message.text_content();
                if !text.trim().is_empty() {
                    return Ok(parse_report(&text));
                }
            }

            break;
        }

        Err(ExecutorError::NoResult)
    }

    fn render_system_prompt(&self) -> String {
        let tool_listing = self
            .gateway
            .available_tools()
            .iter()
            .map(|tool| {
                format!(
                    "- {}: {}",
                    tool.name,
                    tool.description.as_deref().unwrap_or("No description")
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        match &self.system_prompt_override {
            Some(prompt) => prompt.replace("{tools}", &tool_listing),
            None => DEFAULT_SYSTEM_PROMPT.replace("{tools}", &tool_listing),
        }
    }
}

fn parse_report(text: &str) -> ExecutionReport {
    let sanitized = crate::extractor::sanitize_json_output(text);
    match serde_json::from_str::<ReportEnvelope>(&sanitized) {
        Ok(envelope) => ExecutionReport {
            report: envelope.task_report,
        },
        // Not every model obeys the JSON instruction; the raw text is
        // still a usable report.
        Err(_) => ExecutionReport {
            report: text.trim().to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };

    use async_trait::async_trait;
    use murmur_ai::{
        AiError, ChatRequest, ChatResponse, ChatUsage, ContentBlock, LlmClient, Message,
    };
    use murmur_gateway::{GatewayError, GatewayTool, ToolGateway};
    use serde_json::{json, Value};

    use super::{is_no_suitable_tool_report, parse_report, ExecutorError, TaskExecutor};
    use crate::CandidateTask;

    struct ScriptedLlm {
        responses: Mutex<Vec<Result<ChatResponse, AiError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedLlm {
        fn new(responses: Vec<Result<ChatResponse, AiError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, _request: ChatRequest) -> Result<ChatResponse, AiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .expect("lock")
                .remove(0)
        }
    }

    struct StubGateway {
        tools: Vec<GatewayTool>,
        call_results: Mutex<Vec<Result<Value, GatewayError>>>,
    }

    #[async_trait]
    impl ToolGateway for StubGateway {
        fn available_tools(&self) -> &[GatewayTool] {
            &self.tools
        }

        async fn call_tool(&self, _name: &str, _args: Value) -> Result<Value, GatewayError> {
            self.call_results.lock().expect("lock").remove(0)
        }
    }

    fn text_response(text: &str, finish_reason: &str) -> ChatResponse {
        ChatResponse {
            message: Message::assistant_text(text),
            finish_reason: Some(finish_reason.to_string()),
            usage: ChatUsage::default(),
        }
    }

    fn tool_use_response() -> ChatResponse {
        ChatResponse {
            message: Message::assistant_blocks(vec![ContentBlock::ToolCall {
                id: "tu_1".to_string(),
                name: "calendar_create".to_string(),
                arguments: json!({ "title": "renew passport" }),
            }]),
            finish_reason: Some("tool_use".to_string()),
            usage: ChatUsage::default(),
        }
    }

    fn tool() -> GatewayTool {
        serde_json::from_value(json!({
            "name": "calendar_create",
            "description": "create an event",
            "inputSchema": { "type": "object", "properties": {} }
        }))
        .expect("tool")
    }

    fn task() -> CandidateTask {
        CandidateTask {
            source_id: "log-1".to_string(),
            text: "renew the passport".to_string(),
            timestamp: "2025-01-01T09:10:00+00:00".to_string(),
        }
    }

    #[tokio::test]
    async fn tool_loop_round_trips_and_parses_report() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Ok(tool_use_response()),
            Ok(text_response(
                r#"{"task_report":"Created the calendar event."}"#,
                "end_turn",
            )),
        ]));
        let gateway = Arc::new(StubGateway {
            tools: vec![tool()],
            call_results: Mutex::new(vec![Ok(json!({ "ok": true }))]),
        });

        let executor = TaskExecutor::new(llm.clone(), gateway, "test-model");
        let report = executor.execute(&task()).await.expect("execute");
        assert_eq!(report.report, "Created the calendar event.");
        assert_eq!(llm.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn tool_failures_feed_back_as_error_results() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Ok(tool_use_response()),
            Ok(text_response(
                r#"{"task_report":"The tool rejected the request."}"#,
                "end_turn",
            )),
        ]));
        let gateway = Arc::new(StubGateway {
            tools: vec![tool()],
            call_results: Mutex::new(vec![Err(GatewayError::Rpc {
                code: -32000,
                message: "tool exploded".to_string(),
            })]),
        });

        let executor = TaskExecutor::new(llm, gateway, "test-model");
        let report = executor.execute(&task()).await.expect("execute");
        assert_eq!(report.report, "The tool rejected the request.");
    }

    #[tokio::test(start_paused = true)]
    async fn transient_outages_retry_then_succeed() {
        let unavailable = || {
            Err::<ChatResponse, _>(AiError::HttpStatus {
                status: 503,
                body: "overloaded".to_string(),
            })
        };
        let llm = Arc::new(ScriptedLlm::new(vec![
            unavailable(),
            unavailable(),
            Ok(text_response(r#"{"task_report":"done"}"#, "end_turn")),
        ]));
        let gateway = Arc::new(StubGateway {
            tools: Vec::new(),
            call_results: Mutex::new(Vec::new()),
        });

        let executor = TaskExecutor::new(llm.clone(), gateway, "test-model");
        let started = tokio::time::Instant::now();
        let report = executor.execute(&task()).await.expect("execute");
        let elapsed = started.elapsed();

        assert_eq!(report.report, "done");
        assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
        // 2s + 5s backoff, observed under the paused clock.
        assert!(elapsed >= std::time::Duration::from_secs(7));
        assert!(elapsed < std::time::Duration::from_secs(8));
    }

    #[tokio::test]
    async fn permanent_failures_do_not_retry() {
        let llm = Arc::new(ScriptedLlm::new(vec![Err(AiError::HttpStatus {
            status: 400,
            body: "bad request".to_string(),
        })]));
        let gateway = Arc::new(StubGateway {
            tools: Vec::new(),
            call_results: Mutex::new(Vec::new()),
        });

        let executor = TaskExecutor::new(llm.clone(), gateway, "test-model");
        let failure = executor.execute(&task()).await.expect_err("must fail");
        assert!(matches!(failure.error, ExecutorError::Ai(_)));
        assert_eq!(failure.retries, 0);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn report_parsing_falls_back_to_raw_text() {
        assert_eq!(
            parse_report(r#"{"task_report":"all set"}"#).report,
            "all set"
        );
        assert_eq!(parse_report("plain prose report").report, "plain prose report");
    }

    #[test]
    fn no_suitable_tool_predicate_matches_known_phrasings() {
        assert!(is_no_suitable_tool_report(
            "There is no suitable tool for this task."
        ));
        assert!(is_no_suitable_tool_report(
            "Unfortunately none of the tools fit what you asked."
        ));
        assert!(!is_no_suitable_tool_report("Created the calendar event."));
    }
}
