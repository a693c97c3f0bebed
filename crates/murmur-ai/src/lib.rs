//! LLM provider clients used by task extraction and task execution.
//!
//! `AnthropicClient` speaks the messages API with tool use; `OpenAiClient`
//! speaks OpenAI-compatible chat completions (OpenAI or OpenRouter) and is
//! what the extraction adapter calls. Both sit behind the `LlmClient` trait
//! so adapters can be tested with stubs.

pub mod anthropic;
pub mod openai;
pub mod retry;
mod types;

pub use anthropic::{AnthropicClient, AnthropicConfig};
pub use openai::{OpenAiClient, OpenAiConfig};
pub use types::{
    AiError, ChatRequest, ChatResponse, ChatUsage, ContentBlock, LlmClient, Message, MessageRole,
    ToolCall, ToolDefinition,
};
