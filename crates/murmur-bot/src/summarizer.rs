//! Summarization of OCR output before it is archived.

use std::sync::Arc;

use anyhow::{Context, Result};
use murmur_ai::{ChatRequest, LlmClient, Message};
use murmur_tasks::sanitize_json_output;
use serde::Deserialize;

const SYSTEM_PROMPT: &str = r#"You summarize text that was extracted from an image.
Organize the extracted text so it reads well: state the main content briefly, pull out important keywords and figures, and list the key points.

Answer with JSON of this exact shape:
{
  "summary": "...",
  "keyPoints": ["...", "..."]
}"#;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SummaryResult {
    pub summary: String,
    #[serde(rename = "keyPoints", default)]
    pub key_points: Vec<String>,
}

#[derive(Debug, Clone, Default)]
/// Where the image came from, woven into the prompt for context.
pub struct OcrContext {
    pub channel_name: String,
    pub user_name: String,
    pub timestamp: String,
}

pub struct OcrSummarizer {
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl OcrSummarizer {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }

    pub async fn summarize(&self, text: &str, context: &OcrContext) -> Result<SummaryResult> {
        if text.trim().is_empty() {
            return Ok(SummaryResult {
                summary: "No text was detected.".to_string(),
                key_points: Vec::new(),
            });
        }

        let user_prompt = format!(
            "Extracted text:\n{text}\n\nPosted in: {}\nPosted by: {}\nPosted at: {}",
            context.channel_name, context.user_name, context.timestamp
        );

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![Message::system(SYSTEM_PROMPT), Message::user(user_prompt)],
            tools: Vec::new(),
            max_tokens: Some(1000),
            temperature: Some(0.3),
            json_mode: true,
        };

        let response = self
            .llm
            .complete(request)
            .await
            .context("summary generation failed")?;
        let raw = response.message.text_content();
        let sanitized = sanitize_json_output(&raw);
        serde_json::from_str(&sanitized)
            .with_context(|| format!("failed to parse summary output: {sanitized}"))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use murmur_ai::{AiError, ChatRequest, ChatResponse, ChatUsage, LlmClient, Message};

    use super::{OcrContext, OcrSummarizer};

    struct CannedLlm {
        reply: &'static str,
    }

    #[async_trait]
    impl LlmClient for CannedLlm {
        async fn complete(&self, _request: ChatRequest) -> Result<ChatResponse, AiError> {
            Ok(ChatResponse {
                message: Message::assistant_text(self.reply),
                finish_reason: Some("end_turn".to_string()),
                usage: ChatUsage::default(),
            })
        }
    }

    #[tokio::test]
    async fn parses_summary_envelope() {
        let summarizer = OcrSummarizer::new(
            Arc::new(CannedLlm {
                reply: r#"{"summary":"Team offsite agenda.","keyPoints":["3pm start","Room 204"]}"#,
            }),
            "test-model",
        );
        let result = summarizer
            .summarize("agenda text", &OcrContext::default())
            .await
            .expect("summary");
        assert_eq!(result.summary, "Team offsite agenda.");
        assert_eq!(result.key_points.len(), 2);
    }

    #[tokio::test]
    async fn empty_input_short_circuits_without_a_model_call() {
        let summarizer = OcrSummarizer::new(
            Arc::new(CannedLlm { reply: "never used" }),
            "test-model",
        );
        let result = summarizer
            .summarize("   ", &OcrContext::default())
            .await
            .expect("summary");
        assert_eq!(result.summary, "No text was detected.");
        assert!(result.key_points.is_empty());
    }
}
