//! LLM-backed extraction of candidate tasks from lifelog transcripts.

use std::sync::Arc;

use anyhow::{Context, Result};
use murmur_ai::{ChatRequest, LlmClient, Message};
use murmur_lifelog::Lifelog;
use serde::Deserialize;
use serde_json::json;

use crate::CandidateTask;

const DEFAULT_SYSTEM_PROMPT: &str = r#"You review conversation transcripts and extract the items that belong on a to-do list.
Whenever the speaker expresses an intent like "I should...", "remind me to...", "I want to look up..." or "don't let me forget...", capture it as a task. Ignore small talk and anything that cannot be made concrete.

Rules:
- Write each task as a concrete action ("share the mastra agent-framework article with the team", not "share the article").
- Use the surrounding transcript to make the task specific; drop anything that stays vague.
- Use the record id from the input as sourceId, and attach an estimated ISO-8601 timestamp with offset.

Output JSON of this exact shape:
{
  "tasks": [
    { "sourceId": "...", "task": "...", "timestamp": "2025-01-01T00:01:00+09:00" }
  ]
}"#;

#[derive(Debug, Deserialize)]
struct ExtractionEnvelope {
    #[serde(default)]
    tasks: Vec<CandidateTask>,
}

/// Turns a batch of source records into candidate tasks via a
/// chat-completions model. May legitimately return an empty list.
pub struct TaskExtractor {
    llm: Arc<dyn LlmClient>,
    model: String,
    system_prompt: String,
}

impl TaskExtractor {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub async fn extract(&self, records: &[Lifelog]) -> Result<Vec<CandidateTask>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let user_prompt = [
            "Extract the statements that need to become tasks from the lifelog data below.",
            "Keep each task short, and attach an estimated ISO-8601 timestamp with offset.",
            "Use the record id from the input as sourceId.",
            "---",
            &transcript_payload(records),
        ]
        .join("\n");

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message::system(self.system_prompt.clone()),
                Message::user(user_prompt),
            ],
            tools: Vec::new(),
            max_tokens: None,
            temperature: Some(0.2),
            json_mode: true,
        };

        let response = self
            .llm
            .complete(request)
            .await
            .context("task extraction call failed")?;
        let raw = response.message.text_content();
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }

        let sanitized = sanitize_json_output(&raw);
        let envelope: ExtractionEnvelope = serde_json::from_str(&sanitized)
            .with_context(|| format!("failed to parse task extractor output: {sanitized}"))?;
        tracing::debug!(tasks = envelope.tasks.len(), "extraction completed");
        Ok(envelope.tasks)
    }
}

fn transcript_payload(records: &[Lifelog]) -> String {
    let payload = json!({
        "lifelogs": records
            .iter()
            .map(|record| {
                json!({
                    "id": record.id,
                    "title": record.title,
                    "startTime": record.start_time.to_rfc3339(),
                    "endTime": record.end_time.to_rfc3339(),
                    "contents": record
                        .contents
                        .iter()
                        .map(|content| json!({
                            "content": content.content,
                            "endTime": content.end_time,
                        }))
                        .collect::<Vec<_>>(),
                })
            })
            .collect::<Vec<_>>(),
    });
    serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string())
}

/// Models wrap JSON in code fences or prose often enough that the raw text
/// needs a pass before parsing: prefer a fenced block, then the outermost
/// brace span, then the trimmed text as-is.
pub fn sanitize_json_output(content: &str) -> String {
    let trimmed = content.trim();
    if let Some(fenced) = extract_fenced_block(trimmed) {
        return fenced;
    }

    let first = trimmed.find('{');
    let last = trimmed.rfind('}');
    if let (Some(first), Some(last)) = (first, last) {
        if last > first {
            return trimmed[first..=last].to_string();
        }
    }

    trimmed.to_string()
}

fn extract_fenced_block(trimmed: &str) -> Option<String> {
    if !trimmed.starts_with("```") {
        return None;
    }
    let after_fence = trimmed.trim_start_matches("```");
    let after_tag = after_fence.strip_prefix("json").unwrap_or(after_fence);
    let closing = after_tag.find("```")?;
    Some(after_tag[..closing].trim().to_string())
}
