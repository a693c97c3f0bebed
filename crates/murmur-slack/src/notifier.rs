//! Incoming-webhook notifier. Fire-and-forget from the cycle's point of
//! view, except that a non-success response must abort the cycle at the
//! point of delivery.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use murmur_core::truncate_chars;
use murmur_tasks::{CandidateTask, NotificationContext};
use serde_json::{json, Value};

const REQUEST_TIMEOUT_MS: u64 = 15_000;
/// Slack caps section text around 3000 characters; reports are cut below
/// that before posting.
const REPORT_MAX_CHARS: usize = 2800;

#[derive(Clone)]
pub struct SlackNotifier {
    http: reqwest::Client,
    webhook_url: String,
}

impl SlackNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(REQUEST_TIMEOUT_MS))
            .build()
            .context("failed to create slack webhook client")?;
        Ok(Self {
            http,
            webhook_url: webhook_url.into(),
        })
    }

    /// Post a task notification. An empty task list is a no-op.
    pub async fn notify(
        &self,
        tasks: &[CandidateTask],
        context: &NotificationContext,
    ) -> Result<()> {
        if tasks.is_empty() {
            return Ok(());
        }

        let blocks = build_blocks(tasks, context);
        self.post_payload(&json!({ "blocks": blocks })).await
    }

    /// Post a plain text message (OCR status updates and the like).
    pub async fn post_text(&self, text: &str) -> Result<()> {
        self.post_payload(&json!({ "text": text })).await
    }

    async fn post_payload(&self, payload: &Value) -> Result<()> {
        let response = self
            .http
            .post(&self.webhook_url)
            .json(payload)
            .send()
            .await
            .context("slack webhook request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!(
                "slack notification failed with status {}: {}",
                status.as_u16(),
                truncate_chars(&body, 300)
            );
        }
        tracing::debug!("slack notification delivered");
        Ok(())
    }
}

fn build_blocks(tasks: &[CandidateTask], context: &NotificationContext) -> Vec<Value> {
    let header_text = match &context.execution_report {
        Some(_) => ":robot_face: murmur\n*Task execution report*".to_string(),
        None => format!(
            ":robot_face: murmur\n*New tasks*: {}",
            context.total_tasks
        ),
    };
    let header = json!({
        "type": "section",
        "text": { "type": "mrkdwn", "text": header_text },
    });

    let latest = context
        .latest_end_time
        .clone()
        .unwrap_or_else(|| "not yet recorded".to_string());
    let meta = json!({
        "type": "context",
        "elements": [
            { "type": "mrkdwn", "text": format!("Last processed: {latest}") }
        ],
    });
    let divider = json!({ "type": "divider" });

    if let Some(report) = &context.execution_report {
        let task_info = json!({
            "type": "section",
            "text": {
                "type": "mrkdwn",
                "text": format!("*Task*: {}\n*Time*: {}", tasks[0].text, tasks[0].timestamp),
            },
        });
        let report_block = json!({
            "type": "section",
            "text": { "type": "mrkdwn", "text": truncate_chars(report, REPORT_MAX_CHARS) },
        });
        return vec![header, meta, divider.clone(), task_info, divider, report_block];
    }

    let mut blocks = vec![header, meta, divider];
    for task in tasks {
        blocks.push(json!({
            "type": "section",
            "text": {
                "type": "mrkdwn",
                "text": format!(
                    "• *{}* _(record: {})_\n{}",
                    task.timestamp, task.source_id, task.text
                ),
            },
        }));
    }
    blocks
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use murmur_tasks::{CandidateTask, NotificationContext};

    use super::{build_blocks, SlackNotifier, REPORT_MAX_CHARS};

    fn task(text: &str) -> CandidateTask {
        CandidateTask {
            source_id: "log-1".to_string(),
            text: text.to_string(),
            timestamp: "2025-01-01T09:10:00+00:00".to_string(),
        }
    }

    #[test]
    fn batch_layout_lists_every_task() {
        let context = NotificationContext {
            latest_end_time: Some("2025-01-01T09:30:00+00:00".to_string()),
            total_tasks: 2,
            execution_report: None,
        };
        let blocks = build_blocks(&[task("renew passport"), task("book dentist")], &context);
        assert_eq!(blocks.len(), 5);
        let header = blocks[0]["text"]["text"].as_str().expect("header");
        assert!(header.contains("*New tasks*: 2"));
        let last = blocks[4]["text"]["text"].as_str().expect("task block");
        assert!(last.contains("book dentist"));
    }

    #[test]
    fn report_layout_truncates_oversized_reports() {
        let context = NotificationContext {
            latest_end_time: None,
            total_tasks: 1,
            execution_report: Some("x".repeat(REPORT_MAX_CHARS + 100)),
        };
        let blocks = build_blocks(&[task("renew passport")], &context);
        assert_eq!(blocks.len(), 6);
        let report = blocks[5]["text"]["text"].as_str().expect("report");
        assert_eq!(report.chars().count(), REPORT_MAX_CHARS + 1); // + ellipsis
        let meta = blocks[1]["elements"][0]["text"].as_str().expect("meta");
        assert!(meta.contains("not yet recorded"));
    }

    #[tokio::test]
    async fn notify_skips_empty_batches_and_fails_on_error_status() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/hook");
                then.status(500).body("upstream broke");
            })
            .await;

        let notifier = SlackNotifier::new(server.url("/hook")).expect("notifier");
        let context = NotificationContext::default();

        notifier.notify(&[], &context).await.expect("empty is ok");
        mock.assert_hits_async(0).await;

        let error = notifier
            .notify(&[task("renew passport")], &context)
            .await
            .expect_err("500 must fail");
        assert!(format!("{error}").contains("500"));
        mock.assert_hits_async(1).await;
    }
}
