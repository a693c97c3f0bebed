//! Reaction-triggered OCR flow: a trigger emoji on a message with an image
//! runs text extraction, summarization, GitHub archival, and a status
//! notification. Every failure is caught here and reported to the channel;
//! nothing propagates to the server.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use murmur_github::GitHubClient;
use murmur_slack::{SlackApiClient, SlackNotifier};
use serde::Deserialize;

use crate::ocr::VisionOcrClient;
use crate::summarizer::{OcrContext, OcrSummarizer, SummaryResult};

#[derive(Debug, Clone, Deserialize, PartialEq)]
/// The `reaction_added` event payload fields this flow needs.
pub struct ReactionEvent {
    pub user: String,
    pub reaction: String,
    pub item: ReactionItem,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ReactionItem {
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub ts: String,
}

pub struct ReactionHandler {
    api: SlackApiClient,
    ocr: VisionOcrClient,
    summarizer: OcrSummarizer,
    github: Option<GitHubClient>,
    notifier: SlackNotifier,
    trigger_emoji: String,
    results_path: String,
    github_branch: String,
}

impl ReactionHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        api: SlackApiClient,
        ocr: VisionOcrClient,
        summarizer: OcrSummarizer,
        github: Option<GitHubClient>,
        notifier: SlackNotifier,
        trigger_emoji: impl Into<String>,
        results_path: impl Into<String>,
        github_branch: impl Into<String>,
    ) -> Self {
        Self {
            api,
            ocr,
            summarizer,
            github,
            notifier,
            trigger_emoji: trigger_emoji.into(),
            results_path: results_path.into(),
            github_branch: github_branch.into(),
        }
    }

    /// Entry point for the webhook server. Never fails: errors become an
    /// error notification plus a log line.
    pub async fn handle_reaction_added(&self, event: ReactionEvent) {
        if event.reaction != self.trigger_emoji {
            tracing::debug!(reaction = %event.reaction, "ignoring non-trigger reaction");
            return;
        }
        tracing::info!(ts = %event.item.ts, "processing ocr trigger");

        if let Err(error) = self.process(&event).await {
            tracing::error!(error = %format!("{error:#}"), "ocr processing failed");
            let message = format!("❌ OCR processing failed\n\n{error:#}");
            if let Err(notify_error) = self.notifier.post_text(&message).await {
                tracing::error!(error = %notify_error, "failed to deliver ocr error notification");
            }
        }
    }

    async fn process(&self, event: &ReactionEvent) -> Result<()> {
        let message = self
            .api
            .fetch_message(&event.item.channel, &event.item.ts)
            .await?;

        let Some(image_url) = message.image_url().map(str::to_string) else {
            self.notifier
                .post_text("❌ OCR processing failed\n\nNo image found in the message.")
                .await?;
            return Ok(());
        };

        let image = self.api.download_file(&image_url).await?;
        let ocr_result = self.ocr.extract_text(&image).await?;
        if ocr_result.text.trim().is_empty() {
            self.notifier
                .post_text("❌ OCR processing failed\n\nNo text was detected in the image.")
                .await?;
            return Ok(());
        }

        let channel_name = self.api.channel_name(&event.item.channel).await;
        let author = message.user.as_deref().unwrap_or(&event.user);
        let user_name = self.api.user_name(author).await;
        let timestamp = event_timestamp(&event.item.ts);

        let context = OcrContext {
            channel_name: channel_name.clone(),
            user_name: user_name.clone(),
            timestamp: timestamp.clone(),
        };
        let summary = self.summarizer.summarize(&ocr_result.text, &context).await?;

        if let Some(github) = &self.github {
            let file_name = format!("ocr_{}.md", timestamp.replace([':', '.'], "-"));
            let path = format!("{}/{file_name}", self.results_path);
            let markdown = render_result_markdown(
                &timestamp,
                &channel_name,
                &user_name,
                ocr_result.confidence,
                &summary,
                &ocr_result.text,
                &image_url,
            );
            github
                .create_or_update_file(
                    &path,
                    &markdown,
                    &format!("Add OCR result: {file_name}"),
                    &self.github_branch,
                )
                .await
                .context("failed to archive ocr result")?;
        } else {
            tracing::debug!("no github settings, skipping ocr archive");
        }

        let mut lines = vec![
            "✅ OCR processing finished!".to_string(),
            String::new(),
            "*Summary*".to_string(),
            summary.summary.clone(),
        ];
        if !summary.key_points.is_empty() {
            lines.push(String::new());
            lines.push("*Key points*".to_string());
            for point in &summary.key_points {
                lines.push(format!("• {point}"));
            }
        }
        lines.push(String::new());
        lines.push(format!(
            "_Confidence: {:.1}%_",
            ocr_result.confidence * 100.0
        ));
        self.notifier.post_text(&lines.join("\n")).await?;

        tracing::info!("ocr processing completed");
        Ok(())
    }
}

/// Slack message timestamps are `seconds.fraction`; render RFC 3339 and
/// fall back to the raw value when unparseable.
fn event_timestamp(ts: &str) -> String {
    let seconds = ts.split('.').next().and_then(|raw| raw.parse::<i64>().ok());
    match seconds.and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)) {
        Some(parsed) => parsed.to_rfc3339(),
        None => ts.to_string(),
    }
}

fn render_result_markdown(
    timestamp: &str,
    channel_name: &str,
    user_name: &str,
    confidence: f64,
    summary: &SummaryResult,
    ocr_text: &str,
    image_url: &str,
) -> String {
    let key_points = summary
        .key_points
        .iter()
        .map(|point| format!("- {point}"))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "# OCR Result\n\n\
         **Date**: {timestamp}\n\
         **Channel**: {channel_name}\n\
         **User**: {user_name}\n\
         **Confidence**: {confidence:.2}\n\n\
         ## Summary\n{}\n\n\
         ## Key Points\n{key_points}\n\n\
         ## Extracted Text\n```\n{ocr_text}\n```\n\n\
         ## Original Image\n![Image]({image_url})\n",
        summary.summary
    )
}
