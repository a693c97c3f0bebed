//! GitHub REST client for the archival features: daily-archive issues and
//! direct file upserts for OCR results.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::json;

const DEFAULT_API_BASE: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";
const REQUEST_TIMEOUT_MS: u64 = 30_000;
const ERROR_BODY_MAX_CHARS: usize = 300;

pub const DAILY_ARCHIVE_LABEL: &str = "daily-archive";

#[derive(Debug, Deserialize)]
struct CreatedIssue {
    number: i64,
}

#[derive(Debug, Deserialize)]
struct ExistingFile {
    sha: String,
}

#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
    owner: String,
    repo: String,
}

impl GitHubClient {
    pub fn new(
        token: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
    ) -> Result<Self> {
        Self::with_api_base(token, owner, repo, DEFAULT_API_BASE)
    }

    pub fn with_api_base(
        token: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
        api_base: impl Into<String>,
    ) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("murmur-bot"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            reqwest::header::HeaderValue::from_static(API_VERSION),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(REQUEST_TIMEOUT_MS))
            .build()
            .context("failed to create github client")?;
        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
            owner: owner.into(),
            repo: repo.into(),
        })
    }

    /// Create an issue and return its number.
    pub async fn create_issue(
        &self,
        title: &str,
        body: &str,
        labels: &[&str],
    ) -> Result<i64> {
        let url = format!(
            "{}/repos/{}/{}/issues",
            self.api_base, self.owner, self.repo
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&json!({ "title": title, "body": body, "labels": labels }))
            .send()
            .await
            .context("issue creation request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!(
                "failed to create issue, status {}: {}",
                status.as_u16(),
                truncate_body(&body)
            );
        }

        let created: CreatedIssue = response
            .json()
            .await
            .context("failed to decode issue creation response")?;
        tracing::info!(number = created.number, "created github issue");
        Ok(created.number)
    }

    pub async fn create_daily_archive_issue(&self, date: &str, markdown: &str) -> Result<i64> {
        self.create_issue(&format!("Archive {date}"), markdown, &[DAILY_ARCHIVE_LABEL])
            .await
    }

    /// Create or update a repository file via the contents API. Looks up
    /// the existing blob SHA first so updates do not conflict.
    pub async fn create_or_update_file(
        &self,
        path: &str,
        content: &str,
        message: &str,
        branch: &str,
    ) -> Result<()> {
        let url = format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_base, self.owner, self.repo, path
        );

        let existing = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[("ref", branch)])
            .send()
            .await
            .context("existing-file lookup failed")?;
        let sha = if existing.status().is_success() {
            let file: ExistingFile = existing
                .json()
                .await
                .context("failed to decode existing-file response")?;
            Some(file.sha)
        } else {
            None
        };

        let mut payload = json!({
            "message": message,
            "content": STANDARD.encode(content.as_bytes()),
            "branch": branch,
        });
        if let Some(sha) = sha {
            payload["sha"] = json!(sha);
        }

        let response = self
            .http
            .put(&url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await
            .context("file upsert request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!(
                "failed to upsert file {path}, status {}: {}",
                status.as_u16(),
                truncate_body(&body)
            );
        }
        tracing::info!(path, "saved file to github");
        Ok(())
    }
}

fn truncate_body(body: &str) -> String {
    body.chars().take(ERROR_BODY_MAX_CHARS).collect()
}
