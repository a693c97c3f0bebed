//! HTTP client for the lifelog recording source.
//!
//! Thin request/response wrapper: builds the query, validates the response
//! shape, and fails loudly on non-success status. Window filtering against
//! the cursor happens in the pipeline, not here — the upstream `start`
//! parameter is only a fetch-size hint.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

const DEFAULT_API_BASE: &str = "https://api.limitless.ai";
const REQUEST_TIMEOUT_MS: u64 = 30_000;
const ERROR_BODY_MAX_CHARS: usize = 300;

#[derive(Debug, Clone, Deserialize, PartialEq)]
/// One transcript segment inside a lifelog record.
pub struct LifelogContent {
    pub content: String,
    #[serde(rename = "endTime")]
    pub end_time: String,
    #[serde(rename = "startTime", default)]
    pub start_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
/// One source record returned by the lifelog API.
pub struct Lifelog {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "startTime")]
    pub start_time: DateTime<Utc>,
    #[serde(rename = "endTime")]
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub contents: Vec<LifelogContent>,
}

#[derive(Debug, Deserialize)]
struct LifelogEnvelope {
    data: LifelogData,
}

#[derive(Debug, Deserialize)]
struct LifelogData {
    lifelogs: Vec<Lifelog>,
}

#[derive(Debug, Clone)]
/// Fetch-window parameters for one poll.
pub struct FetchOptions {
    pub since: Option<DateTime<Utc>>,
    pub limit: u32,
    pub timezone: String,
}

#[derive(Clone)]
pub struct LifelogClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
}

impl LifelogClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_api_base(api_key, DEFAULT_API_BASE)
    }

    pub fn with_api_base(api_key: impl Into<String>, api_base: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(REQUEST_TIMEOUT_MS))
            .build()
            .context("failed to create lifelog http client")?;
        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    /// Fetch a bounded window of recent records, oldest window the caller
    /// asked for. Non-success status is an error carrying a truncated body.
    pub async fn fetch(&self, options: &FetchOptions) -> Result<Vec<Lifelog>> {
        let url = format!("{}/v1/lifelogs", self.api_base);
        let limit = options.limit.to_string();
        let mut query: Vec<(&str, String)> = vec![
            ("limit", limit),
            ("includeContents", "true".to_string()),
            ("includeMarkdown", "false".to_string()),
            ("includeHeadings", "false".to_string()),
            ("timezone", options.timezone.clone()),
        ];
        if let Some(since) = options.since {
            query.push(("start", since.to_rfc3339()));
        }

        let response = self
            .http
            .get(&url)
            .header("X-API-Key", &self.api_key)
            .query(&query)
            .send()
            .await
            .context("lifelog fetch request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!(
                "lifelog source returned status {}: {}",
                status.as_u16(),
                truncate_body(&body)
            );
        }

        let envelope: LifelogEnvelope = response
            .json()
            .await
            .context("failed to decode lifelog response body")?;
        tracing::debug!(
            count = envelope.data.lifelogs.len(),
            "fetched lifelog window"
        );
        Ok(envelope.data.lifelogs)
    }
}

fn truncate_body(body: &str) -> String {
    if body.chars().count() <= ERROR_BODY_MAX_CHARS {
        return body.to_string();
    }
    body.chars().take(ERROR_BODY_MAX_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::{FetchOptions, LifelogClient};

    fn options() -> FetchOptions {
        FetchOptions {
            since: None,
            limit: 5,
            timezone: "UTC".to_string(),
        }
    }

    #[tokio::test]
    async fn fetch_decodes_wire_schema() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v1/lifelogs")
                    .query_param("limit", "5")
                    .query_param("timezone", "UTC")
                    .header("X-API-Key", "key-1");
                then.status(200).json_body(json!({
                    "data": {
                        "lifelogs": [{
                            "id": "log-1",
                            "title": "standup",
                            "startTime": "2025-01-01T09:00:00+00:00",
                            "endTime": "2025-01-01T09:15:00+00:00",
                            "contents": [
                                { "content": "ship the report", "endTime": "2025-01-01T09:10:00+00:00" }
                            ]
                        }]
                    }
                }));
            })
            .await;

        let client = LifelogClient::with_api_base("key-1", server.base_url()).expect("client");
        let records = client.fetch(&options()).await.expect("fetch");
        mock.assert_async().await;

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "log-1");
        assert_eq!(records[0].contents[0].content, "ship the report");
    }

    #[tokio::test]
    async fn fetch_passes_cursor_as_start_param() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v1/lifelogs")
                    .query_param_exists("start");
                then.status(200)
                    .json_body(json!({ "data": { "lifelogs": [] } }));
            })
            .await;

        let client = LifelogClient::with_api_base("key-1", server.base_url()).expect("client");
        let mut opts = options();
        opts.since = Some("2025-01-01T00:00:00Z".parse().expect("timestamp"));
        let records = client.fetch(&opts).await.expect("fetch");
        mock.assert_async().await;
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn fetch_fails_loudly_on_error_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/lifelogs");
                then.status(401).body("bad key");
            })
            .await;

        let client = LifelogClient::with_api_base("key-1", server.base_url()).expect("client");
        let error = client.fetch(&options()).await.expect_err("must fail");
        let rendered = format!("{error}");
        assert!(rendered.contains("401"), "got: {rendered}");
        assert!(rendered.contains("bad key"), "got: {rendered}");
    }
}
