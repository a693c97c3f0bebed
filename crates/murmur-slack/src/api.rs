//! Slack Web API client for the reaction-triggered OCR path: message
//! lookup, channel/user names, and private file download.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

const DEFAULT_API_BASE: &str = "https://slack.com/api";
const REQUEST_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, Deserialize)]
pub struct SlackFile {
    #[serde(default)]
    pub url_private: Option<String>,
    #[serde(default)]
    pub mimetype: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlackMessage {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub files: Vec<SlackFile>,
}

impl SlackMessage {
    /// First attached image, if any.
    pub fn image_url(&self) -> Option<&str> {
        self.files
            .iter()
            .find(|file| {
                file.mimetype
                    .as_deref()
                    .is_some_and(|mime| mime.starts_with("image/"))
            })
            .and_then(|file| file.url_private.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    messages: Vec<SlackMessage>,
}

#[derive(Debug, Deserialize)]
struct ChannelInfoResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    channel: Option<ChannelInfo>,
}

#[derive(Debug, Deserialize)]
struct ChannelInfo {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserInfoResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    user: Option<UserInfo>,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    real_name: Option<String>,
}

#[derive(Clone)]
pub struct SlackApiClient {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
}

impl SlackApiClient {
    pub fn new(bot_token: impl Into<String>) -> Result<Self> {
        Self::with_api_base(bot_token, DEFAULT_API_BASE)
    }

    pub fn with_api_base(
        bot_token: impl Into<String>,
        api_base: impl Into<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(REQUEST_TIMEOUT_MS))
            .build()
            .context("failed to create slack api client")?;
        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            bot_token: bot_token.into(),
        })
    }

    /// Fetch the single message a reaction points at.
    pub async fn fetch_message(&self, channel: &str, ts: &str) -> Result<SlackMessage> {
        let response: HistoryResponse = self
            .get_json(
                "conversations.history",
                &[
                    ("channel", channel),
                    ("latest", ts),
                    ("inclusive", "true"),
                    ("limit", "1"),
                ],
            )
            .await?;
        if !response.ok {
            bail!(
                "conversations.history failed: {}",
                response.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
        response
            .messages
            .into_iter()
            .next()
            .context("message not found")
    }

    /// Channel display name; falls back to the id when lookup fails.
    pub async fn channel_name(&self, channel: &str) -> String {
        let result: Result<ChannelInfoResponse> = self
            .get_json("conversations.info", &[("channel", channel)])
            .await;
        match result {
            Ok(response) if response.ok => response
                .channel
                .and_then(|info| info.name)
                .unwrap_or_else(|| channel.to_string()),
            Ok(response) => {
                tracing::warn!(
                    channel,
                    error = response.error.as_deref().unwrap_or("unknown"),
                    "channel lookup failed"
                );
                channel.to_string()
            }
            Err(error) => {
                tracing::warn!(channel, error = %error, "channel lookup failed");
                channel.to_string()
            }
        }
    }

    /// User display name; falls back to the id when lookup fails.
    pub async fn user_name(&self, user: &str) -> String {
        let result: Result<UserInfoResponse> =
            self.get_json("users.info", &[("user", user)]).await;
        match result {
            Ok(response) if response.ok => response
                .user
                .and_then(|info| info.real_name.or(info.name))
                .unwrap_or_else(|| user.to_string()),
            Ok(response) => {
                tracing::warn!(
                    user,
                    error = response.error.as_deref().unwrap_or("unknown"),
                    "user lookup failed"
                );
                user.to_string()
            }
            Err(error) => {
                tracing::warn!(user, error = %error, "user lookup failed");
                user.to_string()
            }
        }
    }

    /// Download a private attachment with bot-token auth.
    pub async fn download_file(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.bot_token)
            .send()
            .await
            .context("file download request failed")?;
        let status = response.status();
        if !status.is_success() {
            bail!("file download failed with status {}", status.as_u16());
        }
        let bytes = response.bytes().await.context("file download body failed")?;
        Ok(bytes.to_vec())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let url = format!("{}/{method}", self.api_base);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.bot_token)
            .query(query)
            .send()
            .await
            .with_context(|| format!("{method} request failed"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("{method} failed with status {}", status.as_u16());
        }
        response
            .json()
            .await
            .with_context(|| format!("failed to decode {method} response"))
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::SlackApiClient;

    #[tokio::test]
    async fn fetch_message_unwraps_ok_envelope() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/conversations.history")
                    .query_param("channel", "C123")
                    .query_param("limit", "1");
                then.status(200).json_body(json!({
                    "ok": true,
                    "messages": [{
                        "user": "U42",
                        "text": "screenshot attached",
                        "files": [
                            { "url_private": "https://files.example/a.png", "mimetype": "image/png" }
                        ]
                    }]
                }));
            })
            .await;

        let client =
            SlackApiClient::with_api_base("xoxb-token", server.base_url()).expect("client");
        let message = client.fetch_message("C123", "111.222").await.expect("fetch");
        assert_eq!(message.user.as_deref(), Some("U42"));
        assert_eq!(message.image_url(), Some("https://files.example/a.png"));
    }

    #[tokio::test]
    async fn fetch_message_surfaces_slack_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/conversations.history");
                then.status(200)
                    .json_body(json!({ "ok": false, "error": "channel_not_found" }));
            })
            .await;

        let client =
            SlackApiClient::with_api_base("xoxb-token", server.base_url()).expect("client");
        let error = client
            .fetch_message("C404", "111.222")
            .await
            .expect_err("must fail");
        assert!(format!("{error}").contains("channel_not_found"));
    }

    #[tokio::test]
    async fn name_lookups_fall_back_to_ids() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/conversations.info");
                then.status(200)
                    .json_body(json!({ "ok": false, "error": "missing_scope" }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/users.info");
                then.status(200).json_body(json!({
                    "ok": true,
                    "user": { "name": "dana", "real_name": "Dana R" }
                }));
            })
            .await;

        let client =
            SlackApiClient::with_api_base("xoxb-token", server.base_url()).expect("client");
        assert_eq!(client.channel_name("C77").await, "C77");
        assert_eq!(client.user_name("U42").await, "Dana R");
    }
}
