//! Image text extraction via the Vision REST API (`images:annotate`,
//! TEXT_DETECTION).

use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::json;

const DEFAULT_API_BASE: &str = "https://vision.googleapis.com";
const REQUEST_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone, PartialEq)]
pub struct OcrResult {
    pub text: String,
    pub confidence: f64,
}

#[derive(Debug, Deserialize)]
struct AnnotateEnvelope {
    #[serde(default)]
    responses: Vec<AnnotateResponse>,
}

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(rename = "textAnnotations", default)]
    text_annotations: Vec<TextAnnotation>,
    #[serde(default)]
    error: Option<AnnotateError>,
}

#[derive(Debug, Deserialize)]
struct TextAnnotation {
    #[serde(default)]
    description: String,
    #[serde(default)]
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct AnnotateError {
    #[serde(default)]
    message: String,
}

#[derive(Clone)]
pub struct VisionOcrClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
}

impl VisionOcrClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_api_base(api_key, DEFAULT_API_BASE)
    }

    pub fn with_api_base(api_key: impl Into<String>, api_base: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(REQUEST_TIMEOUT_MS))
            .build()
            .context("failed to create vision client")?;
        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    /// Run text detection over raw image bytes. An image with no text
    /// yields an empty result, not an error.
    pub async fn extract_text(&self, image: &[u8]) -> Result<OcrResult> {
        let url = format!("{}/v1/images:annotate", self.api_base);
        let payload = json!({
            "requests": [{
                "image": { "content": STANDARD.encode(image) },
                "features": [{ "type": "TEXT_DETECTION" }],
            }],
        });

        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&payload)
            .send()
            .await
            .context("vision annotate request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!(
                "vision annotate failed with status {}: {}",
                status.as_u16(),
                body.chars().take(300).collect::<String>()
            );
        }

        let envelope: AnnotateEnvelope = response
            .json()
            .await
            .context("failed to decode vision response")?;
        let annotate = envelope
            .responses
            .into_iter()
            .next()
            .context("vision response carried no annotations")?;
        if let Some(error) = annotate.error {
            bail!("vision annotate error: {}", error.message);
        }

        // The first annotation covers the whole image.
        let Some(full) = annotate.text_annotations.into_iter().next() else {
            tracing::debug!("no text detected in image");
            return Ok(OcrResult {
                text: String::new(),
                confidence: 0.0,
            });
        };
        tracing::debug!(chars = full.description.len(), "extracted text from image");
        Ok(OcrResult {
            text: full.description,
            confidence: full.confidence.unwrap_or(0.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::VisionOcrClient;

    #[tokio::test]
    async fn extracts_the_full_image_annotation() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/images:annotate")
                    .query_param("key", "vk-1");
                then.status(200).json_body(json!({
                    "responses": [{
                        "textAnnotations": [
                            { "description": "Meeting at 3pm\nRoom 204", "confidence": 0.93 },
                            { "description": "Meeting" }
                        ]
                    }]
                }));
            })
            .await;

        let client =
            VisionOcrClient::with_api_base("vk-1", server.base_url()).expect("client");
        let result = client.extract_text(b"png-bytes").await.expect("ocr");
        assert_eq!(result.text, "Meeting at 3pm\nRoom 204");
        assert!((result.confidence - 0.93).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn empty_annotations_mean_no_text() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/images:annotate");
                then.status(200).json_body(json!({ "responses": [{}] }));
            })
            .await;

        let client =
            VisionOcrClient::with_api_base("vk-1", server.base_url()).expect("client");
        let result = client.extract_text(b"png-bytes").await.expect("ocr");
        assert!(result.text.is_empty());
    }

    #[tokio::test]
    async fn embedded_errors_fail_loudly() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/images:annotate");
                then.status(200).json_body(json!({
                    "responses": [{ "error": { "message": "invalid image" } }]
                }));
            })
            .await;

        let client =
            VisionOcrClient::with_api_base("vk-1", server.base_url()).expect("client");
        let error = client
            .extract_text(b"not-an-image")
            .await
            .expect_err("must fail");
        assert!(format!("{error}").contains("invalid image"));
    }
}
