//! Webhook server for the reaction-triggered OCR flow.
//!
//! `/slack/events` verifies the request signature over the raw body,
//! answers URL-verification challenges, and acks event callbacks
//! immediately (the messaging platform retries anything slower than a few
//! seconds) while the actual processing runs in a spawned task.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use murmur_slack::verify_signature;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::events::{ReactionEvent, ReactionHandler};

pub struct ServerState {
    pub signing_secret: String,
    pub handler: Arc<ReactionHandler>,
}

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/slack/events", post(slack_events))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "timestamp": Utc::now().to_rfc3339() }))
}

async fn slack_events(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let raw_body = String::from_utf8_lossy(&body).to_string();
    let timestamp = header_value(&headers, "x-slack-request-timestamp");
    let signature = header_value(&headers, "x-slack-signature");

    if !verify_signature(
        &state.signing_secret,
        &timestamp,
        &raw_body,
        &signature,
        Utc::now().timestamp(),
    ) {
        tracing::warn!("rejected slack event with invalid signature");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid signature" })),
        )
            .into_response();
    }

    match classify_payload(&raw_body) {
        PayloadKind::Challenge(challenge) => {
            tracing::debug!("answering url verification challenge");
            Json(json!({ "challenge": challenge })).into_response()
        }
        PayloadKind::Reaction(event) => {
            let handler = state.handler.clone();
            tokio::spawn(async move {
                handler.handle_reaction_added(event).await;
            });
            StatusCode::OK.into_response()
        }
        PayloadKind::Ignored(kind) => {
            tracing::debug!(kind, "ignoring event type");
            StatusCode::OK.into_response()
        }
        PayloadKind::Unknown => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "unknown payload type" })),
        )
            .into_response(),
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

#[derive(Debug, Deserialize)]
struct EventEnvelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    challenge: Option<String>,
    event: Option<Value>,
}

#[derive(Debug, PartialEq)]
enum PayloadKind {
    Challenge(String),
    Reaction(ReactionEvent),
    /// A valid callback we do not act on (carries the inner event type).
    Ignored(String),
    Unknown,
}

fn classify_payload(raw: &str) -> PayloadKind {
    let Ok(envelope) = serde_json::from_str::<EventEnvelope>(raw) else {
        return PayloadKind::Unknown;
    };

    match envelope.kind.as_deref() {
        Some("url_verification") => match envelope.challenge {
            Some(challenge) => PayloadKind::Challenge(challenge),
            None => PayloadKind::Unknown,
        },
        Some("event_callback") => {
            let Some(event) = envelope.event else {
                return PayloadKind::Unknown;
            };
            let inner_kind = event
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if inner_kind != "reaction_added" {
                return PayloadKind::Ignored(inner_kind);
            }
            match serde_json::from_value::<ReactionEvent>(event) {
                Ok(parsed) => PayloadKind::Reaction(parsed),
                Err(_) => PayloadKind::Unknown,
            }
        }
        _ => PayloadKind::Unknown,
    }
}
