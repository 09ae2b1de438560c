use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{FromRef, Query, State},
    http::StatusCode,
    routing::get,
    Router,
};
use parley_agent::TurnQueue;
use parley_messenger::{verify_subscription, VerifyOutcome, VerifyQuery, WebhookPayload};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{info, warn};

use crate::health::{health, HealthState};

pub const GREETING: &str = "Hello world, I am a chat bot";

#[derive(Clone)]
pub struct AppState {
    pub verify_token: SecretString,
    pub queue: Arc<TurnQueue>,
    pub health: HealthState,
}

impl FromRef<AppState> for HealthState {
    fn from_ref(state: &AppState) -> Self {
        state.health.clone()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/webhook", get(verify).post(receive))
        .route("/webhook/", get(verify).post(receive))
        .route("/health", get(health))
        .with_state(state)
}

async fn index() -> &'static str {
    GREETING
}

async fn verify(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> (StatusCode, String) {
    match verify_subscription(&query, state.verify_token.expose_secret()) {
        VerifyOutcome::Accepted { challenge } => {
            info!(
                event_name = "ingress.webhook.verified",
                correlation_id = "webhook_verify",
                "webhook subscription verified"
            );
            (StatusCode::OK, challenge)
        }
        rejected @ VerifyOutcome::Rejected => {
            warn!(
                event_name = "ingress.webhook.verify_rejected",
                correlation_id = "webhook_verify",
                mode = query.mode.as_deref().unwrap_or(""),
                "webhook verification used a wrong token"
            );
            (StatusCode::FORBIDDEN, rejected.body().to_owned())
        }
    }
}

/// Acknowledges every JSON delivery with 200 before any turn runs; the
/// platform redelivers anything else. Only a body that is not JSON at all
/// gets a 400.
async fn receive(State(state): State<AppState>, body: Bytes) -> StatusCode {
    let raw: Value = match serde_json::from_slice(&body) {
        Ok(raw) => raw,
        Err(error) => {
            warn!(
                event_name = "ingress.webhook.malformed",
                error = %error,
                bytes = body.len(),
                "webhook body is not JSON"
            );
            return StatusCode::BAD_REQUEST;
        }
    };
    let payload: WebhookPayload = match serde_json::from_value(raw) {
        Ok(payload) => payload,
        Err(error) => {
            warn!(
                event_name = "ingress.webhook.unexpected_shape",
                error = %error,
                "webhook body is JSON but not a webhook payload; acknowledged and dropped"
            );
            return StatusCode::OK;
        }
    };

    if !payload.is_page_subscription() {
        info!(
            event_name = "ingress.webhook.ignored_object",
            object = %payload.object,
            "webhook delivery is not a page subscription"
        );
        return StatusCode::OK;
    }

    for message in payload.inbound_messages() {
        info!(
            event_name = "ingress.webhook.message_received",
            sender_id = %message.sender_id,
            correlation_id = %message.correlation_id(),
            "inbound message queued"
        );
        state.queue.submit(message);
    }

    StatusCode::OK
}
