use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use parley_core::SessionRegistry;
use serde::Serialize;

use crate::bootstrap::DeliveryMode;

#[derive(Clone)]
pub struct HealthState {
    pub sessions: Arc<SessionRegistry>,
    pub delivery_mode: DeliveryMode,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub delivery: HealthCheck,
    pub sessions: usize,
    pub checked_at: String,
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let delivery = match state.delivery_mode {
        DeliveryMode::GraphApi => {
            HealthCheck { status: "ready", detail: "replies go to the Send API".to_string() }
        }
        DeliveryMode::Recording => HealthCheck {
            status: "degraded",
            detail: "no page access token; replies are recorded in memory".to_string(),
        },
    };

    let payload = HealthResponse {
        status: "ready",
        service: HealthCheck {
            status: "ready",
            detail: "parley-server runtime initialized".to_string(),
        },
        delivery,
        sessions: state.sessions.len(),
        checked_at: Utc::now().to_rfc3339(),
    };

    (StatusCode::OK, Json(payload))
}
