use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use parley_core::DeliveryError;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::payload::OutboundMessage;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub recipient_id: String,
    pub message_id: Option<String>,
}

/// Outbound half of the messaging platform. One call sends one message to one
/// recipient; failures are returned, never retried here.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    async fn deliver(
        &self,
        recipient_id: &str,
        message: &OutboundMessage,
    ) -> Result<DeliveryReceipt, DeliveryError>;
}

#[derive(Clone, Debug)]
pub struct GraphApiSettings {
    pub base_url: String,
    pub api_version: String,
    pub access_token: SecretString,
    pub timeout: Duration,
}

/// Send API client: `POST {base}/{version}/me/messages?access_token=...`.
pub struct GraphApiGateway {
    client: Client,
    endpoint: String,
    access_token: SecretString,
}

#[derive(Debug, Deserialize)]
struct SendApiResponse {
    recipient_id: Option<String>,
    message_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendApiErrorEnvelope {
    error: SendApiError,
}

#[derive(Debug, Deserialize)]
struct SendApiError {
    message: String,
    #[serde(default)]
    code: Option<i64>,
}

impl GraphApiGateway {
    pub fn new(settings: GraphApiSettings) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|error| DeliveryError::Transport(error.to_string()))?;
        let endpoint = format!(
            "{}/{}/me/messages",
            settings.base_url.trim_end_matches('/'),
            settings.api_version.trim_matches('/')
        );

        Ok(Self { client, endpoint, access_token: settings.access_token })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl MessagingGateway for GraphApiGateway {
    async fn deliver(
        &self,
        recipient_id: &str,
        message: &OutboundMessage,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let request = message
            .send_request(recipient_id)
            .map_err(|error| DeliveryError::Encode(error.to_string()))?;
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("access_token", self.access_token.expose_secret())])
            .json(&request)
            .send()
            .await
            .map_err(|error| DeliveryError::Transport(error.to_string()))?;

        let status = response.status();
        let body: Value =
            response.json().await.map_err(|error| DeliveryError::Decode(error.to_string()))?;

        // The Send API can report an error with a 2xx status, so the body wins.
        let error_detail = serde_json::from_value::<SendApiErrorEnvelope>(body.clone())
            .ok()
            .map(|envelope| match envelope.error.code {
                Some(code) => format!("{} (code {code})", envelope.error.message),
                None => envelope.error.message,
            });
        if error_detail.is_some() || !status.is_success() {
            let detail = error_detail.unwrap_or_else(|| format!("status {status}: {body}"));
            warn!(
                event_name = "messenger.delivery.rejected",
                recipient_id,
                status = %status,
                kind = message.kind(),
                "send api rejected outbound message"
            );
            return Err(DeliveryError::Rejected(detail));
        }

        let parsed: SendApiResponse =
            serde_json::from_value(body).map_err(|error| DeliveryError::Decode(error.to_string()))?;
        debug!(
            event_name = "messenger.delivery.accepted",
            recipient_id,
            message_id = parsed.message_id.as_deref().unwrap_or(""),
            kind = message.kind(),
            "send api accepted outbound message"
        );

        Ok(DeliveryReceipt {
            recipient_id: parsed.recipient_id.unwrap_or_else(|| recipient_id.to_owned()),
            message_id: parsed.message_id,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecordedDelivery {
    pub recipient_id: String,
    pub message: OutboundMessage,
}

#[derive(Default)]
struct RecordingState {
    delivered: Vec<RecordedDelivery>,
    fail_next: usize,
    fail_always: bool,
}

/// In-memory gateway used when no page access token is configured and in
/// tests. Failed attempts are not recorded.
#[derive(Clone, Default)]
pub struct RecordingGateway {
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliveries(&self) -> Vec<RecordedDelivery> {
        self.lock().delivered.clone()
    }

    pub fn texts_for(&self, recipient_id: &str) -> Vec<String> {
        self.lock()
            .delivered
            .iter()
            .filter(|delivery| delivery.recipient_id == recipient_id)
            .filter_map(|delivery| match &delivery.message {
                OutboundMessage::Text { text, .. } => Some(text.clone()),
                OutboundMessage::Receipt(_) => None,
            })
            .collect()
    }

    pub fn fail_next(&self, count: usize) {
        self.lock().fail_next = count;
    }

    pub fn fail_always(&self, enabled: bool) {
        self.lock().fail_always = enabled;
    }

    fn lock(&self) -> MutexGuard<'_, RecordingState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl MessagingGateway for RecordingGateway {
    async fn deliver(
        &self,
        recipient_id: &str,
        message: &OutboundMessage,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let mut state = self.lock();
        if state.fail_always {
            return Err(DeliveryError::Transport("recording gateway set to fail".to_owned()));
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(DeliveryError::Transport("recording gateway set to fail".to_owned()));
        }

        state.delivered.push(RecordedDelivery {
            recipient_id: recipient_id.to_owned(),
            message: message.clone(),
        });
        Ok(DeliveryReceipt {
            recipient_id: recipient_id.to_owned(),
            message_id: Some(format!("mid.recorded.{}", state.delivered.len())),
        })
    }
}
