use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, warn};

pub const PAGE_OBJECT: &str = "page";
pub const SUBSCRIBE_MODE: &str = "subscribe";
pub const WRONG_TOKEN_MESSAGE: &str = "Error, wrong token";

#[derive(Clone, Debug, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct WebhookEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default, deserialize_with = "readable_events")]
    pub messaging: Vec<MessagingEvent>,
}

/// Drops events that do not fit `MessagingEvent` so one odd event cannot
/// sink the rest of the batch.
fn readable_events<'de, D>(deserializer: D) -> Result<Vec<MessagingEvent>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<Value>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|event| match serde_json::from_value(event) {
            Ok(event) => Some(event),
            Err(error) => {
                warn!(
                    event_name = "ingress.webhook.event_unreadable",
                    error = %error,
                    "skipping webhook event with an unexpected shape"
                );
                None
            }
        })
        .collect())
}

#[derive(Clone, Debug, Deserialize)]
pub struct Participant {
    pub id: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MessagingEvent {
    #[serde(default)]
    pub sender: Option<Participant>,
    #[serde(default)]
    pub recipient: Option<Participant>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub message: Option<InboundMessageBody>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct InboundMessageBody {
    #[serde(default)]
    pub mid: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub is_echo: bool,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub enum InboundContent {
    Text(String),
    Attachments(Vec<Attachment>),
}

/// One user message extracted from a webhook delivery, in payload order.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundMessage {
    pub sender_id: String,
    pub message_id: Option<String>,
    pub content: InboundContent,
}

impl InboundMessage {
    pub fn text(sender_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender_id: sender_id.into(),
            message_id: None,
            content: InboundContent::Text(text.into()),
        }
    }

    /// Correlation id for logs and reports; falls back to the sender when the
    /// platform did not send a message id.
    pub fn correlation_id(&self) -> &str {
        self.message_id.as_deref().unwrap_or(&self.sender_id)
    }
}

impl WebhookPayload {
    pub fn is_page_subscription(&self) -> bool {
        self.object == PAGE_OBJECT
    }

    /// Text and attachment messages across every entry, in order. A message
    /// carrying attachments counts as an attachment message even when it also
    /// has text. Non-page payloads, events without a sender (plugin opt-ins),
    /// events without a message (delivery and read receipts, postbacks),
    /// echoes and empty messages are skipped.
    pub fn inbound_messages(&self) -> Vec<InboundMessage> {
        if !self.is_page_subscription() {
            return Vec::new();
        }

        self.entry
            .iter()
            .flat_map(|entry| entry.messaging.iter())
            .filter_map(|event| {
                let Some(sender) = event.sender.as_ref() else {
                    debug!(
                        event_name = "ingress.webhook.event_ignored",
                        "webhook event carries no sender"
                    );
                    return None;
                };
                let Some(message) = event.message.as_ref() else {
                    debug!(
                        event_name = "ingress.webhook.event_ignored",
                        sender_id = %sender.id,
                        "webhook event carries no message"
                    );
                    return None;
                };
                if message.is_echo {
                    return None;
                }

                let content = match (&message.text, message.attachments.is_empty()) {
                    (_, false) => InboundContent::Attachments(message.attachments.clone()),
                    (Some(text), true) if !text.is_empty() => InboundContent::Text(text.clone()),
                    _ => return None,
                };

                Some(InboundMessage {
                    sender_id: sender.id.clone(),
                    message_id: message.mid.clone(),
                    content,
                })
            })
            .collect()
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode", default)]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token", default)]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge", default)]
    pub challenge: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerifyOutcome {
    Accepted { challenge: String },
    Rejected,
}

impl VerifyOutcome {
    pub fn body(&self) -> &str {
        match self {
            Self::Accepted { challenge } => challenge,
            Self::Rejected => WRONG_TOKEN_MESSAGE,
        }
    }
}

/// Subscription handshake. The token must match exactly; `hub.mode`, when
/// present, must be `subscribe`.
pub fn verify_subscription(query: &VerifyQuery, expected_token: &str) -> VerifyOutcome {
    let mode_ok = query.mode.as_deref().map_or(true, |mode| mode == SUBSCRIBE_MODE);
    let token_ok = !expected_token.is_empty()
        && query.verify_token.as_deref() == Some(expected_token);

    if mode_ok && token_ok {
        VerifyOutcome::Accepted { challenge: query.challenge.clone().unwrap_or_default() }
    } else {
        VerifyOutcome::Rejected
    }
}
