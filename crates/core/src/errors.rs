use thiserror::Error;

use crate::session::SessionId;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("unknown session `{0}`")]
    UnknownSession(SessionId),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("no action registered under `{0}`")]
    UnknownAction(String),
    #[error("entity `{entity}` has a malformed value: {detail}")]
    MalformedEntity { entity: String, detail: String },
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("action `{action}` failed: {detail}")]
    Fault { action: String, detail: String },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("messaging gateway unreachable: {0}")]
    Transport(String),
    #[error("messaging gateway rejected the message: {0}")]
    Rejected(String),
    #[error("messaging gateway response could not be decoded: {0}")]
    Decode(String),
    #[error("outbound message could not be encoded: {0}")]
    Encode(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("nlu engine request failed: {0}")]
    Upstream(String),
    #[error("nlu engine protocol violation: {0}")]
    Protocol(String),
    #[error("nlu engine response could not be decoded: {0}")]
    Decode(String),
    #[error("nlu dispatch timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error(transparent)]
    Action(#[from] ActionError),
}

/// Everything a single conversational turn can fail with. Turns never surface
/// these to the webhook caller; they are logged and reported instead.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TurnError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Action(#[from] ActionError),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl TurnError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Session(SessionError::UnknownSession(_)) => "unknown_session",
            Self::Action(_) | Self::Engine(EngineError::Action(_)) => "action_error",
            Self::Delivery(_) => "delivery_error",
            Self::Engine(EngineError::Timeout { .. }) => "engine_timeout",
            Self::Engine(_) => "engine_error",
        }
    }
}
