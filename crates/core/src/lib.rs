//! Conversation core: session table, typed conversational context and its
//! transitions, the error taxonomy shared by every crate, and configuration.

pub mod audit;
pub mod config;
pub mod conversation;
pub mod errors;
pub mod session;

pub use audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use conversation::{
    first_value, ContextFlags, ConversationContext, Entities, EntityCandidate, Intent, ReplyCue,
    Slot, Transition, TransitionOutcome,
};
pub use errors::{ActionError, DeliveryError, EngineError, SessionError, TurnError};
pub use session::{SessionId, SessionRegistry, TurnGate};
