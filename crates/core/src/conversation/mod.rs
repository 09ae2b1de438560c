pub mod entities;
pub mod states;
pub mod transitions;

pub use entities::{first_value, Entities, EntityCandidate};
pub use states::{ContextFlags, ConversationContext, Intent, Slot};
pub use transitions::{ReplyCue, Transition, TransitionOutcome};
