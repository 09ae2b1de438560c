use serde::{Deserialize, Serialize};

use crate::conversation::entities::{first_value, Entities, EMAIL, INTENT, ORDER_NUMBER, YES_NO};
use crate::conversation::states::{ConversationContext, Intent, Slot};
use crate::errors::ActionError;

/// Context mutations the action graph can request. Every variant is a pure
/// function of `(context, entities)`.
///
/// Clearing policy: a resolved slot ends the current request and clears the
/// intent; a missing slot leaves the intent in place so the engine can ask
/// again; terminal steps always clear the intent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transition {
    DetectIntent,
    GetOrderNumber,
    GetEmail,
    ConfirmCancellation,
    CompleteOrderInfo,
    CompleteSmallTalk,
}

/// Which reply a transition asks the surrounding action to send.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyCue {
    CancellationConfirmed,
    CancellationDeclined,
    ConfirmationUnclear,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub transition: Transition,
    pub from: ConversationContext,
    pub to: ConversationContext,
    pub cue: Option<ReplyCue>,
}

impl Transition {
    pub fn apply(
        self,
        context: &ConversationContext,
        entities: &Entities,
    ) -> Result<TransitionOutcome, ActionError> {
        let (to, cue) = match self {
            Self::DetectIntent => (detect_intent(context, entities)?, None),
            Self::GetOrderNumber => (get_order_number(context, entities)?, None),
            Self::GetEmail => (get_email(context, entities)?, None),
            Self::ConfirmCancellation => {
                let (to, cue) = confirm_cancellation(context, entities)?;
                (to, Some(cue))
            }
            Self::CompleteOrderInfo => (complete_order_info(context), None),
            Self::CompleteSmallTalk => (complete_small_talk(context), None),
        };

        Ok(TransitionOutcome { transition: self, from: context.clone(), to, cue })
    }
}

pub fn detect_intent(
    context: &ConversationContext,
    entities: &Entities,
) -> Result<ConversationContext, ActionError> {
    let intent = first_value(entities, INTENT)?
        .map(|value| Intent::from_entity_value(&value))
        .unwrap_or(Intent::NoIntent);

    Ok(ConversationContext { intent: Some(intent), done: false, ..context.clone() })
}

pub fn get_order_number(
    context: &ConversationContext,
    entities: &Entities,
) -> Result<ConversationContext, ActionError> {
    let mut next = context.clone();
    match first_value(entities, ORDER_NUMBER)? {
        Some(order_number) => {
            next.order_number = Slot::Resolved(order_number);
            next.intent = None;
        }
        None => next.order_number = Slot::Missing,
    }
    Ok(next)
}

pub fn get_email(
    context: &ConversationContext,
    entities: &Entities,
) -> Result<ConversationContext, ActionError> {
    let mut next = context.clone();
    match first_value(entities, EMAIL)? {
        Some(email) => {
            next.email = Slot::Resolved(email);
            next.intent = None;
        }
        None => next.email = Slot::Missing,
    }
    Ok(next)
}

pub fn confirm_cancellation(
    context: &ConversationContext,
    entities: &Entities,
) -> Result<(ConversationContext, ReplyCue), ActionError> {
    let answer = first_value(entities, YES_NO)?;
    let cue = match answer.as_deref().map(|value| value.trim().to_ascii_lowercase()) {
        Some(value) if matches!(value.as_str(), "yes" | "y" | "yeah" | "yep" | "true") => {
            ReplyCue::CancellationConfirmed
        }
        Some(value) if matches!(value.as_str(), "no" | "n" | "nope" | "false") => {
            ReplyCue::CancellationDeclined
        }
        _ => return Ok((context.clone(), ReplyCue::ConfirmationUnclear)),
    };

    Ok((ConversationContext { intent: None, ..context.clone() }, cue))
}

pub fn complete_order_info(context: &ConversationContext) -> ConversationContext {
    ConversationContext { intent: None, done: true, ..context.clone() }
}

pub fn complete_small_talk(context: &ConversationContext) -> ConversationContext {
    ConversationContext { intent: None, ..context.clone() }
}
