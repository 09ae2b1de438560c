use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parley_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use parley_core::conversation::transitions::{complete_order_info, complete_small_talk};
use parley_core::{
    ActionError, ConversationContext, Entities, ReplyCue, SessionError, SessionId,
    SessionRegistry, Transition,
};
use parley_messenger::{DeliveryReceipt, MessagingGateway, OutboundMessage, QuickReply};
use tracing::{debug, info, warn};

use crate::orders::OrderBook;
use crate::small_talk::SmallTalk;

pub const DETECT_INTENT: &str = "detectIntent";
pub const GET_ORDER_NUMBER: &str = "getOrderNumber";
pub const GET_EMAIL: &str = "getEmail";
pub const CANCEL_ORDER_CONFIRM: &str = "cancelOrderConfirm";
pub const SEND_ORDER_INFO: &str = "sendOrderInfo";
pub const CHAT_FOR_FUN: &str = "chatForFun";

pub const CANCELLED_REPLY: &str = "Done! Your order has been cancelled.";
pub const KEPT_REPLY: &str = "No problem, your order stays as it is.";
pub const CONFIRM_PROMPT_REPLY: &str = "Sorry, I didn't get that. Please answer yes or no.";
pub const ORDER_NUMBER_NEEDED_REPLY: &str = "I need your order number to look that up.";

/// What the engine hands to an action: the session, the context as of this
/// step, the user's text and the step's entities.
#[derive(Clone, Debug, PartialEq)]
pub struct Invocation {
    pub session_id: SessionId,
    pub context: ConversationContext,
    pub text: String,
    pub entities: Entities,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Replaces the dispatch's working context.
    Context(ConversationContext),
    /// Side effect only; the working context is kept.
    Completed,
}

#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &'static str;
    async fn invoke(&self, invocation: &Invocation) -> Result<ActionOutcome, ActionError>;
}

/// A message the engine wants sent verbatim.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EngineReply {
    pub text: String,
    pub quick_replies: Vec<String>,
}

impl EngineReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), quick_replies: Vec::new() }
    }

    fn into_message(self) -> OutboundMessage {
        let replies = self.quick_replies.into_iter().map(QuickReply::text).collect();
        OutboundMessage::text(self.text).with_quick_replies(replies)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered(DeliveryReceipt),
    UnknownSession,
    DeliveryFailed,
}

/// The only path from actions to the messaging gateway. Never fails: a stale
/// session or a rejected delivery is logged, reported and swallowed.
#[derive(Clone)]
pub struct ReplySender {
    sessions: Arc<SessionRegistry>,
    gateway: Arc<dyn MessagingGateway>,
    audit: Arc<dyn AuditSink>,
}

impl ReplySender {
    pub fn new(
        sessions: Arc<SessionRegistry>,
        gateway: Arc<dyn MessagingGateway>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { sessions, gateway, audit }
    }

    pub async fn deliver(&self, session_id: &SessionId, message: OutboundMessage) -> SendOutcome {
        let recipient_id = match self.sessions.external_user_id(session_id) {
            Ok(recipient_id) => recipient_id,
            Err(SessionError::UnknownSession(_)) => {
                warn!(
                    event_name = "delivery.unknown_session",
                    session_id = %session_id,
                    "no recipient for session; message dropped"
                );
                self.audit.emit(AuditEvent::new(
                    Some(session_id.clone()),
                    session_id.as_str(),
                    "delivery.unknown_session",
                    AuditCategory::Session,
                    AuditOutcome::Rejected,
                ));
                return SendOutcome::UnknownSession;
            }
        };

        match self.gateway.deliver(&recipient_id, &message).await {
            Ok(receipt) => {
                debug!(
                    event_name = "delivery.sent",
                    session_id = %session_id,
                    kind = message.kind(),
                    "reply delivered"
                );
                SendOutcome::Delivered(receipt)
            }
            Err(error) => {
                warn!(
                    event_name = "delivery.failed",
                    session_id = %session_id,
                    kind = message.kind(),
                    error = %error,
                    "reply delivery failed"
                );
                self.audit.emit(
                    AuditEvent::new(
                        Some(session_id.clone()),
                        session_id.as_str(),
                        "delivery.failed",
                        AuditCategory::Delivery,
                        AuditOutcome::Failed,
                    )
                    .with_metadata("kind", message.kind())
                    .with_metadata("error", error.to_string()),
                );
                SendOutcome::DeliveryFailed
            }
        }
    }

    pub async fn send_text(&self, session_id: &SessionId, text: impl Into<String>) -> SendOutcome {
        self.deliver(session_id, OutboundMessage::text(text)).await
    }
}

/// Name → action table handed to the engine, plus the distinguished `send`.
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
    sender: ReplySender,
}

impl ActionRegistry {
    pub fn new(sender: ReplySender) -> Self {
        Self { actions: HashMap::new(), sender }
    }

    /// The six built-in actions.
    pub fn standard(
        sender: ReplySender,
        orders: Arc<dyn OrderBook>,
        small_talk: Arc<dyn SmallTalk>,
    ) -> Self {
        let mut registry = Self::new(sender.clone());
        registry.register(ContextMutator::new(DETECT_INTENT, Transition::DetectIntent));
        registry.register(ContextMutator::new(GET_ORDER_NUMBER, Transition::GetOrderNumber));
        registry.register(ContextMutator::new(GET_EMAIL, Transition::GetEmail));
        registry.register(CancelOrderConfirm { sender: sender.clone() });
        registry.register(SendOrderInfo { sender: sender.clone(), orders });
        registry.register(ChatForFun { sender, small_talk });
        registry
    }

    pub fn register<A>(&mut self, action: A)
    where
        A: Action + 'static,
    {
        self.actions.insert(action.name().to_string(), Arc::new(action));
    }

    pub async fn invoke(
        &self,
        name: &str,
        invocation: &Invocation,
    ) -> Result<ActionOutcome, ActionError> {
        let action =
            self.actions.get(name).ok_or_else(|| ActionError::UnknownAction(name.to_owned()))?;
        debug!(
            event_name = "action.invoked",
            session_id = %invocation.session_id,
            action = name,
            "invoking action"
        );
        action.invoke(invocation).await
    }

    pub async fn send(&self, session_id: &SessionId, reply: EngineReply) -> SendOutcome {
        self.sender.deliver(session_id, reply.into_message()).await
    }

    pub fn sender(&self) -> &ReplySender {
        &self.sender
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Wraps a pure transition as an action.
pub struct ContextMutator {
    name: &'static str,
    transition: Transition,
}

impl ContextMutator {
    pub fn new(name: &'static str, transition: Transition) -> Self {
        Self { name, transition }
    }
}

#[async_trait]
impl Action for ContextMutator {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<ActionOutcome, ActionError> {
        let outcome = self.transition.apply(&invocation.context, &invocation.entities)?;
        debug!(
            event_name = "conversation.transition",
            session_id = %invocation.session_id,
            transition = ?outcome.transition,
            flags = %serde_json::Value::Object(outcome.to.to_flags().0),
            "context transition applied"
        );
        Ok(ActionOutcome::Context(outcome.to))
    }
}

struct CancelOrderConfirm {
    sender: ReplySender,
}

#[async_trait]
impl Action for CancelOrderConfirm {
    fn name(&self) -> &'static str {
        CANCEL_ORDER_CONFIRM
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<ActionOutcome, ActionError> {
        let outcome =
            Transition::ConfirmCancellation.apply(&invocation.context, &invocation.entities)?;
        let reply = match outcome.cue {
            Some(ReplyCue::CancellationConfirmed) => {
                info!(
                    event_name = "order.cancellation_confirmed",
                    session_id = %invocation.session_id,
                    order_number = invocation.context.order_number.resolved().unwrap_or(""),
                    "user confirmed cancellation"
                );
                CANCELLED_REPLY
            }
            Some(ReplyCue::CancellationDeclined) => KEPT_REPLY,
            Some(ReplyCue::ConfirmationUnclear) | None => CONFIRM_PROMPT_REPLY,
        };

        self.sender.send_text(&invocation.session_id, reply).await;
        Ok(ActionOutcome::Context(outcome.to))
    }
}

struct SendOrderInfo {
    sender: ReplySender,
    orders: Arc<dyn OrderBook>,
}

#[async_trait]
impl Action for SendOrderInfo {
    fn name(&self) -> &'static str {
        SEND_ORDER_INFO
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<ActionOutcome, ActionError> {
        let message = match invocation.context.order_number.resolved() {
            Some(order_number) => match self.orders.receipt(order_number).await {
                Some(receipt) => OutboundMessage::Receipt(receipt),
                None => OutboundMessage::text(format!(
                    "I couldn't find an order with number {order_number}."
                )),
            },
            None => OutboundMessage::text(ORDER_NUMBER_NEEDED_REPLY),
        };

        self.sender.deliver(&invocation.session_id, message).await;
        Ok(ActionOutcome::Context(complete_order_info(&invocation.context)))
    }
}

struct ChatForFun {
    sender: ReplySender,
    small_talk: Arc<dyn SmallTalk>,
}

#[async_trait]
impl Action for ChatForFun {
    fn name(&self) -> &'static str {
        CHAT_FOR_FUN
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<ActionOutcome, ActionError> {
        if let Some(reply) = self.small_talk.reply(&invocation.text).await {
            self.sender.send_text(&invocation.session_id, reply).await;
        }
        Ok(ActionOutcome::Context(complete_small_talk(&invocation.context)))
    }
}
