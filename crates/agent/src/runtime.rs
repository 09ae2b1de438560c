use std::sync::Arc;
use std::time::Duration;

use parley_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use parley_core::{ConversationContext, EngineError, SessionId, SessionRegistry, TurnError};
use parley_messenger::{InboundContent, InboundMessage};
use tracing::{info, warn, Instrument};

use crate::actions::ActionRegistry;
use crate::engine::NluEngine;

pub const ATTACHMENT_REPLY: &str = "Sorry I can only process text messages for now.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub dispatch_timeout: Duration,
    /// Start over once a dispatch ends with `done` set.
    pub reset_on_done: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self { dispatch_timeout: Duration::from_secs(30), reset_on_done: false }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    Committed { session_id: SessionId, context: ConversationContext },
    RejectedAttachment { session_id: SessionId },
    Failed { session_id: SessionId, kind: &'static str },
}

impl TurnOutcome {
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::Committed { session_id, .. }
            | Self::RejectedAttachment { session_id }
            | Self::Failed { session_id, .. } => session_id,
        }
    }
}

/// Resolve, dispatch, persist. At most one dispatch per session is in flight:
/// the session's turn gate is held from the context read until the commit.
pub struct ConversationRuntime {
    sessions: Arc<SessionRegistry>,
    engine: Arc<dyn NluEngine>,
    actions: Arc<ActionRegistry>,
    audit: Arc<dyn AuditSink>,
    settings: RuntimeSettings,
}

impl ConversationRuntime {
    pub fn new(
        sessions: Arc<SessionRegistry>,
        engine: Arc<dyn NluEngine>,
        actions: Arc<ActionRegistry>,
        audit: Arc<dyn AuditSink>,
        settings: RuntimeSettings,
    ) -> Self {
        Self { sessions, engine, actions, audit, settings }
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub async fn handle_message(&self, message: InboundMessage) -> TurnOutcome {
        let session_id = self.sessions.resolve_or_create(&message.sender_id);
        self.run_turn(&session_id, message).await
    }

    pub async fn run_turn(&self, session_id: &SessionId, message: InboundMessage) -> TurnOutcome {
        let span = tracing::info_span!(
            "turn",
            session_id = %session_id,
            correlation_id = %message.correlation_id()
        );
        self.run_turn_inner(session_id, message).instrument(span).await
    }

    async fn run_turn_inner(&self, session_id: &SessionId, message: InboundMessage) -> TurnOutcome {
        let correlation_id = message.correlation_id().to_owned();
        let text = match message.content {
            InboundContent::Text(text) => text,
            InboundContent::Attachments(attachments) => {
                info!(
                    event_name = "ingress.attachment_rejected",
                    attachments = attachments.len(),
                    "non-text message answered with the text-only reply"
                );
                self.actions.sender().send_text(session_id, ATTACHMENT_REPLY).await;
                return TurnOutcome::RejectedAttachment { session_id: session_id.clone() };
            }
        };

        let gate = match self.sessions.turn_gate(session_id) {
            Ok(gate) => gate,
            Err(error) => return self.fail(session_id, &correlation_id, error.into()),
        };
        let _turn = gate.lock().await;

        let context = match self.sessions.context(session_id) {
            Ok(context) => context,
            Err(error) => return self.fail(session_id, &correlation_id, error.into()),
        };

        let dispatch =
            self.engine.run_actions(session_id, &text, context, self.actions.as_ref());
        let next = match tokio::time::timeout(self.settings.dispatch_timeout, dispatch).await {
            Ok(Ok(next)) => next,
            Ok(Err(error)) => return self.fail(session_id, &correlation_id, error.into()),
            Err(_) => {
                let timeout_ms =
                    u64::try_from(self.settings.dispatch_timeout.as_millis()).unwrap_or(u64::MAX);
                return self.fail(
                    session_id,
                    &correlation_id,
                    EngineError::Timeout { timeout_ms }.into(),
                );
            }
        };

        let next = if self.settings.reset_on_done && next.done {
            ConversationContext::default()
        } else {
            next
        };

        if let Err(error) = self.sessions.set_context(session_id, next.clone()) {
            return self.fail(session_id, &correlation_id, error.into());
        }

        let flags = serde_json::Value::Object(next.to_flags().0).to_string();
        info!(event_name = "conversation.turn_committed", flags = %flags, "turn committed");
        self.audit.emit(
            AuditEvent::new(
                Some(session_id.clone()),
                correlation_id,
                "conversation.turn_committed",
                AuditCategory::Session,
                AuditOutcome::Success,
            )
            .with_metadata("flags", flags),
        );

        TurnOutcome::Committed { session_id: session_id.clone(), context: next }
    }

    fn fail(&self, session_id: &SessionId, correlation_id: &str, error: TurnError) -> TurnOutcome {
        let kind = error.kind();
        warn!(
            event_name = "conversation.turn_failed",
            kind,
            error = %error,
            "turn failed; context left unchanged"
        );

        let category = match &error {
            TurnError::Session(_) => AuditCategory::Session,
            TurnError::Delivery(_) => AuditCategory::Delivery,
            TurnError::Action(_) => AuditCategory::Action,
            TurnError::Engine(EngineError::Action(_)) => AuditCategory::Action,
            TurnError::Engine(_) => AuditCategory::Engine,
        };
        self.audit.emit(
            AuditEvent::new(
                Some(session_id.clone()),
                correlation_id,
                "conversation.turn_failed",
                category,
                AuditOutcome::Failed,
            )
            .with_metadata("kind", kind)
            .with_metadata("error", error.to_string()),
        );

        TurnOutcome::Failed { session_id: session_id.clone(), kind }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use parley_core::conversation::transitions::{detect_intent, get_order_number};
    use parley_core::{
        ConversationContext, EngineError, Entities, InMemoryAuditSink, Intent, SessionId,
        SessionRegistry, Slot,
    };
    use parley_messenger::{Attachment, InboundContent, InboundMessage, RecordingGateway};
    use serde_json::Value;

    use super::{ConversationRuntime, RuntimeSettings, TurnOutcome, ATTACHMENT_REPLY};
    use crate::actions::{ActionRegistry, ReplySender};
    use crate::engine::NluEngine;
    use crate::orders::InMemoryOrderBook;
    use crate::small_talk::CannedSmallTalk;

    /// Applies transitions directly: "track" detects a track intent after a
    /// delay, anything else asks for an order number; "boom" fails and
    /// "hang" never answers in time.
    struct FakeEngine {
        delay: Duration,
        seen: Mutex<Vec<ConversationContext>>,
    }

    #[async_trait]
    impl NluEngine for FakeEngine {
        async fn run_actions(
            &self,
            _session_id: &SessionId,
            text: &str,
            context: ConversationContext,
            _actions: &ActionRegistry,
        ) -> Result<ConversationContext, EngineError> {
            self.seen.lock().expect("seen").push(context.clone());
            match text {
                "boom" => Err(EngineError::Upstream("engine unavailable".to_owned())),
                "hang" => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(context)
                }
                "done" => Ok(ConversationContext { done: true, ..context }),
                "track" => {
                    tokio::time::sleep(self.delay).await;
                    Ok(detect_intent(&context, &Entities::new().with("intent", "track_order"))
                        .expect("detect"))
                }
                _ => Ok(get_order_number(&context, &Entities::new()).expect("order number")),
            }
        }
    }

    struct Harness {
        runtime: Arc<ConversationRuntime>,
        gateway: RecordingGateway,
        audit: InMemoryAuditSink,
        engine: Arc<FakeEngine>,
    }

    fn harness(settings: RuntimeSettings, delay: Duration) -> Harness {
        let sessions = Arc::new(SessionRegistry::new());
        let gateway = RecordingGateway::new();
        let audit = InMemoryAuditSink::default();
        let sender =
            ReplySender::new(sessions.clone(), Arc::new(gateway.clone()), Arc::new(audit.clone()));
        let actions = Arc::new(ActionRegistry::standard(
            sender,
            Arc::new(InMemoryOrderBook::demo()),
            Arc::new(CannedSmallTalk::default()),
        ));
        let engine = Arc::new(FakeEngine { delay, seen: Mutex::new(Vec::new()) });
        let runtime = Arc::new(ConversationRuntime::new(
            sessions,
            engine.clone(),
            actions,
            Arc::new(audit.clone()),
            settings,
        ));
        Harness { runtime, gateway, audit, engine }
    }

    fn context_of(harness: &Harness, user: &str) -> ConversationContext {
        let sessions = harness.runtime.sessions();
        sessions.context(&sessions.resolve_or_create(user)).expect("context")
    }

    #[tokio::test]
    async fn successful_dispatch_commits_the_engine_result() {
        let harness = harness(RuntimeSettings::default(), Duration::ZERO);

        let outcome = harness.runtime.handle_message(InboundMessage::text("user-1", "track")).await;

        assert!(matches!(outcome, TurnOutcome::Committed { ref context, .. }
            if context.intent == Some(Intent::TrackOrder)));
        assert_eq!(context_of(&harness, "user-1").intent, Some(Intent::TrackOrder));
        assert_eq!(harness.audit.events_of_type("conversation.turn_committed").len(), 1);
    }

    #[tokio::test]
    async fn engine_failure_leaves_context_unchanged_and_is_reported() {
        let harness = harness(RuntimeSettings::default(), Duration::ZERO);
        harness.runtime.handle_message(InboundMessage::text("user-1", "track")).await;

        let outcome = harness.runtime.handle_message(InboundMessage::text("user-1", "boom")).await;

        assert!(matches!(outcome, TurnOutcome::Failed { kind: "engine_error", .. }));
        assert_eq!(
            context_of(&harness, "user-1"),
            ConversationContext::with_intent(Intent::TrackOrder)
        );
        let failures = harness.audit.events_of_type("conversation.turn_failed");
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].metadata.get("kind").map(String::as_str), Some("engine_error"));
    }

    #[tokio::test]
    async fn hung_dispatch_times_out_and_releases_the_session() {
        let harness = harness(
            RuntimeSettings { dispatch_timeout: Duration::from_millis(50), reset_on_done: false },
            Duration::ZERO,
        );

        let outcome = harness.runtime.handle_message(InboundMessage::text("user-1", "hang")).await;
        assert!(matches!(outcome, TurnOutcome::Failed { kind: "engine_timeout", .. }));
        assert!(context_of(&harness, "user-1").is_empty());

        let next = harness.runtime.handle_message(InboundMessage::text("user-1", "track")).await;
        assert!(matches!(next, TurnOutcome::Committed { .. }));
    }

    #[tokio::test]
    async fn attachments_get_the_text_only_reply_without_dispatch() {
        let harness = harness(RuntimeSettings::default(), Duration::ZERO);
        let message = InboundMessage {
            sender_id: "user-1".to_owned(),
            message_id: Some("mid.9".to_owned()),
            content: InboundContent::Attachments(vec![Attachment {
                kind: "image".to_owned(),
                payload: Value::Null,
            }]),
        };

        let outcome = harness.runtime.handle_message(message).await;

        assert!(matches!(outcome, TurnOutcome::RejectedAttachment { .. }));
        assert_eq!(harness.gateway.texts_for("user-1"), vec![ATTACHMENT_REPLY.to_owned()]);
        assert!(harness.engine.seen.lock().expect("seen").is_empty());
    }

    #[tokio::test]
    async fn done_context_is_reset_only_when_enabled() {
        let keep = harness(RuntimeSettings::default(), Duration::ZERO);
        keep.runtime.handle_message(InboundMessage::text("user-1", "done")).await;
        assert!(context_of(&keep, "user-1").done);

        let reset = harness(
            RuntimeSettings { reset_on_done: true, ..RuntimeSettings::default() },
            Duration::ZERO,
        );
        reset.runtime.handle_message(InboundMessage::text("user-1", "done")).await;
        assert!(context_of(&reset, "user-1").is_empty());
    }

    #[tokio::test]
    async fn concurrent_turns_for_one_session_do_not_lose_updates() {
        let harness = harness(RuntimeSettings::default(), Duration::from_millis(100));

        let first = {
            let runtime = harness.runtime.clone();
            tokio::spawn(async move {
                runtime.handle_message(InboundMessage::text("user-1", "track")).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = {
            let runtime = harness.runtime.clone();
            tokio::spawn(async move {
                runtime.handle_message(InboundMessage::text("user-1", "what?")).await
            })
        };

        first.await.expect("first turn");
        second.await.expect("second turn");

        let context = context_of(&harness, "user-1");
        assert_eq!(context.intent, Some(Intent::TrackOrder));
        assert_eq!(context.order_number, Slot::Missing);

        let seen = harness.engine.seen.lock().expect("seen").clone();
        assert_eq!(seen[1].intent, Some(Intent::TrackOrder));
    }
}
