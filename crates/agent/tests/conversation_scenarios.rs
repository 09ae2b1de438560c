use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use parley_agent::{
    ActionRegistry, CannedSmallTalk, ConversationRuntime, ConverseClient, ConverseEngine,
    ConverseStep, EngineReply, InMemoryOrderBook, ReplySender, RuntimeSettings, SendOutcome,
    TurnOutcome, TurnQueue,
};
use parley_core::{ContextFlags, EngineError, InMemoryAuditSink, SessionId, SessionRegistry};
use parley_messenger::{InboundMessage, OutboundMessage, RecordingGateway};
use serde_json::{json, Value};

/// Stands in for the NLU service: every user message maps to a scripted list
/// of converse steps, and every converse call is recorded with the flags it
/// carried.
#[derive(Default)]
struct ScriptedConverse {
    scripts: Mutex<HashMap<String, VecDeque<ConverseStep>>>,
    current: Mutex<VecDeque<ConverseStep>>,
    calls: Mutex<Vec<(Option<String>, ContextFlags)>>,
    delay: Duration,
}

impl ScriptedConverse {
    fn script(self, text: &str, steps: Vec<ConverseStep>) -> Self {
        self.scripts.lock().expect("scripts").insert(text.to_owned(), steps.into());
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

struct SharedConverse(Arc<ScriptedConverse>);

#[async_trait]
impl ConverseClient for SharedConverse {
    async fn converse(
        &self,
        _session_id: &SessionId,
        text: Option<&str>,
        context: &ContextFlags,
    ) -> Result<ConverseStep, EngineError> {
        self.0.converse(text, context).await
    }
}

impl ScriptedConverse {
    async fn converse(
        &self,
        text: Option<&str>,
        context: &ContextFlags,
    ) -> Result<ConverseStep, EngineError> {
        self.calls.lock().expect("calls").push((text.map(str::to_owned), context.clone()));

        if let Some(text) = text {
            let script = self.scripts.lock().expect("scripts").get(text).cloned();
            *self.current.lock().expect("current") = script.unwrap_or_default();
            tokio::time::sleep(self.delay).await;
        }

        Ok(self.current.lock().expect("current").pop_front().unwrap_or(ConverseStep::Stop))
    }
}

fn action(name: &str, entities: Value) -> ConverseStep {
    ConverseStep::Action {
        name: name.to_owned(),
        entities: serde_json::from_value(entities).expect("entities"),
    }
}

fn say(text: &str, quick_replies: &[&str]) -> ConverseStep {
    ConverseStep::Message {
        text: text.to_owned(),
        quick_replies: quick_replies.iter().map(|reply| (*reply).to_owned()).collect(),
    }
}

struct Bot {
    runtime: Arc<ConversationRuntime>,
    sessions: Arc<SessionRegistry>,
    gateway: RecordingGateway,
    audit: InMemoryAuditSink,
    converse: Arc<ScriptedConverse>,
}

impl Bot {
    fn new(converse: ScriptedConverse) -> Self {
        let converse = Arc::new(converse);
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
        let runtime = Arc::new(ConversationRuntime::new(
            sessions.clone(),
            Arc::new(ConverseEngine::new(SharedConverse(converse.clone()), 5)),
            actions,
            Arc::new(audit.clone()),
            RuntimeSettings::default(),
        ));
        Self { runtime, sessions, gateway, audit, converse }
    }

    async fn say(&self, user: &str, text: &str) -> TurnOutcome {
        self.runtime.handle_message(InboundMessage::text(user, text)).await
    }

    fn flags(&self, user: &str) -> Value {
        let session_id = self.sessions.resolve_or_create(user);
        serde_json::to_value(self.sessions.context(&session_id).expect("context")).expect("flags")
    }
}

#[tokio::test]
async fn cancel_order_is_confirmed_and_the_intent_cleared() {
    let bot = Bot::new(
        ScriptedConverse::default()
            .script(
                "cancel my order",
                vec![
                    action("detectIntent", json!({"intent": [{"value": "cancel_order"}]})),
                    say("Are you sure you want to cancel your order?", &["Yes", "No"]),
                    ConverseStep::Stop,
                ],
            )
            .script(
                "yes",
                vec![
                    action("cancelOrderConfirm", json!({"yes_no": [{"value": "yes"}]})),
                    ConverseStep::Stop,
                ],
            ),
    );

    bot.say("1254477777", "cancel my order").await;
    assert_eq!(bot.flags("1254477777"), json!({"cancelOrder": true}));

    let outcome = bot.say("1254477777", "yes").await;
    assert!(matches!(outcome, TurnOutcome::Committed { .. }));
    assert_eq!(bot.flags("1254477777"), json!({}));

    let texts = bot.gateway.texts_for("1254477777");
    assert_eq!(texts.len(), 2);
    assert_eq!(texts[0], "Are you sure you want to cancel your order?");
    assert_eq!(texts[1], parley_agent::actions::CANCELLED_REPLY);
}

#[tokio::test]
async fn unrecognised_text_sets_no_intent_without_sending() {
    let bot = Bot::new(ScriptedConverse::default().script(
        "the weather is nice",
        vec![action("detectIntent", json!({})), ConverseStep::Stop],
    ));

    bot.say("user-2", "the weather is nice").await;

    assert_eq!(bot.flags("user-2"), json!({"noIntent": true}));
    assert!(bot.gateway.deliveries().is_empty());
}

#[tokio::test]
async fn track_order_resolves_the_order_number_and_clears_the_intent() {
    let bot = Bot::new(ScriptedConverse::default().script(
        "track order 12345",
        vec![
            action(
                "detectIntent",
                json!({"intent": [{"value": "track_order", "confidence": 0.98}]}),
            ),
            action("getOrderNumber", json!({"orderNumber": [{"value": "12345"}]})),
            ConverseStep::Stop,
        ],
    ));

    bot.say("user-3", "track order 12345").await;

    assert_eq!(
        bot.flags("user-3"),
        json!({"getOrderNumber": "success", "orderNumber": "12345"})
    );
    let calls = bot.converse.calls.lock().expect("calls").clone();
    assert!(calls[1].1.is_set("trackOrder"));
    assert_eq!(calls[2].1.get("getOrderNumber"), Some(&json!("success")));
    assert!(!calls[2].1.is_set("trackOrder"));
}

#[tokio::test]
async fn order_info_sends_a_receipt_and_finishes_the_conversation() {
    let bot = Bot::new(
        ScriptedConverse::default()
            .script(
                "where is order 12345",
                vec![
                    action("detectIntent", json!({"intent": [{"value": "track_order"}]})),
                    action("getOrderNumber", json!({"orderNumber": [{"value": 12345}]})),
                    action("sendOrderInfo", json!({})),
                    ConverseStep::Stop,
                ],
            ),
    );

    bot.say("user-4", "where is order 12345").await;

    assert_eq!(
        bot.flags("user-4"),
        json!({"getOrderNumber": "success", "orderNumber": "12345", "done": true})
    );
    let deliveries = bot.gateway.deliveries();
    assert!(matches!(
        &deliveries[0].message,
        OutboundMessage::Receipt(receipt) if receipt.order_number == "12345"
    ));
}

#[tokio::test]
async fn failing_action_rolls_back_the_whole_dispatch() {
    let bot = Bot::new(
        ScriptedConverse::default()
            .script(
                "track it",
                vec![action("detectIntent", json!({"intent": [{"value": "track_order"}]}))],
            )
            .script(
                "order [1, 2]",
                vec![
                    action("getOrderNumber", json!({"orderNumber": [{"value": "777"}]})),
                    action("getEmail", json!({"email": [{"value": ["a@b.c"]}]})),
                ],
            ),
    );

    bot.say("user-5", "track it").await;
    let outcome = bot.say("user-5", "order [1, 2]").await;

    assert!(matches!(outcome, TurnOutcome::Failed { kind: "action_error", .. }));
    assert_eq!(bot.flags("user-5"), json!({"trackOrder": true}));
    assert_eq!(bot.audit.events_of_type("conversation.turn_failed").len(), 1);
}

#[tokio::test]
async fn dispatch_commits_even_when_every_delivery_fails() {
    let bot = Bot::new(ScriptedConverse::default().script(
        "cancel my order",
        vec![
            say("Are you sure you want to cancel your order?", &["Yes", "No"]),
            action("detectIntent", json!({"intent": [{"value": "cancel_order"}]})),
            ConverseStep::Stop,
        ],
    ));
    bot.gateway.fail_always(true);

    let outcome = bot.say("user-7", "cancel my order").await;

    assert!(matches!(outcome, TurnOutcome::Committed { .. }));
    assert_eq!(bot.flags("user-7"), json!({"cancelOrder": true}));
    assert!(bot.gateway.deliveries().is_empty());
    assert_eq!(bot.audit.events_of_type("delivery.failed").len(), 1);
}

#[tokio::test]
async fn queued_turns_for_one_user_see_each_others_context() {
    let bot = Bot::new(
        ScriptedConverse::default()
            .with_delay(Duration::from_millis(30))
            .script(
                "track my order",
                vec![
                    action("detectIntent", json!({"intent": [{"value": "track_order"}]})),
                    ConverseStep::Stop,
                ],
            )
            .script(
                "I don't know it",
                vec![action("getOrderNumber", json!({})), ConverseStep::Stop],
            ),
    );
    let queue = TurnQueue::new(bot.runtime.clone());

    let first = queue.submit(InboundMessage::text("user-6", "track my order"));
    let second = queue.submit(InboundMessage::text("user-6", "I don't know it"));
    first.outcome().await.expect("first turn");
    second.outcome().await.expect("second turn");

    assert_eq!(bot.flags("user-6"), json!({"trackOrder": true, "missingOrderNumber": true}));
}

#[tokio::test]
async fn send_to_a_stale_session_is_dropped_quietly() {
    let bot = Bot::new(ScriptedConverse::default());
    let sender = ReplySender::new(
        bot.sessions.clone(),
        Arc::new(bot.gateway.clone()),
        Arc::new(bot.audit.clone()),
    );
    let registry = ActionRegistry::new(sender);

    let outcome =
        registry.send(&SessionId::from("S-1-00000000"), EngineReply::text("anyone there?")).await;

    assert_eq!(outcome, SendOutcome::UnknownSession);
    assert!(bot.gateway.deliveries().is_empty());
    assert_eq!(bot.sessions.len(), 0);
}
