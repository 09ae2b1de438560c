use std::time::Duration;

use async_trait::async_trait;
use parley_core::{ContextFlags, ConversationContext, EngineError, Entities, SessionId};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::actions::{ActionOutcome, ActionRegistry, EngineReply, Invocation};

/// External NLU engine. One call is one dispatch: the engine may invoke any
/// number of actions through `actions` before answering with the context the
/// session should move to.
#[async_trait]
pub trait NluEngine: Send + Sync {
    async fn run_actions(
        &self,
        session_id: &SessionId,
        text: &str,
        context: ConversationContext,
        actions: &ActionRegistry,
    ) -> Result<ConversationContext, EngineError>;
}

/// Next step of a converse exchange.
#[derive(Clone, Debug, PartialEq)]
pub enum ConverseStep {
    Message { text: String, quick_replies: Vec<String> },
    Action { name: String, entities: Entities },
    Stop,
}

/// Raw converse response body.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ConverseResponse {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub quickreplies: Option<Vec<String>>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub entities: Entities,
    #[serde(default)]
    pub error: Option<String>,
}

impl ConverseResponse {
    pub fn into_step(self) -> Result<ConverseStep, EngineError> {
        if let Some(error) = self.error {
            return Err(EngineError::Upstream(error));
        }

        match self.kind.as_deref() {
            Some("msg") => Ok(ConverseStep::Message {
                text: self.msg.unwrap_or_default(),
                quick_replies: self.quickreplies.unwrap_or_default(),
            }),
            Some("action") => match self.action {
                Some(name) if !name.is_empty() => {
                    Ok(ConverseStep::Action { name, entities: self.entities })
                }
                _ => Err(EngineError::Protocol("action step without an action name".to_owned())),
            },
            Some("stop") => Ok(ConverseStep::Stop),
            Some("merge") => {
                Err(EngineError::Protocol("merge steps are not supported".to_owned()))
            }
            Some(other) => Err(EngineError::Protocol(format!("unknown step type `{other}`"))),
            None => Err(EngineError::Protocol("step without a type".to_owned())),
        }
    }
}

/// Transport for the converse protocol. `text` is only present on the first
/// call of a dispatch.
#[async_trait]
pub trait ConverseClient: Send + Sync {
    async fn converse(
        &self,
        session_id: &SessionId,
        text: Option<&str>,
        context: &ContextFlags,
    ) -> Result<ConverseStep, EngineError>;
}

#[derive(Clone, Debug)]
pub struct HttpConverseSettings {
    pub base_url: String,
    pub api_version: String,
    pub token: SecretString,
    pub timeout: Duration,
}

/// `POST {base}/converse?v=..&session_id=..&q=..` with the context flags as
/// the JSON body and the NLU token as a bearer credential.
pub struct HttpConverseClient {
    client: Client,
    endpoint: String,
    api_version: String,
    token: SecretString,
}

impl HttpConverseClient {
    pub fn new(settings: HttpConverseSettings) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|error| EngineError::Upstream(error.to_string()))?;
        let endpoint = format!("{}/converse", settings.base_url.trim_end_matches('/'));

        Ok(Self { client, endpoint, api_version: settings.api_version, token: settings.token })
    }
}

#[async_trait]
impl ConverseClient for HttpConverseClient {
    async fn converse(
        &self,
        session_id: &SessionId,
        text: Option<&str>,
        context: &ContextFlags,
    ) -> Result<ConverseStep, EngineError> {
        let mut query = vec![("v", self.api_version.as_str()), ("session_id", session_id.as_str())];
        if let Some(text) = text {
            query.push(("q", text));
        }

        let response = self
            .client
            .post(&self.endpoint)
            .query(&query)
            .bearer_auth(self.token.expose_secret())
            .json(context)
            .send()
            .await
            .map_err(|error| EngineError::Upstream(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Upstream(format!("status {status}: {body}")));
        }

        let body: ConverseResponse =
            response.json().await.map_err(|error| EngineError::Decode(error.to_string()))?;
        body.into_step()
    }
}

/// Drives the converse loop: ask for the next step, run it, repeat until the
/// engine says stop or the step budget runs out.
pub struct ConverseEngine<C> {
    client: C,
    max_steps: u32,
}

impl<C> ConverseEngine<C>
where
    C: ConverseClient,
{
    pub fn new(client: C, max_steps: u32) -> Self {
        Self { client, max_steps: max_steps.max(1) }
    }

    pub fn client(&self) -> &C {
        &self.client
    }
}

#[async_trait]
impl<C> NluEngine for ConverseEngine<C>
where
    C: ConverseClient,
{
    async fn run_actions(
        &self,
        session_id: &SessionId,
        text: &str,
        context: ConversationContext,
        actions: &ActionRegistry,
    ) -> Result<ConversationContext, EngineError> {
        let mut context = context;

        for step_index in 0..self.max_steps {
            let query = (step_index == 0).then_some(text);
            let step = self.client.converse(session_id, query, &context.to_flags()).await?;
            debug!(
                event_name = "engine.step",
                session_id = %session_id,
                step = step_index,
                kind = step_kind(&step),
                "converse step received"
            );

            match step {
                ConverseStep::Message { text: reply, quick_replies } => {
                    actions.send(session_id, EngineReply { text: reply, quick_replies }).await;
                }
                ConverseStep::Action { name, entities } => {
                    let invocation = Invocation {
                        session_id: session_id.clone(),
                        context: context.clone(),
                        text: text.to_owned(),
                        entities,
                    };
                    let outcome = actions.invoke(&name, &invocation).await?;
                    if let ActionOutcome::Context(next) = outcome {
                        context = next;
                    }
                }
                ConverseStep::Stop => return Ok(context),
            }
        }

        warn!(
            event_name = "engine.max_steps_reached",
            session_id = %session_id,
            max_steps = self.max_steps,
            "converse loop stopped at the step limit"
        );
        Ok(context)
    }
}

fn step_kind(step: &ConverseStep) -> &'static str {
    match step {
        ConverseStep::Message { .. } => "msg",
        ConverseStep::Action { .. } => "action",
        ConverseStep::Stop => "stop",
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::{extract::Query, http::HeaderMap, routing::post, Json, Router};
    use parley_core::{
        ActionError, ContextFlags, ConversationContext, EngineError, Entities, InMemoryAuditSink,
        Intent, SessionId, SessionRegistry,
    };
    use parley_messenger::RecordingGateway;
    use serde_json::{json, Value};

    use super::{
        ConverseClient, ConverseEngine, ConverseResponse, ConverseStep, HttpConverseClient,
        HttpConverseSettings, NluEngine,
    };
    use crate::actions::{ActionRegistry, ReplySender};
    use crate::orders::InMemoryOrderBook;
    use crate::small_talk::CannedSmallTalk;

    type Calls = Arc<Mutex<Vec<(Option<String>, ContextFlags)>>>;

    #[derive(Default)]
    struct ScriptedClient {
        steps: Mutex<VecDeque<Result<ConverseStep, EngineError>>>,
        calls: Calls,
    }

    impl ScriptedClient {
        fn with_steps(steps: Vec<Result<ConverseStep, EngineError>>) -> Self {
            Self { steps: Mutex::new(steps.into()), calls: Calls::default() }
        }
    }

    #[async_trait]
    impl ConverseClient for ScriptedClient {
        async fn converse(
            &self,
            _session_id: &SessionId,
            text: Option<&str>,
            context: &ContextFlags,
        ) -> Result<ConverseStep, EngineError> {
            self.calls.lock().expect("calls").push((text.map(str::to_owned), context.clone()));
            self.steps.lock().expect("steps").pop_front().unwrap_or(Ok(ConverseStep::Stop))
        }
    }

    fn action(name: &str, entities: Entities) -> Result<ConverseStep, EngineError> {
        Ok(ConverseStep::Action { name: name.to_owned(), entities })
    }

    fn registry() -> (Arc<SessionRegistry>, RecordingGateway, ActionRegistry) {
        let sessions = Arc::new(SessionRegistry::new());
        let gateway = RecordingGateway::new();
        let sender = ReplySender::new(
            sessions.clone(),
            Arc::new(gateway.clone()),
            Arc::new(InMemoryAuditSink::default()),
        );
        let registry = ActionRegistry::standard(
            sender,
            Arc::new(InMemoryOrderBook::demo()),
            Arc::new(CannedSmallTalk::default()),
        );
        (sessions, gateway, registry)
    }

    #[tokio::test]
    async fn runs_steps_until_stop_and_sends_text_only_on_the_first_call() {
        let (sessions, gateway, actions) = registry();
        let session_id = sessions.resolve_or_create("user-1");
        let engine = ConverseEngine::new(
            ScriptedClient::with_steps(vec![
                action("detectIntent", Entities::new().with("intent", "cancel_order")),
                Ok(ConverseStep::Message {
                    text: "Are you sure?".to_owned(),
                    quick_replies: vec!["Yes".to_owned(), "No".to_owned()],
                }),
                Ok(ConverseStep::Stop),
            ]),
            5,
        );

        let context = engine
            .run_actions(&session_id, "cancel my order", ConversationContext::default(), &actions)
            .await
            .expect("dispatch");

        assert_eq!(context, ConversationContext::with_intent(Intent::CancelOrder));
        assert_eq!(gateway.texts_for("user-1"), vec!["Are you sure?".to_owned()]);

        let calls = engine.client().calls.lock().expect("calls").clone();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].0.as_deref(), Some("cancel my order"));
        assert!(calls[1].0.is_none());
        assert!(calls[1].1.is_set("cancelOrder"));
    }

    #[tokio::test]
    async fn merge_steps_are_protocol_errors() {
        let response: ConverseResponse =
            serde_json::from_value(json!({"type": "merge", "entities": {}})).expect("response");

        assert!(matches!(response.into_step(), Err(EngineError::Protocol(_))));
    }

    #[tokio::test]
    async fn action_failure_aborts_the_chain() {
        let (sessions, _, actions) = registry();
        let session_id = sessions.resolve_or_create("user-1");
        let engine = ConverseEngine::new(
            ScriptedClient::with_steps(vec![
                action("detectIntent", Entities::new().with("intent", "track_order")),
                action("getOrderNumber", Entities::new().with("orderNumber", json!([1]))),
                Ok(ConverseStep::Stop),
            ]),
            5,
        );

        let result = engine
            .run_actions(&session_id, "track 1", ConversationContext::default(), &actions)
            .await;

        assert!(matches!(
            result,
            Err(EngineError::Action(ActionError::MalformedEntity { ref entity, .. }))
                if entity == "orderNumber"
        ));
        assert_eq!(engine.client().calls.lock().expect("calls").len(), 2);
    }

    #[tokio::test]
    async fn unknown_action_aborts_the_chain() {
        let (sessions, _, actions) = registry();
        let session_id = sessions.resolve_or_create("user-1");
        let client = ScriptedClient::with_steps(vec![action("bookFlight", Entities::new())]);
        let engine = ConverseEngine::new(client, 5);

        let result =
            engine.run_actions(&session_id, "hi", ConversationContext::default(), &actions).await;

        assert_eq!(
            result,
            Err(EngineError::Action(ActionError::UnknownAction("bookFlight".to_owned())))
        );
    }

    #[tokio::test]
    async fn step_budget_ends_the_dispatch_with_the_current_context() {
        let (sessions, _, actions) = registry();
        let session_id = sessions.resolve_or_create("user-1");
        let looping = (0..10)
            .map(|_| action("detectIntent", Entities::new().with("intent", "track_order")))
            .collect();
        let engine = ConverseEngine::new(ScriptedClient::with_steps(looping), 3);

        let context = engine
            .run_actions(&session_id, "track", ConversationContext::default(), &actions)
            .await
            .expect("dispatch");

        assert_eq!(context.intent, Some(Intent::TrackOrder));
        assert_eq!(engine.client().calls.lock().expect("calls").len(), 3);
    }

    #[derive(serde::Deserialize)]
    struct ConverseQuery {
        v: String,
        session_id: String,
        q: Option<String>,
    }

    #[tokio::test]
    async fn http_client_posts_context_with_bearer_token() {
        let seen: Arc<Mutex<Vec<Value>>> = Arc::default();
        let captured = seen.clone();
        let router = Router::new().route(
            "/converse",
            post(
                move |Query(query): Query<ConverseQuery>,
                      headers: HeaderMap,
                      Json(body): Json<Value>| {
                    let captured = captured.clone();
                    async move {
                        let auth = headers
                            .get("authorization")
                            .and_then(|value| value.to_str().ok())
                            .unwrap_or_default()
                            .to_owned();
                        captured.lock().expect("seen").push(json!({
                            "v": query.v,
                            "session_id": query.session_id,
                            "q": query.q,
                            "auth": auth,
                            "body": body,
                        }));
                        Json(json!({
                            "type": "action",
                            "action": "detectIntent",
                            "entities": {"intent": [{"value": "track_order", "confidence": 0.9}]}
                        }))
                    }
                },
            ),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        let client = HttpConverseClient::new(HttpConverseSettings {
            base_url: format!("http://{address}/"),
            api_version: "20160526".to_owned(),
            token: "nlu-token".to_owned().into(),
            timeout: Duration::from_secs(5),
        })
        .expect("client");

        let step = client
            .converse(
                &SessionId::from("S-1-abc"),
                Some("where is my order"),
                &ConversationContext::with_intent(Intent::NoIntent).to_flags(),
            )
            .await
            .expect("step");

        assert_eq!(
            step,
            ConverseStep::Action {
                name: "detectIntent".to_owned(),
                entities: serde_json::from_value(
                    json!({"intent": [{"value": "track_order", "confidence": 0.9}]})
                )
                .expect("entities"),
            }
        );
        let seen = seen.lock().expect("seen");
        assert_eq!(seen[0]["v"], json!("20160526"));
        assert_eq!(seen[0]["session_id"], json!("S-1-abc"));
        assert_eq!(seen[0]["q"], json!("where is my order"));
        assert_eq!(seen[0]["auth"], json!("Bearer nlu-token"));
        assert_eq!(seen[0]["body"], json!({"noIntent": true}));
    }

    #[tokio::test]
    async fn engine_error_field_is_an_upstream_error() {
        let response: ConverseResponse =
            serde_json::from_value(json!({"error": "Bad auth, check token/params"}))
                .expect("response");

        assert_eq!(
            response.into_step(),
            Err(EngineError::Upstream("Bad auth, check token/params".to_owned()))
        );
    }
}
