use std::sync::Arc;
use std::time::Duration;

use parley_agent::{
    ActionRegistry, CannedSmallTalk, ConversationRuntime, ConverseEngine, HttpConverseClient,
    HttpConverseSettings, HttpSmallTalk, InMemoryOrderBook, ReplySender, RuntimeSettings,
    SmallTalk, TurnQueue,
};
use parley_core::config::{AppConfig, ConfigError};
use parley_core::{AuditSink, DeliveryError, EngineError, SessionRegistry};
use parley_messenger::{GraphApiGateway, GraphApiSettings, MessagingGateway, RecordingGateway};
use thiserror::Error;
use tracing::{info, warn};

use crate::audit::TracingAuditSink;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Application {
    pub config: AppConfig,
    pub sessions: Arc<SessionRegistry>,
    pub queue: Arc<TurnQueue>,
    pub delivery_mode: DeliveryMode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryMode {
    GraphApi,
    Recording,
}

impl DeliveryMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GraphApi => "graph_api",
            Self::Recording => "recording",
        }
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("nlu client setup failed: {0}")]
    Engine(#[source] EngineError),
    #[error("messaging gateway setup failed: {0}")]
    Gateway(#[source] DeliveryError),
    #[error("small talk client setup failed: {0}")]
    SmallTalk(#[source] reqwest::Error),
}

pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );
    let sessions = Arc::new(SessionRegistry::new());
    let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);

    let (gateway, delivery_mode): (Arc<dyn MessagingGateway>, DeliveryMode) =
        if config.messenger.delivery_enabled() {
            let gateway = GraphApiGateway::new(GraphApiSettings {
                base_url: config.messenger.graph_api_base_url.clone(),
                api_version: config.messenger.graph_api_version.clone(),
                access_token: config.messenger.access_token.clone(),
                timeout: DELIVERY_TIMEOUT,
            })
            .map_err(BootstrapError::Gateway)?;
            (Arc::new(gateway), DeliveryMode::GraphApi)
        } else {
            warn!(
                event_name = "system.bootstrap.delivery_disabled",
                correlation_id = "bootstrap",
                "no page access token configured; replies are only recorded in memory"
            );
            (Arc::new(RecordingGateway::new()), DeliveryMode::Recording)
        };

    let small_talk: Arc<dyn SmallTalk> = match &config.conversation.small_talk_url {
        Some(url) => Arc::new(
            HttpSmallTalk::new(url.clone(), Duration::from_secs(config.nlu.timeout_secs))
                .map_err(BootstrapError::SmallTalk)?,
        ),
        None => Arc::new(CannedSmallTalk::default()),
    };

    let sender = ReplySender::new(sessions.clone(), gateway, audit.clone());
    let actions = Arc::new(ActionRegistry::standard(
        sender,
        Arc::new(InMemoryOrderBook::demo()),
        small_talk,
    ));

    let client = HttpConverseClient::new(HttpConverseSettings {
        base_url: config.nlu.base_url.clone(),
        api_version: config.nlu.api_version.clone(),
        token: config.nlu.token.clone(),
        timeout: Duration::from_secs(config.nlu.timeout_secs),
    })
    .map_err(BootstrapError::Engine)?;
    let engine = Arc::new(ConverseEngine::new(client, config.nlu.max_steps));

    let runtime = Arc::new(ConversationRuntime::new(
        sessions.clone(),
        engine,
        actions,
        audit,
        RuntimeSettings {
            dispatch_timeout: Duration::from_secs(config.conversation.dispatch_timeout_secs),
            reset_on_done: config.conversation.reset_on_done,
        },
    ));

    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        delivery_mode = delivery_mode.as_str(),
        nlu_base_url = %config.nlu.base_url,
        max_steps = config.nlu.max_steps,
        "conversation runtime assembled"
    );

    Ok(Application {
        config,
        sessions,
        queue: Arc::new(TurnQueue::new(runtime)),
        delivery_mode,
    })
}
