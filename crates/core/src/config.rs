use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub messenger: MessengerConfig,
    pub nlu: NluConfig,
    pub conversation: ConversationConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct MessengerConfig {
    /// Page access token for outbound delivery. Empty means deliveries are
    /// only recorded in memory.
    pub access_token: SecretString,
    pub verify_token: SecretString,
    pub graph_api_base_url: String,
    pub graph_api_version: String,
}

#[derive(Clone, Debug)]
pub struct NluConfig {
    pub token: SecretString,
    pub base_url: String,
    pub api_version: String,
    pub max_steps: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ConversationConfig {
    pub dispatch_timeout_secs: u64,
    pub reset_on_done: bool,
    pub small_talk_url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub access_token: Option<String>,
    pub verify_token: Option<String>,
    pub nlu_token: Option<String>,
    pub nlu_base_url: Option<String>,
    pub port: Option<u16>,
    pub dispatch_timeout_secs: Option<u64>,
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            messenger: MessengerConfig {
                access_token: String::new().into(),
                verify_token: String::new().into(),
                graph_api_base_url: "https://graph.facebook.com".to_string(),
                graph_api_version: "v2.6".to_string(),
            },
            nlu: NluConfig {
                token: String::new().into(),
                base_url: "https://api.wit.ai".to_string(),
                api_version: "20160526".to_string(),
                max_steps: 5,
                timeout_secs: 10,
            },
            conversation: ConversationConfig {
                dispatch_timeout_secs: 30,
                reset_on_done: false,
                small_talk_url: None,
            },
            server: ServerConfig { bind_address: "0.0.0.0".to_string(), port: 5000 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl MessengerConfig {
    pub fn delivery_enabled(&self) -> bool {
        !self.access_token.expose_secret().trim().is_empty()
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("parley.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(messenger) = patch.messenger {
            if let Some(access_token) = messenger.access_token {
                self.messenger.access_token = secret_value(access_token);
            }
            if let Some(verify_token) = messenger.verify_token {
                self.messenger.verify_token = secret_value(verify_token);
            }
            if let Some(graph_api_base_url) = messenger.graph_api_base_url {
                self.messenger.graph_api_base_url = graph_api_base_url;
            }
            if let Some(graph_api_version) = messenger.graph_api_version {
                self.messenger.graph_api_version = graph_api_version;
            }
        }

        if let Some(nlu) = patch.nlu {
            if let Some(token) = nlu.token {
                self.nlu.token = secret_value(token);
            }
            if let Some(base_url) = nlu.base_url {
                self.nlu.base_url = base_url;
            }
            if let Some(api_version) = nlu.api_version {
                self.nlu.api_version = api_version;
            }
            if let Some(max_steps) = nlu.max_steps {
                self.nlu.max_steps = max_steps;
            }
            if let Some(timeout_secs) = nlu.timeout_secs {
                self.nlu.timeout_secs = timeout_secs;
            }
        }

        if let Some(conversation) = patch.conversation {
            if let Some(dispatch_timeout_secs) = conversation.dispatch_timeout_secs {
                self.conversation.dispatch_timeout_secs = dispatch_timeout_secs;
            }
            if let Some(reset_on_done) = conversation.reset_on_done {
                self.conversation.reset_on_done = reset_on_done;
            }
            if let Some(small_talk_url) = conversation.small_talk_url {
                self.conversation.small_talk_url = Some(small_talk_url);
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("PARLEY_ACCESS_TOKEN").or_else(|| read_env("ACCESS_TOKEN")) {
            self.messenger.access_token = secret_value(value);
        }
        if let Some(value) = read_env("PARLEY_VERIFY_TOKEN").or_else(|| read_env("VERIFY_TOKEN")) {
            self.messenger.verify_token = secret_value(value);
        }
        if let Some(value) = read_env("PARLEY_GRAPH_API_BASE_URL") {
            self.messenger.graph_api_base_url = value;
        }
        if let Some(value) = read_env("PARLEY_GRAPH_API_VERSION") {
            self.messenger.graph_api_version = value;
        }

        if let Some(value) = read_env("PARLEY_NLU_TOKEN").or_else(|| read_env("NLU_TOKEN")) {
            self.nlu.token = secret_value(value);
        }
        if let Some(value) = read_env("PARLEY_NLU_BASE_URL") {
            self.nlu.base_url = value;
        }
        if let Some(value) = read_env("PARLEY_NLU_API_VERSION") {
            self.nlu.api_version = value;
        }
        if let Some(value) = read_env("PARLEY_NLU_MAX_STEPS") {
            self.nlu.max_steps = parse_u32("PARLEY_NLU_MAX_STEPS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_NLU_TIMEOUT_SECS") {
            self.nlu.timeout_secs = parse_u64("PARLEY_NLU_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PARLEY_DISPATCH_TIMEOUT_SECS") {
            self.conversation.dispatch_timeout_secs =
                parse_u64("PARLEY_DISPATCH_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_RESET_ON_DONE") {
            self.conversation.reset_on_done = parse_bool("PARLEY_RESET_ON_DONE", &value)?;
        }
        if let Some(value) = read_env("PARLEY_SMALL_TALK_URL") {
            self.conversation.small_talk_url = Some(value);
        }

        if let Some(value) = read_env("PARLEY_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        let port = read_env("PARLEY_PORT")
            .map(|value| ("PARLEY_PORT", value))
            .or_else(|| read_env("PORT").map(|value| ("PORT", value)));
        if let Some((key, value)) = port {
            self.server.port = parse_u16(key, &value)?;
        }

        if let Some(value) = read_env("PARLEY_LOG_LEVEL") {
            self.logging.level = value;
        }
        if let Some(value) = read_env("PARLEY_LOG_FORMAT") {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(access_token) = overrides.access_token {
            self.messenger.access_token = secret_value(access_token);
        }
        if let Some(verify_token) = overrides.verify_token {
            self.messenger.verify_token = secret_value(verify_token);
        }
        if let Some(nlu_token) = overrides.nlu_token {
            self.nlu.token = secret_value(nlu_token);
        }
        if let Some(nlu_base_url) = overrides.nlu_base_url {
            self.nlu.base_url = nlu_base_url;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(dispatch_timeout_secs) = overrides.dispatch_timeout_secs {
            self.conversation.dispatch_timeout_secs = dispatch_timeout_secs;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_messenger(&self.messenger)?;
        validate_nlu(&self.nlu)?;
        validate_conversation(&self.conversation)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("parley.toml"), PathBuf::from("config/parley.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_messenger(messenger: &MessengerConfig) -> Result<(), ConfigError> {
    if messenger.verify_token.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "messenger.verify_token is required. Set VERIFY_TOKEN to the value entered in the \
             webhook subscription settings"
                .to_string(),
        ));
    }

    validate_http_url("messenger.graph_api_base_url", &messenger.graph_api_base_url)?;

    if messenger.graph_api_version.trim().is_empty() {
        return Err(ConfigError::Validation(
            "messenger.graph_api_version must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_nlu(nlu: &NluConfig) -> Result<(), ConfigError> {
    if nlu.token.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "nlu.token is required. Set NLU_TOKEN to the server access token of the NLU app"
                .to_string(),
        ));
    }

    validate_http_url("nlu.base_url", &nlu.base_url)?;

    if nlu.max_steps == 0 || nlu.max_steps > 50 {
        return Err(ConfigError::Validation("nlu.max_steps must be in range 1..=50".to_string()));
    }

    if nlu.timeout_secs == 0 || nlu.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "nlu.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_conversation(conversation: &ConversationConfig) -> Result<(), ConfigError> {
    if conversation.dispatch_timeout_secs == 0 || conversation.dispatch_timeout_secs > 600 {
        return Err(ConfigError::Validation(
            "conversation.dispatch_timeout_secs must be in range 1..=600".to_string(),
        ));
    }

    if let Some(url) = &conversation.small_talk_url {
        validate_http_url("conversation.small_talk_url", url)?;
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address must not be empty".to_string()));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_http_url(key: &str, url: &str) -> Result<(), ConfigError> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConfigError::Validation(format!(
            "{key} must start with http:// or https://"
        )));
    }
    Ok(())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    messenger: Option<MessengerPatch>,
    nlu: Option<NluPatch>,
    conversation: Option<ConversationPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct MessengerPatch {
    access_token: Option<String>,
    verify_token: Option<String>,
    graph_api_base_url: Option<String>,
    graph_api_version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct NluPatch {
    token: Option<String>,
    base_url: Option<String>,
    api_version: Option<String>,
    max_steps: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ConversationPatch {
    dispatch_timeout_secs: Option<u64>,
    reset_on_done: Option<bool>,
    small_talk_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
