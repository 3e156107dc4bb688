use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub channel: ChannelConfig,
    pub llm: LlmConfig,
    pub workflow: WorkflowConfig,
    pub knowledge: KnowledgeConfig,
    pub guardrails: GuardrailConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// WhatsApp Cloud API connector settings.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    pub enabled: bool,
    pub access_token: SecretString,
    pub phone_number_id: String,
    pub verify_token: SecretString,
    pub app_secret: Option<SecretString>,
    pub api_version: String,
    pub base_url: String,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Clone, Debug)]
pub struct WorkflowConfig {
    pub stage_timeout_secs: u64,
    pub checkpoint_timeout_secs: u64,
    pub retrieval_top_k: usize,
    pub history_window: usize,
    pub support_turn_limit: usize,
    pub high_threshold: f64,
    pub critical_threshold: f64,
    pub reroute_on_handoff: bool,
}

#[derive(Clone, Debug)]
pub struct KnowledgeConfig {
    pub document_paths: Vec<PathBuf>,
    pub chunk_size: usize,
}

#[derive(Clone, Debug)]
pub struct GuardrailConfig {
    pub enabled: bool,
    pub max_message_chars: usize,
    pub rate_limit_per_minute: u32,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Ollama,
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
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_base_url: Option<String>,
    pub server_port: Option<u16>,
    pub knowledge_paths: Option<Vec<PathBuf>>,
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
            database: DatabaseConfig {
                url: "sqlite://cadence.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            channel: ChannelConfig {
                enabled: false,
                access_token: String::new().into(),
                phone_number_id: String::new(),
                verify_token: String::new().into(),
                app_secret: None,
                api_version: "v21.0".to_string(),
                base_url: "https://graph.facebook.com".to_string(),
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: None,
                model: "llama3.1".to_string(),
                timeout_secs: 30,
                max_tokens: 500,
                temperature: 0.7,
            },
            workflow: WorkflowConfig {
                stage_timeout_secs: 20,
                checkpoint_timeout_secs: 5,
                retrieval_top_k: 3,
                history_window: 5,
                support_turn_limit: 10,
                high_threshold: 7.0,
                critical_threshold: 9.0,
                reroute_on_handoff: true,
            },
            knowledge: KnowledgeConfig { document_paths: Vec::new(), chunk_size: 1000 },
            guardrails: GuardrailConfig {
                enabled: true,
                max_message_chars: 4096,
                rate_limit_per_minute: 10,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl LlmProvider {
    /// OpenAI-compatible API root used when `llm.base_url` is unset.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Ollama => "http://localhost:11434/v1",
        }
    }
}

impl LlmConfig {
    pub fn endpoint(&self) -> &str {
        self.base_url.as_deref().unwrap_or_else(|| self.provider.default_base_url())
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
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

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("cadence.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(channel) = patch.channel {
            if let Some(enabled) = channel.enabled {
                self.channel.enabled = enabled;
            }
            if let Some(access_token) = channel.access_token {
                self.channel.access_token = secret_value(access_token);
            }
            if let Some(phone_number_id) = channel.phone_number_id {
                self.channel.phone_number_id = phone_number_id;
            }
            if let Some(verify_token) = channel.verify_token {
                self.channel.verify_token = secret_value(verify_token);
            }
            if let Some(app_secret) = channel.app_secret {
                self.channel.app_secret = Some(secret_value(app_secret));
            }
            if let Some(api_version) = channel.api_version {
                self.channel.api_version = api_version;
            }
            if let Some(base_url) = channel.base_url {
                self.channel.base_url = base_url;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_tokens) = llm.max_tokens {
                self.llm.max_tokens = max_tokens;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
        }

        if let Some(workflow) = patch.workflow {
            if let Some(stage_timeout_secs) = workflow.stage_timeout_secs {
                self.workflow.stage_timeout_secs = stage_timeout_secs;
            }
            if let Some(checkpoint_timeout_secs) = workflow.checkpoint_timeout_secs {
                self.workflow.checkpoint_timeout_secs = checkpoint_timeout_secs;
            }
            if let Some(retrieval_top_k) = workflow.retrieval_top_k {
                self.workflow.retrieval_top_k = retrieval_top_k;
            }
            if let Some(history_window) = workflow.history_window {
                self.workflow.history_window = history_window;
            }
            if let Some(support_turn_limit) = workflow.support_turn_limit {
                self.workflow.support_turn_limit = support_turn_limit;
            }
            if let Some(high_threshold) = workflow.high_threshold {
                self.workflow.high_threshold = high_threshold;
            }
            if let Some(critical_threshold) = workflow.critical_threshold {
                self.workflow.critical_threshold = critical_threshold;
            }
            if let Some(reroute_on_handoff) = workflow.reroute_on_handoff {
                self.workflow.reroute_on_handoff = reroute_on_handoff;
            }
        }

        if let Some(knowledge) = patch.knowledge {
            if let Some(document_paths) = knowledge.document_paths {
                self.knowledge.document_paths = document_paths;
            }
            if let Some(chunk_size) = knowledge.chunk_size {
                self.knowledge.chunk_size = chunk_size;
            }
        }

        if let Some(guardrails) = patch.guardrails {
            if let Some(enabled) = guardrails.enabled {
                self.guardrails.enabled = enabled;
            }
            if let Some(max_message_chars) = guardrails.max_message_chars {
                self.guardrails.max_message_chars = max_message_chars;
            }
            if let Some(rate_limit_per_minute) = guardrails.rate_limit_per_minute {
                self.guardrails.rate_limit_per_minute = rate_limit_per_minute;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
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
        if let Some(value) = read_env("CADENCE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("CADENCE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("CADENCE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("CADENCE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("CADENCE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CADENCE_CHANNEL_ENABLED") {
            self.channel.enabled = parse_bool("CADENCE_CHANNEL_ENABLED", &value)?;
        }
        if let Some(value) = read_env("CADENCE_CHANNEL_ACCESS_TOKEN") {
            self.channel.access_token = secret_value(value);
        }
        if let Some(value) = read_env("CADENCE_CHANNEL_PHONE_NUMBER_ID") {
            self.channel.phone_number_id = value;
        }
        if let Some(value) = read_env("CADENCE_CHANNEL_VERIFY_TOKEN") {
            self.channel.verify_token = secret_value(value);
        }
        if let Some(value) = read_env("CADENCE_CHANNEL_APP_SECRET") {
            self.channel.app_secret = Some(secret_value(value));
        }
        if let Some(value) = read_env("CADENCE_CHANNEL_API_VERSION") {
            self.channel.api_version = value;
        }
        if let Some(value) = read_env("CADENCE_CHANNEL_BASE_URL") {
            self.channel.base_url = value;
        }

        if let Some(value) = read_env("CADENCE_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("CADENCE_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("CADENCE_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("CADENCE_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("CADENCE_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("CADENCE_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CADENCE_LLM_MAX_TOKENS") {
            self.llm.max_tokens = parse_u32("CADENCE_LLM_MAX_TOKENS", &value)?;
        }
        if let Some(value) = read_env("CADENCE_LLM_TEMPERATURE") {
            self.llm.temperature = parse_f32("CADENCE_LLM_TEMPERATURE", &value)?;
        }

        if let Some(value) = read_env("CADENCE_WORKFLOW_STAGE_TIMEOUT_SECS") {
            self.workflow.stage_timeout_secs =
                parse_u64("CADENCE_WORKFLOW_STAGE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CADENCE_WORKFLOW_CHECKPOINT_TIMEOUT_SECS") {
            self.workflow.checkpoint_timeout_secs =
                parse_u64("CADENCE_WORKFLOW_CHECKPOINT_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CADENCE_WORKFLOW_HIGH_THRESHOLD") {
            self.workflow.high_threshold = parse_f64("CADENCE_WORKFLOW_HIGH_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("CADENCE_WORKFLOW_CRITICAL_THRESHOLD") {
            self.workflow.critical_threshold =
                parse_f64("CADENCE_WORKFLOW_CRITICAL_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("CADENCE_WORKFLOW_REROUTE_ON_HANDOFF") {
            self.workflow.reroute_on_handoff =
                parse_bool("CADENCE_WORKFLOW_REROUTE_ON_HANDOFF", &value)?;
        }

        if let Some(value) = read_env("CADENCE_KNOWLEDGE_PATHS") {
            self.knowledge.document_paths = value
                .split(',')
                .map(str::trim)
                .filter(|path| !path.is_empty())
                .map(PathBuf::from)
                .collect();
        }

        if let Some(value) = read_env("CADENCE_GUARDRAILS_ENABLED") {
            self.guardrails.enabled = parse_bool("CADENCE_GUARDRAILS_ENABLED", &value)?;
        }

        if let Some(value) = read_env("CADENCE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CADENCE_SERVER_PORT") {
            self.server.port = parse_u16("CADENCE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("CADENCE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("CADENCE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("CADENCE_LOGGING_LEVEL").or_else(|| read_env("CADENCE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CADENCE_LOGGING_FORMAT").or_else(|| read_env("CADENCE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_base_url) = overrides.llm_base_url {
            self.llm.base_url = Some(llm_base_url);
        }
        if let Some(server_port) = overrides.server_port {
            self.server.port = server_port;
        }
        if let Some(knowledge_paths) = overrides.knowledge_paths {
            self.knowledge.document_paths = knowledge_paths;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_channel(&self.channel)?;
        validate_llm(&self.llm)?;
        validate_workflow(&self.workflow)?;
        validate_knowledge(&self.knowledge)?;
        validate_guardrails(&self.guardrails)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("cadence.toml"), PathBuf::from("config/cadence.toml")]
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

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_channel(channel: &ChannelConfig) -> Result<(), ConfigError> {
    if !channel.base_url.starts_with("http://") && !channel.base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "channel.base_url must start with http:// or https://".to_string(),
        ));
    }

    if !channel.api_version.starts_with('v') {
        return Err(ConfigError::Validation(format!(
            "channel.api_version must look like `v21.0`, got `{}`",
            channel.api_version
        )));
    }

    if !channel.enabled {
        return Ok(());
    }

    if channel.access_token.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "channel.access_token is required when channel.enabled is true. Get it from Meta for Developers > Your App > WhatsApp > API Setup".to_string(),
        ));
    }
    if channel.phone_number_id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "channel.phone_number_id is required when channel.enabled is true".to_string(),
        ));
    }
    if channel.verify_token.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "channel.verify_token is required when channel.enabled is true; it must match the token configured for the webhook".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    if llm.provider == LlmProvider::OpenAi {
        let missing = llm
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing {
            return Err(ConfigError::Validation(
                "llm.api_key is required for the openai provider".to_string(),
            ));
        }
    }

    if let Some(base_url) = &llm.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "llm.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_workflow(workflow: &WorkflowConfig) -> Result<(), ConfigError> {
    if workflow.stage_timeout_secs == 0 || workflow.stage_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "workflow.stage_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if workflow.checkpoint_timeout_secs == 0 || workflow.checkpoint_timeout_secs > 60 {
        return Err(ConfigError::Validation(
            "workflow.checkpoint_timeout_secs must be in range 1..=60".to_string(),
        ));
    }

    if workflow.history_window == 0 {
        return Err(ConfigError::Validation(
            "workflow.history_window must be greater than zero".to_string(),
        ));
    }

    let in_range = |value: f64| value.is_finite() && (0.0..=10.0).contains(&value);
    if !in_range(workflow.high_threshold) || !in_range(workflow.critical_threshold) {
        return Err(ConfigError::Validation(
            "workflow priority thresholds must be within 0.0..=10.0".to_string(),
        ));
    }

    if workflow.high_threshold > workflow.critical_threshold {
        return Err(ConfigError::Validation(format!(
            "workflow.high_threshold ({}) must not exceed workflow.critical_threshold ({})",
            workflow.high_threshold, workflow.critical_threshold
        )));
    }

    Ok(())
}

fn validate_knowledge(knowledge: &KnowledgeConfig) -> Result<(), ConfigError> {
    if knowledge.chunk_size < 100 {
        return Err(ConfigError::Validation(
            "knowledge.chunk_size must be at least 100 characters".to_string(),
        ));
    }

    Ok(())
}

fn validate_guardrails(guardrails: &GuardrailConfig) -> Result<(), ConfigError> {
    if guardrails.max_message_chars == 0 {
        return Err(ConfigError::Validation(
            "guardrails.max_message_chars must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
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

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    parse_env(key, value)
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    parse_env(key, value)
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    parse_env(key, value)
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    parse_env(key, value)
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    parse_env(key, value)
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    parse_env(key, value)
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    channel: Option<ChannelPatch>,
    llm: Option<LlmPatch>,
    workflow: Option<WorkflowPatch>,
    knowledge: Option<KnowledgePatch>,
    guardrails: Option<GuardrailPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ChannelPatch {
    enabled: Option<bool>,
    access_token: Option<String>,
    phone_number_id: Option<String>,
    verify_token: Option<String>,
    app_secret: Option<String>,
    api_version: Option<String>,
    base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    stage_timeout_secs: Option<u64>,
    checkpoint_timeout_secs: Option<u64>,
    retrieval_top_k: Option<usize>,
    history_window: Option<usize>,
    support_turn_limit: Option<usize>,
    high_threshold: Option<f64>,
    critical_threshold: Option<f64>,
    reroute_on_handoff: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct KnowledgePatch {
    document_paths: Option<Vec<PathBuf>>,
    chunk_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct GuardrailPatch {
    enabled: Option<bool>,
    max_message_chars: Option<usize>,
    rate_limit_per_minute: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
