use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use cadence_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

struct Field {
    key: &'static str,
    env_key: &'static str,
    value: String,
}

impl Field {
    fn new(key: &'static str, env_key: &'static str, value: impl ToString) -> Self {
        Self { key, env_key, value: value.to_string() }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in effective_fields(&config) {
        let source = field_source(
            field.key,
            field.env_key,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(format!("- {} = {} (source: {source})", field.key, field.value));
    }

    lines.join("\n")
}

fn effective_fields(config: &AppConfig) -> Vec<Field> {
    let workflow = &config.workflow;
    let knowledge_paths = if config.knowledge.document_paths.is_empty() {
        "<none>".to_string()
    } else {
        config
            .knowledge
            .document_paths
            .iter()
            .map(|path| path.display().to_string())
            .collect::<Vec<_>>()
            .join(",")
    };

    vec![
        Field::new("database.url", "CADENCE_DATABASE_URL", &config.database.url),
        Field::new(
            "database.max_connections",
            "CADENCE_DATABASE_MAX_CONNECTIONS",
            config.database.max_connections,
        ),
        Field::new(
            "database.timeout_secs",
            "CADENCE_DATABASE_TIMEOUT_SECS",
            config.database.timeout_secs,
        ),
        Field::new("channel.enabled", "CADENCE_CHANNEL_ENABLED", config.channel.enabled),
        Field::new(
            "channel.access_token",
            "CADENCE_CHANNEL_ACCESS_TOKEN",
            redact_secret(Some(&config.channel.access_token)),
        ),
        Field::new(
            "channel.phone_number_id",
            "CADENCE_CHANNEL_PHONE_NUMBER_ID",
            or_unset(&config.channel.phone_number_id),
        ),
        Field::new(
            "channel.verify_token",
            "CADENCE_CHANNEL_VERIFY_TOKEN",
            redact_secret(Some(&config.channel.verify_token)),
        ),
        Field::new(
            "channel.app_secret",
            "CADENCE_CHANNEL_APP_SECRET",
            redact_secret(config.channel.app_secret.as_ref()),
        ),
        Field::new("channel.api_version", "CADENCE_CHANNEL_API_VERSION", &config.channel.api_version),
        Field::new("llm.provider", "CADENCE_LLM_PROVIDER", format!("{:?}", config.llm.provider)),
        Field::new("llm.model", "CADENCE_LLM_MODEL", &config.llm.model),
        Field::new("llm.base_url", "CADENCE_LLM_BASE_URL", config.llm.endpoint()),
        Field::new("llm.api_key", "CADENCE_LLM_API_KEY", redact_secret(config.llm.api_key.as_ref())),
        Field::new("llm.timeout_secs", "CADENCE_LLM_TIMEOUT_SECS", config.llm.timeout_secs),
        Field::new(
            "workflow.stage_timeout_secs",
            "CADENCE_WORKFLOW_STAGE_TIMEOUT_SECS",
            workflow.stage_timeout_secs,
        ),
        Field::new(
            "workflow.checkpoint_timeout_secs",
            "CADENCE_WORKFLOW_CHECKPOINT_TIMEOUT_SECS",
            workflow.checkpoint_timeout_secs,
        ),
        Field::new(
            "workflow.high_threshold",
            "CADENCE_WORKFLOW_HIGH_THRESHOLD",
            workflow.high_threshold,
        ),
        Field::new(
            "workflow.critical_threshold",
            "CADENCE_WORKFLOW_CRITICAL_THRESHOLD",
            workflow.critical_threshold,
        ),
        Field::new(
            "workflow.reroute_on_handoff",
            "CADENCE_WORKFLOW_REROUTE_ON_HANDOFF",
            workflow.reroute_on_handoff,
        ),
        Field::new("knowledge.document_paths", "CADENCE_KNOWLEDGE_PATHS", knowledge_paths),
        Field::new("guardrails.enabled", "CADENCE_GUARDRAILS_ENABLED", config.guardrails.enabled),
        Field::new("server.bind_address", "CADENCE_SERVER_BIND_ADDRESS", &config.server.bind_address),
        Field::new("server.port", "CADENCE_SERVER_PORT", config.server.port),
        Field::new("logging.level", "CADENCE_LOGGING_LEVEL", &config.logging.level),
        Field::new(
            "logging.format",
            "CADENCE_LOGGING_FORMAT",
            format!("{:?}", config.logging.format),
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("cadence.toml"), PathBuf::from("config/cadence.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn or_unset(value: &str) -> &str {
    if value.trim().is_empty() {
        "<unset>"
    } else {
        value
    }
}

fn redact_secret(secret: Option<&SecretString>) -> &'static str {
    match secret {
        Some(secret) if !secret.expose_secret().trim().is_empty() => "<redacted>",
        _ => "<unset>",
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use toml::Value;

    use super::{contains_path, redact_secret};

    #[test]
    fn secrets_are_never_echoed() {
        let secret = SecretString::from("EAAG-live-token".to_string());
        assert_eq!(redact_secret(Some(&secret)), "<redacted>");
        assert_eq!(redact_secret(Some(&SecretString::from(String::new()))), "<unset>");
        assert_eq!(redact_secret(None), "<unset>");
    }

    #[test]
    fn nested_keys_are_found_in_config_documents() {
        let doc: Value = "[workflow]\nhigh_threshold = 6.5\n".parse().expect("toml");
        assert!(contains_path(&doc, "workflow.high_threshold"));
        assert!(!contains_path(&doc, "workflow.critical_threshold"));
        assert!(!contains_path(&doc, "llm.model"));
    }
}
