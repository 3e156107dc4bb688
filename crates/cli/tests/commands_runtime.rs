use std::env;
use std::sync::{Mutex, OnceLock};

use cadence_cli::commands::{chat, doctor, migrate};
use serde_json::Value;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("CADENCE_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_openai_without_key() {
    with_env(
        &[("CADENCE_DATABASE_URL", "sqlite::memory:"), ("CADENCE_LLM_PROVIDER", "openai")],
        || {
            let result = migrate::run();
            assert_eq!(result.exit_code, 2, "expected config validation failure code");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "migrate");
            assert_eq!(payload["status"], "error");
            assert_eq!(payload["error_class"], "config_validation");
            assert!(payload["message"].as_str().unwrap_or_default().contains("llm.api_key"));
        },
    );
}

#[test]
fn doctor_json_reports_each_readiness_check_after_migrate() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("cadence.db").display());

    with_env(&[("CADENCE_DATABASE_URL", url.as_str())], || {
        assert_eq!(migrate::run().exit_code, 0);

        let result = doctor::run(true);
        assert_eq!(result.exit_code, 0, "unexpected doctor output: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "pass");
        assert_eq!(check_status(&payload, "config_validation"), "pass");
        assert_eq!(check_status(&payload, "database_connectivity"), "pass");
        assert_eq!(check_status(&payload, "checkpoint_schema"), "pass");
        assert_eq!(check_status(&payload, "inference_endpoint"), "pass");
        assert_eq!(check_status(&payload, "knowledge_documents"), "skipped");
    });
}

#[test]
fn doctor_points_at_migrate_when_schema_is_missing() {
    with_env(&[("CADENCE_DATABASE_URL", "sqlite::memory:")], || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 1);

        let payload = parse_payload(&result.output);
        assert_eq!(check_status(&payload, "database_connectivity"), "pass");
        assert_eq!(check_status(&payload, "checkpoint_schema"), "fail");
        assert!(result.output.contains("cadence migrate"));
    });
}

#[test]
fn doctor_fails_and_skips_dependent_checks_when_config_is_invalid() {
    with_env(&[("CADENCE_WORKFLOW_HIGH_THRESHOLD", "not-a-number")], || {
        let result = doctor::run(false);
        assert_eq!(result.exit_code, 1);
        assert!(result.output.starts_with("doctor: one or more readiness checks failed"));
        assert!(result.output.contains("- [fail] config_validation"));
        assert!(result.output.contains("- [skip] database_connectivity"));
        assert!(result.output.contains("- [skip] inference_endpoint"));
    });
}

#[test]
fn doctor_flags_missing_knowledge_documents() {
    with_env(
        &[
            ("CADENCE_DATABASE_URL", "sqlite::memory:"),
            ("CADENCE_KNOWLEDGE_PATHS", "/definitely/not/here/faq.md"),
        ],
        || {
            let result = doctor::run(true);
            assert_eq!(result.exit_code, 1);

            let payload = parse_payload(&result.output);
            assert_eq!(payload["overall_status"], "fail");
            let knowledge = payload["checks"]
                .as_array()
                .and_then(|checks| checks.iter().find(|check| check["name"] == "knowledge_documents"))
                .cloned()
                .expect("knowledge check present");
            assert_eq!(knowledge["status"], "fail");
            assert!(knowledge["details"].as_str().unwrap_or_default().contains("faq.md"));
        },
    );
}

#[test]
fn chat_rejects_blank_input_before_loading_anything() {
    with_env(&[], || {
        let result = chat::run("user_1", "   ");
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "chat");
        assert_eq!(payload["error_class"], "invalid_input");

        let result = chat::run("", "hello");
        assert_eq!(parse_payload(&result.output)["error_class"], "invalid_input");
    });
}

#[test]
fn chat_reports_config_failures_as_structured_errors() {
    with_env(&[("CADENCE_LLM_PROVIDER", "openai")], || {
        let result = chat::run("user_1", "how much is premium?");
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "chat");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn chat_reports_guardrail_rejections() {
    with_env(&[("CADENCE_DATABASE_URL", "sqlite::memory:")], || {
        let oversized = "a".repeat(20_000);
        let result = chat::run("user_1", &oversized);
        assert_eq!(result.exit_code, 6, "unexpected chat output: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "chat");
        assert_eq!(payload["status"], "error");
    });
}

fn check_status(payload: &Value, name: &str) -> Value {
    payload["checks"]
        .as_array()
        .and_then(|checks| checks.iter().find(|check| check["name"] == name))
        .map(|check| check["status"].clone())
        .unwrap_or(Value::Null)
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "CADENCE_DATABASE_URL",
        "CADENCE_DATABASE_MAX_CONNECTIONS",
        "CADENCE_DATABASE_TIMEOUT_SECS",
        "CADENCE_CHANNEL_ENABLED",
        "CADENCE_CHANNEL_ACCESS_TOKEN",
        "CADENCE_CHANNEL_PHONE_NUMBER_ID",
        "CADENCE_CHANNEL_VERIFY_TOKEN",
        "CADENCE_CHANNEL_APP_SECRET",
        "CADENCE_LLM_PROVIDER",
        "CADENCE_LLM_API_KEY",
        "CADENCE_LLM_BASE_URL",
        "CADENCE_LLM_MODEL",
        "CADENCE_WORKFLOW_HIGH_THRESHOLD",
        "CADENCE_WORKFLOW_CRITICAL_THRESHOLD",
        "CADENCE_KNOWLEDGE_PATHS",
        "CADENCE_GUARDRAILS_ENABLED",
        "CADENCE_LOGGING_LEVEL",
        "CADENCE_LOGGING_FORMAT",
        "CADENCE_LOG_LEVEL",
        "CADENCE_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
