use cadence_core::config::{AppConfig, LlmProvider, LoadOptions};
use cadence_db::{connect_with_settings, DbPool};
use serde::Serialize;

use crate::commands::{current_thread_runtime, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn skipped(name: &'static str) -> Self {
        Self {
            name,
            status: CheckStatus::Skipped,
            details: "skipped because configuration did not load".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    if json_output {
        return CommandResult::report(exit_code, &report);
    }

    CommandResult { exit_code, output: render_human(&report) }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.extend(check_database(&config));
            checks.push(check_inference_endpoint(&config));
            checks.push(check_knowledge_documents(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.push(DoctorCheck::skipped("database_connectivity"));
            checks.push(DoctorCheck::skipped("checkpoint_schema"));
            checks.push(DoctorCheck::skipped("inference_endpoint"));
            checks.push(DoctorCheck::skipped("knowledge_documents"));
        }
    }

    // Skipped checks only count against readiness when something else failed.
    let healthy = checks.iter().all(|check| check.status != CheckStatus::Fail);
    let overall_status = if healthy { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if healthy {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err(details) => {
            return vec![
                DoctorCheck { name: "database_connectivity", status: CheckStatus::Fail, details },
                unreachable_schema(),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck {
                        name: "database_connectivity",
                        status: CheckStatus::Fail,
                        details: format!("failed to connect to database: {error}"),
                    },
                    unreachable_schema(),
                ];
            }
        };

        let schema = match sqlx_count(&pool, "SELECT COUNT(*) FROM conversation_checkpoint").await {
            Ok(threads) => DoctorCheck {
                name: "checkpoint_schema",
                status: CheckStatus::Pass,
                details: format!("{threads} checkpointed thread(s)"),
            },
            Err(error) => DoctorCheck {
                name: "checkpoint_schema",
                status: CheckStatus::Fail,
                details: format!("checkpoint table unavailable ({error}); run `cadence migrate`"),
            },
        };
        pool.close().await;

        vec![
            DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Pass,
                details: format!("connected using `{}`", config.database.url),
            },
            schema,
        ]
    })
}

fn unreachable_schema() -> DoctorCheck {
    DoctorCheck {
        name: "checkpoint_schema",
        status: CheckStatus::Skipped,
        details: "skipped because the database is unreachable".to_string(),
    }
}

async fn sqlx_count(pool: &DbPool, query: &str) -> Result<i64, String> {
    sqlx::query_scalar::<_, i64>(query).fetch_one(pool).await.map_err(|error| error.to_string())
}

/// Presence only: no request is sent to the provider.
fn check_inference_endpoint(config: &AppConfig) -> DoctorCheck {
    let endpoint = config.llm.endpoint();
    if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
        return DoctorCheck {
            name: "inference_endpoint",
            status: CheckStatus::Fail,
            details: format!("endpoint `{endpoint}` is not an http(s) url"),
        };
    }

    let credentials = match (config.llm.provider, config.llm.api_key.is_some()) {
        (_, true) => "api key present",
        (LlmProvider::Ollama, false) => "no api key required",
        (LlmProvider::OpenAi, false) => {
            return DoctorCheck {
                name: "inference_endpoint",
                status: CheckStatus::Fail,
                details: "openai provider selected without llm.api_key".to_string(),
            };
        }
    };

    DoctorCheck {
        name: "inference_endpoint",
        status: CheckStatus::Pass,
        details: format!("model `{}` at `{endpoint}`, {credentials}", config.llm.model),
    }
}

fn check_knowledge_documents(config: &AppConfig) -> DoctorCheck {
    let paths = &config.knowledge.document_paths;
    if paths.is_empty() {
        return DoctorCheck {
            name: "knowledge_documents",
            status: CheckStatus::Skipped,
            details: "no knowledge documents configured".to_string(),
        };
    }

    let missing: Vec<String> =
        paths.iter().filter(|path| !path.exists()).map(|path| path.display().to_string()).collect();
    if missing.is_empty() {
        DoctorCheck {
            name: "knowledge_documents",
            status: CheckStatus::Pass,
            details: format!("{} document path(s) found", paths.len()),
        }
    } else {
        DoctorCheck {
            name: "knowledge_documents",
            status: CheckStatus::Fail,
            details: format!("missing: {}", missing.join(", ")),
        }
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}
