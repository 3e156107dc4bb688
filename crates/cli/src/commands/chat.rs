use std::sync::Arc;

use cadence_agent::runtime::{AgentRuntime, InboundTurn, TurnReply};
use cadence_agent::workflow::PipelineError;
use cadence_core::audit::NoopAuditSink;
use cadence_core::config::{AppConfig, LoadOptions};
use cadence_core::domain::conversation::{meta, ThreadKey};
use cadence_db::repositories::InMemoryCheckpointStore;
use serde::Serialize;
use serde_json::Value;

use crate::commands::{current_thread_runtime, CommandResult};

#[derive(Debug, Serialize)]
struct ChatReport {
    command: &'static str,
    status: &'static str,
    thread_key: String,
    agent: Option<&'static str>,
    reply: String,
    priority_score: Option<f64>,
    escalated: bool,
    degraded_stages: Vec<String>,
}

impl ChatReport {
    fn from_reply(reply: TurnReply) -> Self {
        let degraded_stages = match reply.state.metadata.get(meta::DEGRADED_STAGES) {
            Some(Value::Array(stages)) => {
                stages.iter().filter_map(Value::as_str).map(str::to_owned).collect()
            }
            _ => Vec::new(),
        };
        Self {
            command: "chat",
            status: "ok",
            thread_key: reply.state.thread_key.to_string(),
            agent: reply.agent.map(|agent| agent.as_str()),
            reply: reply.reply,
            priority_score: reply.state.priority_score,
            escalated: reply.state.should_escalate,
            degraded_stages,
        }
    }
}

/// Runs one turn through the full workflow. The checkpoint lives only for the
/// duration of the command, so every invocation starts a fresh thread.
pub fn run(thread: &str, text: &str) -> CommandResult {
    let thread = thread.trim();
    if thread.is_empty() {
        return CommandResult::failure("chat", "invalid_input", "thread key must not be empty", 2);
    }
    if text.trim().is_empty() {
        return CommandResult::failure("chat", "invalid_input", "message text must not be empty", 2);
    }

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err(message) => return CommandResult::failure("chat", "runtime_init", message, 3),
    };

    runtime.block_on(async {
        let agent = match AgentRuntime::bootstrap(
            &config,
            Arc::new(InMemoryCheckpointStore::default()),
            Arc::new(NoopAuditSink),
        )
        .await
        {
            Ok(agent) => agent,
            Err(error) => {
                return CommandResult::failure("chat", "agent_bootstrap", format!("{error:#}"), 4);
            }
        };

        let inbound = InboundTurn {
            thread_key: ThreadKey(thread.to_string()),
            sender: thread.to_string(),
            text: text.to_string(),
            user_id: None,
            correlation_id: format!("cli-{thread}"),
        };

        match agent.handle_inbound(&inbound).await {
            Ok(reply) => CommandResult::report(0, &ChatReport::from_reply(reply)),
            Err(PipelineError::Validation { reason_code, user_message }) => {
                CommandResult::failure("chat", reason_code, user_message, 6)
            }
            Err(error) => CommandResult::failure("chat", "pipeline", error.to_string(), 5),
        }
    })
}
