//! Inference gateway contract.
//!
//! Every stage that needs language understanding talks to the model through
//! [`InferenceGateway`]. The gateway is stateless: each request carries the
//! full prompt (role instruction, context blocks, history window, message)
//! plus an optional tool schema, and a response may contain free text,
//! structured tool invocations, or both.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use cadence_core::domain::conversation::{Role, Turn};

/// What a request is for. Used for logging and by scripted gateways to pick
/// the matching canned reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InferencePurpose {
    Intent,
    Sentiment,
    Respond,
    Synthesize,
    Risk,
    TopicCheck,
    MaliciousIntent,
}

impl InferencePurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intent => "intent",
            Self::Sentiment => "sentiment",
            Self::Respond => "respond",
            Self::Synthesize => "synthesize",
            Self::Risk => "risk",
            Self::TopicCheck => "topic_check",
            Self::MaliciousIntent => "malicious_intent",
        }
    }
}

impl fmt::Display for InferencePurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseMode {
    FreeForm,
    /// The reply must be a single JSON object.
    Json,
    /// The reply must be exactly one of the given labels.
    Label(&'static [&'static str]),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl From<&Turn> for HistoryEntry {
    fn from(turn: &Turn) -> Self {
        Self { role: turn.role, content: turn.content.clone() }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the argument object.
    pub parameters: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: Value,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self { name: name.into(), arguments }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct InferenceRequest {
    pub purpose: InferencePurpose,
    pub role_instruction: String,
    pub context_blocks: Vec<String>,
    pub history: Vec<HistoryEntry>,
    pub user_message: String,
    pub tools: Vec<ToolSchema>,
    pub mode: ResponseMode,
    /// Overrides the gateway's configured temperature.
    pub temperature: Option<f32>,
}

impl InferenceRequest {
    pub fn new(
        purpose: InferencePurpose,
        role_instruction: impl Into<String>,
        user_message: impl Into<String>,
    ) -> Self {
        Self {
            purpose,
            role_instruction: role_instruction.into(),
            context_blocks: Vec::new(),
            history: Vec::new(),
            user_message: user_message.into(),
            tools: Vec::new(),
            mode: ResponseMode::FreeForm,
            temperature: None,
        }
    }

    pub fn with_context(mut self, block: impl Into<String>) -> Self {
        self.context_blocks.push(block.into());
        self
    }

    pub fn with_history(mut self, turns: &[Turn]) -> Self {
        self.history = turns.iter().map(HistoryEntry::from).collect();
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolSchema>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_mode(mut self, mode: ResponseMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct InferenceResponse {
    pub text: Option<String>,
    pub tool_invocations: Vec<ToolInvocation>,
}

impl InferenceResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), tool_invocations: Vec::new() }
    }

    pub fn tools(tool_invocations: Vec<ToolInvocation>) -> Self {
        Self { text: None, tool_invocations }
    }

    /// Free text with surrounding whitespace removed; `None` when blank.
    pub fn trimmed_text(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|text| !text.is_empty())
    }
}

#[async_trait]
pub trait InferenceGateway: Send + Sync {
    async fn infer(&self, request: InferenceRequest) -> Result<InferenceResponse>;
}

/// Pulls the outermost JSON object out of a model reply that may wrap it in
/// prose or a fenced code block.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start {
        Some(&text[start..=end])
    } else {
        None
    }
}

#[derive(Clone, Debug)]
pub enum ScriptedStep {
    Reply(InferenceResponse),
    Fail(String),
    /// Sleeps before replying; used to exercise stage timeouts.
    Stall(Duration, InferenceResponse),
}

/// Gateway fake that replays canned steps per purpose and records every
/// request it sees. A purpose with no remaining steps fails.
#[derive(Clone, Default)]
pub struct ScriptedGateway {
    steps: Arc<Mutex<HashMap<InferencePurpose, VecDeque<ScriptedStep>>>>,
    requests: Arc<Mutex<Vec<InferenceRequest>>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, purpose: InferencePurpose, step: ScriptedStep) -> &Self {
        let mut steps = match self.steps.lock() {
            Ok(steps) => steps,
            Err(poisoned) => poisoned.into_inner(),
        };
        steps.entry(purpose).or_default().push_back(step);
        self
    }

    pub fn reply(&self, purpose: InferencePurpose, text: impl Into<String>) -> &Self {
        self.push(purpose, ScriptedStep::Reply(InferenceResponse::text(text)))
    }

    pub fn fail(&self, purpose: InferencePurpose, message: impl Into<String>) -> &Self {
        self.push(purpose, ScriptedStep::Fail(message.into()))
    }

    pub fn requests(&self) -> Vec<InferenceRequest> {
        match self.requests.lock() {
            Ok(requests) => requests.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn requests_for(&self, purpose: InferencePurpose) -> Vec<InferenceRequest> {
        self.requests().into_iter().filter(|request| request.purpose == purpose).collect()
    }

    fn record(&self, request: InferenceRequest) {
        let mut requests = match self.requests.lock() {
            Ok(requests) => requests,
            Err(poisoned) => poisoned.into_inner(),
        };
        requests.push(request);
    }

    fn next_step(&self, purpose: InferencePurpose) -> Option<ScriptedStep> {
        let mut steps = match self.steps.lock() {
            Ok(steps) => steps,
            Err(poisoned) => poisoned.into_inner(),
        };
        steps.get_mut(&purpose).and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl InferenceGateway for ScriptedGateway {
    async fn infer(&self, request: InferenceRequest) -> Result<InferenceResponse> {
        let purpose = request.purpose;
        self.record(request);

        match self.next_step(purpose) {
            Some(ScriptedStep::Reply(response)) => Ok(response),
            Some(ScriptedStep::Fail(message)) => Err(anyhow!(message)),
            Some(ScriptedStep::Stall(delay, response)) => {
                tokio::time::sleep(delay).await;
                Ok(response)
            }
            None => Err(anyhow!("no scripted reply for `{purpose}`")),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        extract_json_object, InferenceGateway, InferencePurpose, InferenceRequest,
        InferenceResponse, ScriptedGateway, ScriptedStep, ToolInvocation,
    };

    #[test]
    fn json_object_is_extracted_from_fenced_reply() {
        let reply = "Here you go:\n```json\n{\"legal\": 3}\n```";
        assert_eq!(extract_json_object(reply), Some("{\"legal\": 3}"));
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("} backwards {"), None);
    }

    #[test]
    fn blank_text_is_treated_as_absent() {
        assert_eq!(InferenceResponse::text("  \n").trimmed_text(), None);
        assert_eq!(InferenceResponse::text(" hola ").trimmed_text(), Some("hola"));
        assert_eq!(InferenceResponse::tools(Vec::new()).trimmed_text(), None);
    }

    #[tokio::test]
    async fn scripted_gateway_replays_per_purpose_and_records_requests() {
        let gateway = ScriptedGateway::new();
        gateway.reply(InferencePurpose::Intent, "SALES");
        gateway.push(
            InferencePurpose::Respond,
            ScriptedStep::Reply(InferenceResponse::tools(vec![ToolInvocation::new(
                "get_pricing",
                json!({"service_type": "basic"}),
            )])),
        );

        let respond = gateway
            .infer(InferenceRequest::new(InferencePurpose::Respond, "role", "price?"))
            .await
            .expect("scripted respond");
        assert_eq!(respond.tool_invocations.len(), 1);

        let intent = gateway
            .infer(InferenceRequest::new(InferencePurpose::Intent, "role", "price?"))
            .await
            .expect("scripted intent");
        assert_eq!(intent.trimmed_text(), Some("SALES"));

        let exhausted =
            gateway.infer(InferenceRequest::new(InferencePurpose::Intent, "role", "again")).await;
        assert!(exhausted.is_err());
        assert_eq!(gateway.requests_for(InferencePurpose::Intent).len(), 2);
    }
}
