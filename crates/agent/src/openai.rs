//! OpenAI-compatible chat-completions gateway. Serves both the hosted OpenAI
//! API and local Ollama (`/v1` compatibility endpoint).

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use cadence_core::config::LlmConfig;
use cadence_core::domain::conversation::Role;

use crate::llm::{
    InferenceGateway, InferenceRequest, InferenceResponse, ResponseMode, ToolInvocation,
};

pub struct OpenAiCompatibleGateway {
    client: Client,
    endpoint: String,
    api_key: Option<SecretString>,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiCompatibleGateway {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build inference http client")?;

        Ok(Self {
            client,
            endpoint: config.endpoint().to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    pub fn chat_url(&self) -> String {
        chat_url(&self.endpoint)
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl InferenceGateway for OpenAiCompatibleGateway {
    async fn infer(&self, request: InferenceRequest) -> Result<InferenceResponse> {
        let purpose = request.purpose;
        let body = build_chat_request(&self.model, self.max_tokens, self.temperature, &request);

        let mut call = self.client.post(self.chat_url()).json(&body);
        if let Some(api_key) = &self.api_key {
            call = call.bearer_auth(api_key.expose_secret());
        }

        let response = call.send().await.context("inference request failed")?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("inference endpoint returned HTTP {status}: {error_text}"));
        }

        let response: ChatResponse =
            response.json().await.context("inference response was not valid json")?;
        let parsed = parse_chat_response(response)?;

        debug!(
            event_name = "agent.gateway.completed",
            purpose = %purpose,
            tool_invocations = parsed.tool_invocations.len(),
            has_text = parsed.trimmed_text().is_some(),
            "inference call completed"
        );
        Ok(parsed)
    }
}

pub fn chat_url(endpoint: &str) -> String {
    format!("{}/chat/completions", endpoint.trim_end_matches('/'))
}

#[derive(Debug, Serialize)]
pub struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl ChatMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self { role: role.to_string(), content: content.into() }
    }
}

pub fn build_chat_request(
    model: &str,
    max_tokens: u32,
    temperature: f32,
    request: &InferenceRequest,
) -> ChatRequest {
    let mut instruction = request.role_instruction.clone();
    if let ResponseMode::Label(labels) = request.mode {
        instruction.push_str(&format!(
            "\n\nAnswer with exactly one of the following words and nothing else: {}.",
            labels.join(", ")
        ));
    }

    let mut messages = vec![ChatMessage::new("system", instruction)];
    messages.extend(request.context_blocks.iter().map(|block| ChatMessage::new("system", block)));
    messages.extend(request.history.iter().map(|entry| {
        let role = match entry.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        ChatMessage::new(role, entry.content.clone())
    }));
    messages.push(ChatMessage::new("user", request.user_message.clone()));

    let tools: Vec<Value> = request
        .tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                }
            })
        })
        .collect();

    ChatRequest {
        model: model.to_string(),
        messages,
        max_tokens,
        temperature: request.temperature.unwrap_or(temperature),
        tool_choice: (!tools.is_empty()).then_some("auto"),
        tools,
        response_format: matches!(request.mode, ResponseMode::Json)
            .then(|| json!({"type": "json_object"})),
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ChatToolCall>,
}

#[derive(Debug, Deserialize)]
struct ChatToolCall {
    function: ChatFunctionCall,
}

#[derive(Debug, Deserialize)]
struct ChatFunctionCall {
    name: String,
    /// OpenAI sends a JSON-encoded string; Ollama sometimes sends the object.
    #[serde(default)]
    arguments: Value,
}

pub fn parse_chat_response(response: ChatResponse) -> Result<InferenceResponse> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("inference response contained no choices"))?;

    let tool_invocations = choice
        .message
        .tool_calls
        .into_iter()
        .map(|call| {
            ToolInvocation::new(call.function.name, decode_arguments(call.function.arguments))
        })
        .collect();

    Ok(InferenceResponse { text: choice.message.content, tool_invocations })
}

fn decode_arguments(raw: Value) -> Value {
    match raw {
        Value::String(encoded) if encoded.trim().is_empty() => json!({}),
        Value::String(encoded) => {
            serde_json::from_str(&encoded).unwrap_or_else(|_| json!({ "raw": encoded }))
        }
        Value::Null => json!({}),
        other => other,
    }
}
