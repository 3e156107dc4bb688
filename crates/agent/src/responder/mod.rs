//! Responder protocol shared by the sales and support agents.
//!
//! One call to [`Responder::process`] produces the reply for a turn: build
//! the prompt, let the gateway pick tools, run them deterministically,
//! synthesise text when the model only returned tool calls, then decide
//! whether the conversation should leave this agent. The reply text is never
//! empty and protocol failures never escape; each variant has its own
//! fallback reply and failure handoff policy.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use cadence_core::domain::conversation::{AgentKind, Turn};

use crate::llm::{InferenceGateway, InferencePurpose, InferenceRequest};
use crate::tools::{ToolInvocationResult, ToolRegistry};

pub mod sales;
pub mod support;

pub use sales::SalesResponder;
pub use support::SupportResponder;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffTarget {
    SalesAgent,
    SupportAgent,
    Human,
}

impl HandoffTarget {
    pub fn agent(kind: AgentKind) -> Self {
        match kind {
            AgentKind::Sales => Self::SalesAgent,
            AgentKind::Support => Self::SupportAgent,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SalesAgent => "sales_agent",
            Self::SupportAgent => "support_agent",
            Self::Human => "human",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponderOutcome {
    pub response_text: String,
    pub needs_handoff: bool,
    pub handoff_to: Option<HandoffTarget>,
    pub tool_calls: Vec<ToolInvocationResult>,
}

#[async_trait]
pub trait Responder: Send + Sync {
    fn kind(&self) -> AgentKind;

    /// `history` holds the turns before `message`, oldest first.
    async fn process(&self, message: &str, history: &[Turn], rag_context: &str)
        -> ResponderOutcome;

    /// Reply used when the protocol fails or cannot finish in time.
    fn failure_outcome(&self) -> ResponderOutcome;
}

/// Fixed wording and handoff rules that distinguish one variant from another.
#[derive(Clone, Debug)]
pub struct ResponderProfile {
    pub kind: AgentKind,
    pub role_instruction: &'static str,
    /// Phrases in a reply that mean the conversation belongs to the other agent.
    /// Matched as whole words, ignoring case.
    pub handoff_keywords: &'static [&'static str],
    /// Conversations whose turn count, the current message included, exceeds
    /// this hand off; `None` disables the check.
    pub turn_limit: Option<usize>,
    pub empty_reply_fallback: &'static str,
    pub synthesis_fallback: &'static str,
    pub failure_reply: &'static str,
    pub failure_handoff: Option<HandoffTarget>,
}

const SYNTHESIS_INSTRUCTION: &str = "Using only the tool results below, write a friendly and \
professional reply for the customer that explains the information clearly in at most three or \
four sentences. Reply in the customer's language.";
const SYNTHESIS_REQUEST: &str = "Please summarise this information clearly for the customer.";

/// The protocol itself; variants wrap it with their profile and tool set.
pub struct ResponderBase {
    profile: ResponderProfile,
    gateway: Arc<dyn InferenceGateway>,
    tools: ToolRegistry,
    history_window: usize,
    handoff_matcher: RegexSet,
}

impl ResponderBase {
    pub fn new(
        profile: ResponderProfile,
        gateway: Arc<dyn InferenceGateway>,
        tools: ToolRegistry,
        history_window: usize,
    ) -> Self {
        let handoff_matcher = keyword_matcher(profile.kind, profile.handoff_keywords);
        Self { profile, gateway, tools, history_window, handoff_matcher }
    }

    pub fn profile(&self) -> &ResponderProfile {
        &self.profile
    }

    pub async fn process(
        &self,
        message: &str,
        history: &[Turn],
        rag_context: &str,
    ) -> ResponderOutcome {
        match self.run_protocol(message, history, rag_context).await {
            Ok(outcome) => {
                info!(
                    event_name = "agent.responder.processed",
                    agent = %self.profile.kind,
                    needs_handoff = outcome.needs_handoff,
                    tools_used = outcome.tool_calls.len(),
                    response_length = outcome.response_text.len(),
                    "responder produced reply"
                );
                outcome
            }
            Err(error) => {
                warn!(
                    event_name = "agent.responder.failed",
                    agent = %self.profile.kind,
                    error = %error,
                    "responder protocol failed, using fallback reply"
                );
                self.failure_outcome()
            }
        }
    }

    pub fn failure_outcome(&self) -> ResponderOutcome {
        ResponderOutcome {
            response_text: self.profile.failure_reply.to_string(),
            needs_handoff: self.profile.failure_handoff.is_some(),
            handoff_to: self.profile.failure_handoff,
            tool_calls: Vec::new(),
        }
    }

    fn base_request(
        &self,
        purpose: InferencePurpose,
        message: &str,
        history: &[Turn],
        rag_context: &str,
    ) -> InferenceRequest {
        let window_start = history.len().saturating_sub(self.history_window);
        let mut request =
            InferenceRequest::new(purpose, self.profile.role_instruction, message)
                .with_history(&history[window_start..]);
        if !rag_context.trim().is_empty() {
            request = request.with_context(format!("KNOWLEDGE BASE CONTEXT:\n{rag_context}"));
        }
        request
    }

    async fn run_protocol(
        &self,
        message: &str,
        history: &[Turn],
        rag_context: &str,
    ) -> Result<ResponderOutcome> {
        let request = self
            .base_request(InferencePurpose::Respond, message, history, rag_context)
            .with_tools(self.tools.schemas());
        let response = self.gateway.infer(request).await?;

        let mut tool_calls = Vec::with_capacity(response.tool_invocations.len());
        for invocation in &response.tool_invocations {
            let executed = self.tools.execute(&invocation.name, invocation.arguments.clone()).await;
            tool_calls.push(executed);
        }

        let response_text = match response.trimmed_text() {
            Some(text) => text.to_string(),
            None if !tool_calls.is_empty() => {
                self.synthesize(message, history, rag_context, &tool_calls).await
            }
            None => self.profile.empty_reply_fallback.to_string(),
        };

        let handoff_to = self.detect_handoff(&response_text, &tool_calls, history.len());
        Ok(ResponderOutcome {
            response_text,
            needs_handoff: handoff_to.is_some(),
            handoff_to,
            tool_calls,
        })
    }

    /// Second gateway call turning tool results into prose.
    async fn synthesize(
        &self,
        message: &str,
        history: &[Turn],
        rag_context: &str,
        tool_calls: &[ToolInvocationResult],
    ) -> String {
        let summary = tool_calls
            .iter()
            .map(|call| format!("- {}: {}", call.tool_name, call.result))
            .collect::<Vec<_>>()
            .join("\n");

        let mut request = self.base_request(
            InferencePurpose::Synthesize,
            SYNTHESIS_REQUEST,
            history,
            rag_context,
        );
        request.context_blocks.push(format!(
            "The customer wrote: {message}\n\n{SYNTHESIS_INSTRUCTION}\n\n{summary}"
        ));

        match self.gateway.infer(request).await {
            Ok(response) => match response.trimmed_text() {
                Some(text) => text.to_string(),
                None => self.profile.synthesis_fallback.to_string(),
            },
            Err(error) => {
                warn!(
                    event_name = "agent.responder.synthesis_failed",
                    agent = %self.profile.kind,
                    error = %error,
                    "tool result synthesis failed, using fallback reply"
                );
                self.profile.synthesis_fallback.to_string()
            }
        }
    }

    fn detect_handoff(
        &self,
        response_text: &str,
        tool_calls: &[ToolInvocationResult],
        history_len: usize,
    ) -> Option<HandoffTarget> {
        if tool_calls.iter().any(ToolInvocationResult::is_escalation) {
            return Some(HandoffTarget::Human);
        }

        if let Some(limit) = self.profile.turn_limit {
            if history_len + 1 > limit {
                return Some(HandoffTarget::Human);
            }
        }

        self.handoff_matcher
            .is_match(response_text)
            .then(|| HandoffTarget::agent(self.profile.kind.other()))
    }
}

fn keyword_matcher(kind: AgentKind, keywords: &[&str]) -> RegexSet {
    let patterns = keywords.iter().map(|keyword| format!(r"(?i)\b{}\b", regex::escape(keyword)));
    match RegexSet::new(patterns) {
        Ok(matcher) => matcher,
        Err(error) => {
            warn!(
                event_name = "agent.responder.keywords_invalid",
                agent = %kind,
                error = %error,
                "handoff keywords did not compile, keyword handoff disabled"
            );
            RegexSet::empty()
        }
    }
}
