use std::sync::Arc;

use async_trait::async_trait;

use cadence_core::domain::conversation::{AgentKind, Turn};

use super::{HandoffTarget, Responder, ResponderBase, ResponderOutcome, ResponderProfile};
use crate::llm::InferenceGateway;
use crate::tools::ToolRegistry;

const ROLE_INSTRUCTION: &str = "You are a technical support agent for a digital music \
distributor. Help artists with blocked or delayed releases, metadata corrections, royalty \
questions and platform problems.

Tools: check_release_status reports where a release is live, query_royalties reports earnings \
for a period, create_support_ticket opens a ticket for follow-up, update_metadata requests a \
metadata change and escalate_to_human transfers the conversation to a person.

Be empathetic and precise, confirm what you checked, and give concrete next steps. Escalate to \
a human when the issue involves legal claims, account security, payments that went missing, \
or when the customer asks for a person. Use the knowledge base context when it is provided. \
Reply in the customer's language.";

/// Phrases in a support reply that point at a commercial conversation.
const SALES_KEYWORDS: &[&str] =
    &["price", "cost", "plan", "subscribe", "quote", "precio", "costo", "contratar", "cotización"];

pub fn profile(turn_limit: usize) -> ResponderProfile {
    ResponderProfile {
        kind: AgentKind::Support,
        role_instruction: ROLE_INSTRUCTION,
        handoff_keywords: SALES_KEYWORDS,
        turn_limit: Some(turn_limit),
        empty_reply_fallback: "I understand your question. Could you give me a few more \
details so I can help?",
        synthesis_fallback: "I've checked the information on your account. What else can I do \
for you?",
        failure_reply: "Sorry, I ran into a problem. Let me transfer you to a specialist.",
        failure_handoff: Some(HandoffTarget::Human),
    }
}

pub struct SupportResponder {
    base: ResponderBase,
}

impl SupportResponder {
    pub fn new(
        gateway: Arc<dyn InferenceGateway>,
        history_window: usize,
        turn_limit: usize,
    ) -> Self {
        Self {
            base: ResponderBase::new(
                profile(turn_limit),
                gateway,
                ToolRegistry::support(),
                history_window,
            ),
        }
    }

    pub fn profile(&self) -> &ResponderProfile {
        self.base.profile()
    }
}

#[async_trait]
impl Responder for SupportResponder {
    fn kind(&self) -> AgentKind {
        AgentKind::Support
    }

    async fn process(
        &self,
        message: &str,
        history: &[Turn],
        rag_context: &str,
    ) -> ResponderOutcome {
        self.base.process(message, history, rag_context).await
    }

    fn failure_outcome(&self) -> ResponderOutcome {
        self.base.failure_outcome()
    }
}
