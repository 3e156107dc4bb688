use std::sync::Arc;

use async_trait::async_trait;

use cadence_core::domain::conversation::{AgentKind, Turn};

use super::{Responder, ResponderBase, ResponderOutcome, ResponderProfile};
use crate::llm::InferenceGateway;
use crate::tools::ToolRegistry;

const ROLE_INSTRUCTION: &str = "You are an expert sales agent for a digital music distributor. \
Explain distribution to streaming platforms (Spotify, Apple Music and others), present plan \
prices clearly, generate personalised quotes, guide new artists through onboarding and suggest \
next steps.

Tools: get_pricing looks up plan prices, generate_quote prices a plan for a release volume and \
escalate_to_human transfers the conversation to a person.

Be friendly and professional, keep replies to three or four sentences and always answer in \
text, even after using tools. Escalate to a human for special contract negotiations, \
enterprise or high-value customers, significant discount requests, technical questions you \
cannot answer, or when the customer asks for a person. Use the knowledge base context when it \
is provided. Reply in the customer's language.";

/// Phrases in a sales reply that point at a support problem.
const SUPPORT_KEYWORDS: &[&str] = &[
    "technical issue",
    "technical problem",
    "not working",
    "error",
    "release blocked",
    "royalties",
    "metadata",
    "problema técnico",
    "no funciona",
    "lanzamiento bloqueado",
    "regalías",
];

pub fn profile() -> ResponderProfile {
    ResponderProfile {
        kind: AgentKind::Sales,
        role_instruction: ROLE_INSTRUCTION,
        handoff_keywords: SUPPORT_KEYWORDS,
        turn_limit: None,
        empty_reply_fallback: "Hi! I'm here to help you with our music distribution services. \
What can I do for you?",
        synthesis_fallback: "I've looked up the information you asked for. How else can I help?",
        failure_reply: "Sorry, I had a problem handling your request. Could you rephrase it?",
        failure_handoff: None,
    }
}

pub struct SalesResponder {
    base: ResponderBase,
}

impl SalesResponder {
    pub fn new(gateway: Arc<dyn InferenceGateway>, history_window: usize) -> Self {
        Self { base: ResponderBase::new(profile(), gateway, ToolRegistry::sales(), history_window) }
    }

    pub fn profile(&self) -> &ResponderProfile {
        self.base.profile()
    }
}

#[async_trait]
impl Responder for SalesResponder {
    fn kind(&self) -> AgentKind {
        AgentKind::Sales
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
