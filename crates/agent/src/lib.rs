//! Agent runtime for the cadence workflow engine.
//!
//! Everything that talks to a language model lives here: intent
//! classification, sentiment and risk assessment, the sales and support
//! responders with their deterministic tools, and the [`workflow`] engine
//! that strings those stages together for one inbound message.
//!
//! # Flow
//!
//! 1. **Guardrails** (`guardrails`) reject empty, oversized, rate-limited,
//!    injected or off-topic messages before any model call.
//! 2. **Workflow** (`workflow`) runs classify, retrieve, sentiment, route,
//!    respond, priority and escalation for the thread, under its lock.
//! 3. **Checkpoint** is written once the last stage finishes.
//!
//! # Model boundary
//!
//! The model only chooses words and tools. Prices, ticket ids, routing and
//! escalation are computed deterministically from its structured output.

pub mod guardrails;
pub mod intent;
pub mod llm;
pub mod openai;
pub mod priority;
pub mod responder;
pub mod retrieval;
pub mod runtime;
pub mod sentiment;
pub mod tools;
pub mod workflow;

pub use guardrails::{GuardrailDecision, GuardrailPolicy};
pub use llm::{InferenceGateway, InferencePurpose, InferenceRequest, InferenceResponse};
pub use openai::OpenAiCompatibleGateway;
pub use responder::{HandoffTarget, Responder, ResponderOutcome};
pub use retrieval::{EmptyRetriever, KnowledgeRetriever, LexicalRetriever, Passage};
pub use runtime::{AgentRuntime, InboundTurn, TurnReply};
pub use workflow::{PipelineError, RunContext, WorkflowEngine, WorkflowSettings};
