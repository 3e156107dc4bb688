use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use cadence_core::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink, NoopAuditSink};
use cadence_core::config::WorkflowConfig;
use cadence_core::domain::conversation::{
    meta, AgentKind, ConversationState, Intent, ThreadKey, Turn,
};
use cadence_core::domain::priority::{PriorityAssessment, TicketSignal};
use cadence_core::domain::sentiment::SentimentAnalysis;
use cadence_core::errors::{ApplicationError, DomainError};
use cadence_core::routing;
use cadence_core::scoring::PriorityThresholds;
use cadence_db::{CheckpointStore, RepositoryError};

use super::locks::ThreadLocks;
use crate::intent::IntentClassifier;
use crate::llm::InferenceGateway;
use crate::priority::PriorityScorer;
use crate::responder::{Responder, SalesResponder, SupportResponder};
use crate::retrieval::{render_context, KnowledgeRetriever};
use crate::sentiment::SentimentAssessor;

const FALLBACK_ESCALATION_REASON: &str = "high priority score";

#[derive(Clone, Debug, PartialEq)]
pub struct WorkflowSettings {
    pub stage_timeout: Duration,
    pub checkpoint_timeout: Duration,
    pub retrieval_top_k: usize,
    pub history_window: usize,
    pub support_turn_limit: usize,
    pub thresholds: PriorityThresholds,
    pub reroute_on_handoff: bool,
}

impl From<&WorkflowConfig> for WorkflowSettings {
    fn from(config: &WorkflowConfig) -> Self {
        Self {
            stage_timeout: Duration::from_secs(config.stage_timeout_secs),
            checkpoint_timeout: Duration::from_secs(config.checkpoint_timeout_secs),
            retrieval_top_k: config.retrieval_top_k,
            history_window: config.history_window,
            support_turn_limit: config.support_turn_limit,
            thresholds: PriorityThresholds {
                high: config.high_threshold,
                critical: config.critical_threshold,
            },
            reroute_on_handoff: config.reroute_on_handoff,
        }
    }
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            stage_timeout: Duration::from_secs(20),
            checkpoint_timeout: Duration::from_secs(5),
            retrieval_top_k: 3,
            history_window: 5,
            support_turn_limit: 10,
            thresholds: PriorityThresholds::default(),
            reroute_on_handoff: true,
        }
    }
}

/// Engine-level failures. Stage failures never surface here; they are
/// replaced by their documented defaults inside the run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("checkpoint store unavailable: {0}")]
    Persistence(String),
    #[error(
        "stale checkpoint for `{thread_key}`: stored version {stored_version}, attempted {attempted_version}"
    )]
    StaleCheckpoint { thread_key: String, stored_version: u64, attempted_version: u64 },
    #[error("inbound message rejected ({reason_code})")]
    Validation { reason_code: &'static str, user_message: String },
    #[error(transparent)]
    Invariant(#[from] DomainError),
}

impl From<PipelineError> for ApplicationError {
    fn from(value: PipelineError) -> Self {
        match value {
            PipelineError::Validation { reason_code, .. } => {
                Self::Validation { reason_code: reason_code.to_string() }
            }
            PipelineError::Invariant(error) => Self::Domain(error),
            other @ (PipelineError::Persistence(_) | PipelineError::StaleCheckpoint { .. }) => {
                Self::Persistence(other.to_string())
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    ClassifyIntent,
    RetrieveContext,
    AnalyzeSentiment,
    Route,
    ExecuteResponder,
    ScorePriority,
    EscalationGate,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClassifyIntent => "classify_intent",
            Self::RetrieveContext => "retrieve_context",
            Self::AnalyzeSentiment => "analyze_sentiment",
            Self::Route => "route",
            Self::ExecuteResponder => "execute_responder",
            Self::ScorePriority => "score_priority",
            Self::EscalationGate => "escalation_gate",
        }
    }

    fn category(&self) -> AuditCategory {
        match self {
            Self::ClassifyIntent => AuditCategory::Classification,
            Self::RetrieveContext => AuditCategory::Retrieval,
            Self::AnalyzeSentiment => AuditCategory::Sentiment,
            Self::Route => AuditCategory::Routing,
            Self::ExecuteResponder => AuditCategory::Responder,
            Self::ScorePriority => AuditCategory::Priority,
            Self::EscalationGate => AuditCategory::Escalation,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunContext {
    pub correlation_id: String,
    pub user_id: Option<i64>,
}

impl RunContext {
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self { correlation_id: correlation_id.into(), user_id: None }
    }

    pub fn with_user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

/// Drives one inbound message through the fixed stage sequence and
/// checkpoints the result.
///
/// Stage order: classify intent, retrieve context, analyse sentiment, route,
/// execute exactly one responder, score priority, escalation gate. Runs for
/// the same thread are serialised; the checkpoint is written once, after the
/// last stage, so a cancelled run leaves the previous checkpoint in place.
pub struct WorkflowEngine {
    intent: IntentClassifier,
    retriever: Arc<dyn KnowledgeRetriever>,
    sentiment: SentimentAssessor,
    sales: Arc<dyn Responder>,
    support: Arc<dyn Responder>,
    scorer: PriorityScorer,
    checkpoints: Arc<dyn CheckpointStore>,
    audit: Arc<dyn AuditSink>,
    locks: ThreadLocks,
    settings: WorkflowSettings,
}

impl WorkflowEngine {
    pub fn new(
        gateway: Arc<dyn InferenceGateway>,
        retriever: Arc<dyn KnowledgeRetriever>,
        checkpoints: Arc<dyn CheckpointStore>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            intent: IntentClassifier::new(gateway.clone()),
            retriever,
            sentiment: SentimentAssessor::new(gateway.clone()),
            sales: Arc::new(SalesResponder::new(gateway.clone(), settings.history_window)),
            support: Arc::new(SupportResponder::new(
                gateway.clone(),
                settings.history_window,
                settings.support_turn_limit,
            )),
            scorer: PriorityScorer::new(gateway, settings.thresholds)
                .with_risk_timeout(settings.stage_timeout / 2),
            checkpoints,
            audit: Arc::new(NoopAuditSink),
            locks: ThreadLocks::new(),
            settings,
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_responders(
        mut self,
        sales: Arc<dyn Responder>,
        support: Arc<dyn Responder>,
    ) -> Self {
        self.sales = sales;
        self.support = support;
        self
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    pub async fn run(
        &self,
        thread_key: &ThreadKey,
        inbound_text: &str,
        context: &RunContext,
    ) -> Result<ConversationState, PipelineError> {
        let _guard = self.locks.acquire(thread_key).await;
        let audit =
            AuditContext::new(thread_key.clone(), context.correlation_id.clone(), "workflow_engine");

        let loaded = self.load(thread_key).await?;
        let committed_version = loaded.as_ref().map(|state| state.version).unwrap_or(0);
        let mut state = loaded
            .unwrap_or_else(|| ConversationState::new(thread_key.clone(), context.user_id));
        if state.user_id.is_none() {
            state.user_id = context.user_id;
        }
        let committed = state.messages.clone();

        state.reset_turn_scratch();
        state.messages.push(Turn::user(inbound_text));

        self.classify_intent(&mut state, &audit).await;
        self.retrieve_context(&mut state, &audit).await;
        self.analyze_sentiment(&mut state, &audit).await;
        let agent = self.route(&mut state);
        self.execute_responder(agent, &mut state, &audit).await;
        let assessment = self.score_priority(&mut state, &audit).await;
        self.escalation_gate(&mut state, &assessment, &audit);

        if !committed.is_prefix_of(&state.messages) || committed.len() >= state.messages.len() {
            return Err(DomainError::NonMonotonicTranscript {
                thread_key: thread_key.to_string(),
            }
            .into());
        }

        state.version = committed_version + 1;
        self.commit(&state).await?;

        info!(
            event_name = "workflow.run.completed",
            thread_key = %thread_key,
            correlation_id = %context.correlation_id,
            agent = %agent,
            version = state.version,
            priority_score = assessment.priority_score,
            escalated = state.should_escalate,
            "workflow run committed"
        );
        Ok(state)
    }

    async fn classify_intent(&self, state: &mut ConversationState, audit: &AuditContext) {
        let message = state.latest_user_message().to_string();
        let intent = match self.bounded(self.intent.classify(&message)).await {
            Ok(intent) => intent,
            Err(error) => {
                self.degrade(state, Stage::ClassifyIntent, &error, audit);
                Intent::Support
            }
        };
        debug!(event_name = "workflow.intent.classified", intent = intent.as_label());
        state.set_intent(intent);
    }

    async fn retrieve_context(&self, state: &mut ConversationState, audit: &AuditContext) {
        let message = state.latest_user_message().to_string();
        let top_k = self.settings.retrieval_top_k;
        match self.bounded(self.retriever.retrieve(&message, top_k)).await {
            Ok(passages) => {
                debug!(event_name = "workflow.retrieval.completed", passages = passages.len());
                state.rag_context = render_context(&passages);
            }
            Err(error) => {
                self.degrade(state, Stage::RetrieveContext, &error, audit);
                state.rag_context.clear();
            }
        }
    }

    async fn analyze_sentiment(&self, state: &mut ConversationState, audit: &AuditContext) {
        let message = state.latest_user_message().to_string();
        let history = prior_turns(state);
        let analysis = match self.bounded(self.sentiment.assess(&message, &history)).await {
            Ok(analysis) => analysis,
            Err(error) => {
                self.degrade(state, Stage::AnalyzeSentiment, &error, audit);
                SentimentAnalysis::default()
            }
        };
        state.sentiment_analysis = Some(analysis);
    }

    fn route(&self, state: &mut ConversationState) -> AgentKind {
        let agent = routing::route(state);
        debug!(
            event_name = "workflow.routing.decided",
            agent = %agent,
            sticky = state.current_agent == Some(agent) && !state.force_reroute,
            forced = state.force_reroute,
        );
        state.current_agent = Some(agent);
        state.force_reroute = false;
        agent
    }

    async fn execute_responder(
        &self,
        agent: AgentKind,
        state: &mut ConversationState,
        audit: &AuditContext,
    ) {
        let responder = match agent {
            AgentKind::Sales => &self.sales,
            AgentKind::Support => &self.support,
        };
        let message = state.latest_user_message().to_string();
        let history = prior_turns(state);
        let rag_context = state.rag_context.clone();

        let processing = responder.process(&message, &history, &rag_context);
        let outcome = match tokio::time::timeout(self.settings.stage_timeout, processing).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let error = anyhow!("timed out after {:?}", self.settings.stage_timeout);
                self.degrade(state, Stage::ExecuteResponder, &error, audit);
                responder.failure_outcome()
            }
        };

        state.messages.push(Turn::assistant(outcome.response_text.clone(), agent));
        state.metadata.insert(
            meta::TOOL_CALLS.to_string(),
            serde_json::to_value(&outcome.tool_calls).unwrap_or_default(),
        );
        state.metadata.insert(meta::NEEDS_HANDOFF.to_string(), Value::Bool(outcome.needs_handoff));
        if let Some(target) = outcome.handoff_to {
            state.metadata.insert(meta::HANDOFF_TO.to_string(), Value::from(target.as_str()));
        }
        if outcome.needs_handoff && self.settings.reroute_on_handoff {
            state.force_reroute = true;
        }
    }

    async fn score_priority(
        &self,
        state: &mut ConversationState,
        audit: &AuditContext,
    ) -> PriorityAssessment {
        let message = state.latest_user_message().to_string();
        let analysis = state.sentiment_analysis.clone().unwrap_or_default();
        let assessment = match self.bounded(self.scorer.score(&message, &analysis)).await {
            Ok(scored) => {
                if let Some(error) = &scored.risk_error {
                    self.degrade(state, Stage::ScorePriority, error, audit);
                }
                scored.assessment
            }
            Err(error) => {
                self.degrade(state, Stage::ScorePriority, &error, audit);
                PriorityAssessment::neutral()
            }
        };

        state.priority_score = Some(assessment.priority_score);
        state.should_escalate = assessment.should_escalate;
        state.metadata.insert(
            meta::PRIORITY_DETAILS.to_string(),
            serde_json::to_value(&assessment).unwrap_or_default(),
        );
        assessment
    }

    fn escalation_gate(
        &self,
        state: &mut ConversationState,
        assessment: &PriorityAssessment,
        audit: &AuditContext,
    ) {
        if !state.should_escalate {
            return;
        }

        let reason = if assessment.reason.trim().is_empty() {
            FALLBACK_ESCALATION_REASON.to_string()
        } else {
            assessment.reason.clone()
        };
        let note = format!(
            "escalated for human follow-up, priority {:.2}, reason: {reason}",
            assessment.priority_score
        );
        if !state.messages.annotate_tail(note) {
            warn!(
                event_name = "workflow.escalation.unannotated",
                thread_key = %state.thread_key,
                "tail turn could not carry the escalation note"
            );
        }

        let signal = TicketSignal {
            thread_key: state.thread_key.clone(),
            priority_score: assessment.priority_score,
            reason: reason.clone(),
        };
        state
            .metadata
            .insert(meta::ESCALATION.to_string(), serde_json::to_value(&signal).unwrap_or_default());

        warn!(
            event_name = "workflow.escalation.raised",
            thread_key = %state.thread_key,
            correlation_id = %audit.correlation_id,
            priority_score = assessment.priority_score,
            reason = %reason,
            "conversation escalated"
        );
        self.audit.emit(
            audit
                .event("workflow.escalated", Stage::EscalationGate.category(), AuditOutcome::Success)
                .with_metadata("priority_score", format!("{:.2}", assessment.priority_score))
                .with_metadata("reason", reason),
        );
    }

    async fn bounded<T>(
        &self,
        future: impl Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        match tokio::time::timeout(self.settings.stage_timeout, future).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!("timed out after {:?}", self.settings.stage_timeout)),
        }
    }

    fn degrade(
        &self,
        state: &mut ConversationState,
        stage: Stage,
        error: &anyhow::Error,
        audit: &AuditContext,
    ) {
        warn!(
            event_name = "workflow.stage.degraded",
            thread_key = %state.thread_key,
            correlation_id = %audit.correlation_id,
            stage = stage.as_str(),
            error = %error,
            "stage failed, continuing with its default"
        );
        state.record_degraded_stage(stage.as_str());
        self.audit.emit(
            audit
                .event("workflow.stage_degraded", stage.category(), AuditOutcome::Degraded)
                .with_metadata("stage", stage.as_str())
                .with_metadata("error", error.to_string()),
        );
    }

    async fn load(&self, thread_key: &ThreadKey) -> Result<Option<ConversationState>, PipelineError> {
        let read = tokio::time::timeout(self.settings.checkpoint_timeout, self.checkpoints.get(thread_key));
        match read.await {
            Ok(Ok(state)) => Ok(state),
            Ok(Err(error)) => Err(self.persistence_failure(thread_key, error.to_string())),
            Err(_) => Err(self.persistence_failure(
                thread_key,
                format!("checkpoint read timed out after {:?}", self.settings.checkpoint_timeout),
            )),
        }
    }

    async fn commit(&self, state: &ConversationState) -> Result<(), PipelineError> {
        let write = tokio::time::timeout(self.settings.checkpoint_timeout, self.checkpoints.put(state));
        match write.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(RepositoryError::StaleCheckpoint {
                thread_key,
                stored_version,
                attempted_version,
            })) => {
                error!(
                    event_name = "workflow.checkpoint.stale",
                    thread_key = %thread_key,
                    stored_version,
                    attempted_version,
                    "checkpoint rejected as stale"
                );
                Err(PipelineError::StaleCheckpoint { thread_key, stored_version, attempted_version })
            }
            Ok(Err(error)) => Err(self.persistence_failure(&state.thread_key, error.to_string())),
            Err(_) => Err(self.persistence_failure(
                &state.thread_key,
                format!("checkpoint write timed out after {:?}", self.settings.checkpoint_timeout),
            )),
        }
    }

    fn persistence_failure(&self, thread_key: &ThreadKey, detail: String) -> PipelineError {
        error!(
            event_name = "workflow.checkpoint.failed",
            thread_key = %thread_key,
            error = %detail,
            "checkpoint store unavailable"
        );
        PipelineError::Persistence(detail)
    }
}

/// Turns committed before the message being processed.
fn prior_turns(state: &ConversationState) -> Vec<Turn> {
    let turns = state.messages.turns();
    turns[..turns.len().saturating_sub(1)].to_vec()
}
