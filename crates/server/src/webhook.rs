//! Messaging webhook: subscription handshake plus inbound processing.
//!
//! `POST /webhook` answers 200 as soon as the payload is accepted; each
//! message then runs on its own task through guardrails, the workflow
//! engine, delivery and bookkeeping.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use cadence_agent::runtime::{AgentRuntime, InboundTurn, TurnReply};
use cadence_agent::workflow::PipelineError;
use cadence_channel::{
    parse_inbound, send_reply, verify_signature, verify_subscription, InboundMessage,
    MessageSender, VerificationQuery, WebhookPayload,
};
use cadence_core::domain::conversation::{AgentKind, ThreadKey};
use cadence_core::errors::ApplicationError;
use cadence_db::repositories::{
    AnalyticsEvent, AnalyticsRepository, ConversationRepository, NewTicket, RepositoryError,
    TicketRepository, UserRepository,
};
use cadence_db::DbPool;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::{error, info, warn};

const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Long-term storage used after the engine has committed a turn.
#[derive(Clone)]
pub struct Repositories {
    pub users: Arc<dyn UserRepository>,
    pub conversations: Arc<dyn ConversationRepository>,
    pub tickets: Arc<dyn TicketRepository>,
    pub analytics: Arc<dyn AnalyticsRepository>,
}

impl Repositories {
    pub fn sql(pool: &DbPool) -> Self {
        use cadence_db::repositories::{
            SqlAnalyticsRepository, SqlConversationRepository, SqlTicketRepository,
            SqlUserRepository,
        };

        Self {
            users: Arc::new(SqlUserRepository::new(pool.clone())),
            conversations: Arc::new(SqlConversationRepository::new(pool.clone())),
            tickets: Arc::new(SqlTicketRepository::new(pool.clone())),
            analytics: Arc::new(SqlAnalyticsRepository::new(pool.clone())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessOutcome {
    Replied { agent: Option<AgentKind>, escalated: bool, ticket_id: Option<i64> },
    Rejected { reason_code: &'static str },
    Failed,
}

pub struct Ingestion {
    runtime: AgentRuntime,
    sender: Arc<dyn MessageSender>,
    repositories: Repositories,
}

impl Ingestion {
    pub fn new(
        runtime: AgentRuntime,
        sender: Arc<dyn MessageSender>,
        repositories: Repositories,
    ) -> Self {
        Self { runtime, sender, repositories }
    }

    pub async fn process(&self, message: InboundMessage) -> ProcessOutcome {
        let correlation_id = message.message_id.clone();
        if let Err(error) = self.sender.mark_as_read(&message.message_id).await {
            warn!(
                event_name = "server.ingest.read_receipt_failed",
                correlation_id = %correlation_id,
                error = %error,
                "read receipt not delivered"
            );
        }

        match self.run(&message).await {
            Ok(outcome) => outcome,
            Err(failure) => {
                let interface = failure.into_interface(correlation_id.clone());
                error!(
                    event_name = "server.ingest.failed",
                    correlation_id = %correlation_id,
                    error = %interface,
                    "inbound message could not be processed"
                );
                self.deliver(&message.from, interface.user_message(), &correlation_id).await;
                ProcessOutcome::Failed
            }
        }
    }

    async fn run(&self, message: &InboundMessage) -> Result<ProcessOutcome, ApplicationError> {
        let correlation_id = message.message_id.as_str();
        let thread_key = ThreadKey::for_channel_address(&message.from)?;
        let user = self
            .repositories
            .users
            .get_or_create(&message.from, message.profile_name.as_deref())
            .await
            .map_err(persistence)?;

        let inbound = InboundTurn {
            thread_key: thread_key.clone(),
            sender: message.from.clone(),
            text: message.text.clone(),
            user_id: Some(user.id),
            correlation_id: correlation_id.to_string(),
        };
        let reply = match self.runtime.handle_inbound(&inbound).await {
            Ok(reply) => reply,
            Err(PipelineError::Validation { reason_code, user_message }) => {
                self.deliver(&message.from, &user_message, correlation_id).await;
                self.log(
                    AnalyticsEvent::new("message_rejected", json!({ "reason_code": reason_code }))
                        .for_thread(thread_key)
                        .with_correlation(correlation_id),
                )
                .await;
                return Ok(ProcessOutcome::Rejected { reason_code });
            }
            Err(other) => return Err(other.into()),
        };

        self.deliver(&message.from, &reply.reply, correlation_id).await;
        let ticket_id = self.record(user.id, &reply, correlation_id).await;

        let escalated = reply.ticket.is_some();
        self.log(
            AnalyticsEvent::new(
                "message_processed",
                json!({
                    "agent": reply.agent.map(|agent| agent.as_str()),
                    "priority_score": reply.state.priority_score,
                    "escalated": escalated,
                    "version": reply.state.version,
                }),
            )
            .for_thread(thread_key)
            .with_correlation(correlation_id),
        )
        .await;

        info!(
            event_name = "server.ingest.completed",
            correlation_id,
            agent = reply.agent.map(|agent| agent.as_str()).unwrap_or("none"),
            escalated,
            "inbound message processed"
        );
        Ok(ProcessOutcome::Replied { agent: reply.agent, escalated, ticket_id })
    }

    /// Conversation log plus a ticket for escalated turns. The reply has
    /// already been delivered, so failures here are logged only.
    async fn record(&self, user_id: i64, reply: &TurnReply, correlation_id: &str) -> Option<i64> {
        let conversation_id =
            match self.repositories.conversations.record(user_id, &reply.state).await {
                Ok(id) => id,
                Err(error) => {
                    error!(
                        event_name = "server.ingest.conversation_log_failed",
                        correlation_id,
                        error = %error,
                        "conversation snapshot not stored"
                    );
                    return None;
                }
            };

        let signal = reply.ticket.as_ref()?;
        let ticket = NewTicket {
            conversation_id,
            thread_key: signal.thread_key.clone(),
            priority_score: signal.priority_score,
            reason: signal.reason.clone(),
        };
        match self.repositories.tickets.create(ticket).await {
            Ok(record) => {
                warn!(
                    event_name = "server.ingest.ticket_created",
                    correlation_id,
                    ticket_id = record.id,
                    severity = record.severity.as_str(),
                    "escalation ticket opened"
                );
                Some(record.id)
            }
            Err(error) => {
                error!(
                    event_name = "server.ingest.ticket_failed",
                    correlation_id,
                    error = %error,
                    "escalation ticket not stored"
                );
                None
            }
        }
    }

    async fn deliver(&self, to: &str, text: &str, correlation_id: &str) {
        if let Err(error) = send_reply(self.sender.as_ref(), to, text).await {
            error!(
                event_name = "server.ingest.delivery_failed",
                correlation_id,
                error = %error,
                "reply could not be delivered"
            );
        }
    }

    async fn log(&self, event: AnalyticsEvent) {
        if let Err(error) = self.repositories.analytics.log_event(event).await {
            warn!(
                event_name = "server.ingest.analytics_failed",
                error = %error,
                "analytics event not stored"
            );
        }
    }
}

fn persistence(error: RepositoryError) -> ApplicationError {
    ApplicationError::Persistence(error.to_string())
}

#[derive(Clone)]
pub struct WebhookState {
    ingestion: Arc<Ingestion>,
    verify_token: SecretString,
    app_secret: Option<SecretString>,
}

impl WebhookState {
    pub fn new(
        ingestion: Arc<Ingestion>,
        verify_token: SecretString,
        app_secret: Option<SecretString>,
    ) -> Self {
        Self { ingestion, verify_token, app_secret }
    }
}

pub fn router(state: WebhookState) -> Router {
    Router::new().route("/webhook", get(verify).post(receive)).with_state(state)
}

async fn verify(
    State(state): State<WebhookState>,
    Query(query): Query<VerificationQuery>,
) -> Response {
    match verify_subscription(&query, &state.verify_token) {
        Ok(challenge) => {
            info!(event_name = "server.webhook.verified", "webhook subscription verified");
            (StatusCode::OK, challenge).into_response()
        }
        Err(_) => StatusCode::FORBIDDEN.into_response(),
    }
}

async fn receive(State(state): State<WebhookState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    if let Some(secret) = &state.app_secret {
        let header = headers.get(SIGNATURE_HEADER).and_then(|value| value.to_str().ok());
        if let Err(error) = verify_signature(secret.expose_secret().as_bytes(), &body, header) {
            warn!(event_name = "server.webhook.signature_rejected", error = %error, "bad signature");
            return StatusCode::UNAUTHORIZED;
        }
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(error) => {
            warn!(
                event_name = "server.webhook.malformed",
                error = %error,
                "webhook payload ignored"
            );
            return StatusCode::OK;
        }
    };

    for message in parse_inbound(&payload) {
        info!(
            event_name = "server.webhook.accepted",
            correlation_id = %message.message_id,
            kind = %message.kind,
            "inbound message queued"
        );
        let ingestion = state.ingestion.clone();
        tokio::spawn(async move {
            ingestion.process(message).await;
        });
    }
    StatusCode::OK
}
