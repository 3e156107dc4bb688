use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use cadence_core::domain::conversation::{AgentKind, ConversationState, ThreadKey, Transcript};
use cadence_core::domain::priority::TicketSeverity;

pub mod analytics;
pub mod checkpoint;
pub mod conversation;
pub mod memory;
pub mod ticket;
pub mod user;

pub use analytics::SqlAnalyticsRepository;
pub use checkpoint::SqlCheckpointStore;
pub use conversation::SqlConversationRepository;
pub use memory::{
    InMemoryAnalyticsRepository, InMemoryCheckpointStore, InMemoryConversationRepository,
    InMemoryTicketRepository, InMemoryUserRepository,
};
pub use ticket::SqlTicketRepository;
pub use user::SqlUserRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error(
        "stale checkpoint for `{thread_key}`: stored version {stored_version}, attempted {attempted_version}"
    )]
    StaleCheckpoint { thread_key: String, stored_version: u64, attempted_version: u64 },
    #[error("record not found: {0}")]
    NotFound(String),
}

/// Durable snapshot store for workflow state, keyed by thread.
///
/// `put` must only accept a state whose `version` is strictly greater than the
/// stored one, so a committed transcript can never be replaced by an older run.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get(&self, thread_key: &ThreadKey)
        -> Result<Option<ConversationState>, RepositoryError>;
    async fn put(&self, state: &ConversationState) -> Result<(), RepositoryError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub phone: String,
    pub name: Option<String>,
    pub tier: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_phone(&self, phone: &str) -> Result<Option<UserRecord>, RepositoryError>;
    async fn get_or_create(
        &self,
        phone: &str,
        name: Option<&str>,
    ) -> Result<UserRecord, RepositoryError>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: i64,
    pub user_id: i64,
    pub thread_key: ThreadKey,
    pub messages: Transcript,
    pub current_agent: Option<AgentKind>,
    pub state: Value,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Appends a snapshot of the conversation and returns its row id.
    async fn record(&self, user_id: i64, state: &ConversationState)
        -> Result<i64, RepositoryError>;
    async fn list_for_thread(
        &self,
        thread_key: &ThreadKey,
    ) -> Result<Vec<ConversationRecord>, RepositoryError>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewTicket {
    pub conversation_id: i64,
    pub thread_key: ThreadKey,
    pub priority_score: f64,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TicketRecord {
    pub id: i64,
    pub conversation_id: i64,
    pub thread_key: ThreadKey,
    pub priority_score: f64,
    pub severity: TicketSeverity,
    pub reason: String,
    pub assigned_to: Option<String>,
    pub is_open: bool,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait TicketRepository: Send + Sync {
    async fn create(&self, ticket: NewTicket) -> Result<TicketRecord, RepositoryError>;
    /// Open tickets, highest priority first.
    async fn list_open(&self) -> Result<Vec<TicketRecord>, RepositoryError>;
    async fn resolve(&self, id: i64) -> Result<(), RepositoryError>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub event_type: String,
    pub thread_key: Option<ThreadKey>,
    pub correlation_id: Option<String>,
    pub metadata: Value,
    pub occurred_at: DateTime<Utc>,
}

impl AnalyticsEvent {
    pub fn new(event_type: impl Into<String>, metadata: Value) -> Self {
        Self {
            event_type: event_type.into(),
            thread_key: None,
            correlation_id: None,
            metadata,
            occurred_at: Utc::now(),
        }
    }

    pub fn for_thread(mut self, thread_key: ThreadKey) -> Self {
        self.thread_key = Some(thread_key);
        self
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

#[async_trait]
pub trait AnalyticsRepository: Send + Sync {
    async fn log_event(&self, event: AnalyticsEvent) -> Result<(), RepositoryError>;
    async fn count_by_type(&self, event_type: &str) -> Result<u64, RepositoryError>;
    async fn list_recent(&self, limit: u32) -> Result<Vec<AnalyticsEvent>, RepositoryError>;
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_u64(column: &str, value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative integer): {value}"
        ))
    })
}

pub(crate) fn parse_agent(value: Option<String>) -> Result<Option<AgentKind>, RepositoryError> {
    match value.as_deref() {
        None => Ok(None),
        Some("sales_agent") => Ok(Some(AgentKind::Sales)),
        Some("support_agent") => Ok(Some(AgentKind::Support)),
        Some(other) => Err(RepositoryError::Decode(format!("unknown agent `{other}`"))),
    }
}

pub(crate) fn parse_severity(value: &str) -> Result<TicketSeverity, RepositoryError> {
    match value {
        "critical" => Ok(TicketSeverity::Critical),
        "high" => Ok(TicketSeverity::High),
        "medium" => Ok(TicketSeverity::Medium),
        other => Err(RepositoryError::Decode(format!("unknown ticket status `{other}`"))),
    }
}

pub(crate) fn decode_json<T: serde::de::DeserializeOwned>(
    column: &str,
    raw: &str,
) -> Result<T, RepositoryError> {
    serde_json::from_str(raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid json in `{column}`: {error}")))
}

pub(crate) fn encode_json<T: Serialize>(column: &str, value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value)
        .map_err(|error| RepositoryError::Decode(format!("could not encode `{column}`: {error}")))
}
