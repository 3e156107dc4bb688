pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod pricing;
pub mod routing;
pub mod scoring;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
pub use domain::conversation::{
    strip_internal_note, AgentKind, ConversationState, Intent, Role, ThreadKey, Transcript, Turn,
    INTERNAL_NOTE_MARKER,
};
pub use domain::priority::{
    PriorityAssessment, RecommendedAction, RiskAssessment, TicketSeverity, TicketSignal,
};
pub use domain::sentiment::{Sentiment, SentimentAnalysis, Urgency};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use pricing::{ServiceQuote, ServiceTier};
pub use routing::route;
pub use scoring::PriorityThresholds;
