use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::priority::TicketSignal;
use crate::domain::sentiment::SentimentAnalysis;
use crate::errors::DomainError;

/// Token that separates user-visible reply text from internal-only notes.
/// Everything from the marker onward must be removed before transmission.
pub const INTERNAL_NOTE_MARKER: &str = "[INTERNAL NOTE:";

/// Well-known keys of the stage-scoped metadata map.
pub mod meta {
    pub const INTENT: &str = "intent";
    pub const TOOL_CALLS: &str = "tool_calls";
    pub const NEEDS_HANDOFF: &str = "needs_handoff";
    pub const HANDOFF_TO: &str = "handoff_to";
    pub const PRIORITY_DETAILS: &str = "priority_details";
    pub const ESCALATION: &str = "escalation";
    pub const DEGRADED_STAGES: &str = "degraded_stages";
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadKey(pub String);

impl ThreadKey {
    /// Derives the persistence key from a channel address (a phone number for WhatsApp).
    pub fn for_channel_address(address: &str) -> Result<Self, DomainError> {
        let trimmed = address.trim().trim_start_matches('+');
        if trimmed.is_empty() {
            return Err(DomainError::InvalidThreadKey(address.to_owned()));
        }
        Ok(Self(format!("user_{trimmed}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Sales,
    Support,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sales => "sales_agent",
            Self::Support => "support_agent",
        }
    }

    pub fn other(&self) -> Self {
        match self {
            Self::Sales => Self::Support,
            Self::Support => Self::Sales,
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    Sales,
    Support,
}

impl Intent {
    pub const LABELS: [&'static str; 2] = ["SALES", "SUPPORT"];

    /// Accepts a single classification label, tolerating case and surrounding punctuation.
    pub fn parse_label(raw: &str) -> Option<Self> {
        let normalized = raw
            .trim()
            .trim_matches(|ch: char| !ch.is_ascii_alphabetic())
            .to_ascii_uppercase();
        match normalized.as_str() {
            "SALES" => Some(Self::Sales),
            "SUPPORT" => Some(Self::Support),
            _ => None,
        }
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Sales => "SALES",
            Self::Support => "SUPPORT",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentKind>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_note: Option<String>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            agent: None,
            timestamp: Utc::now(),
            internal_note: None,
        }
    }

    pub fn assistant(content: impl Into<String>, agent: AgentKind) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            agent: Some(agent),
            timestamp: Utc::now(),
            internal_note: None,
        }
    }

    /// Full stored text, including the internal note when one is attached.
    pub fn rendered(&self) -> String {
        match &self.internal_note {
            Some(note) => format!("{}\n\n{INTERNAL_NOTE_MARKER} {note}]", self.content),
            None => self.content.clone(),
        }
    }
}

/// Removes the internal note (and anything after it) from outbound text.
pub fn strip_internal_note(text: &str) -> String {
    match text.find(INTERNAL_NOTE_MARKER) {
        Some(index) => text[..index].trim().to_owned(),
        None => text.trim().to_owned(),
    }
}

/// Append-only ordered sequence of turns. Existing turns are never reordered or
/// rewritten; the only permitted change to a committed turn is attaching the
/// internal note to the tail assistant turn of the current run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn last_user_turn(&self) -> Option<&Turn> {
        self.turns.iter().rev().find(|turn| turn.role == Role::User)
    }

    pub fn last_assistant_turn(&self) -> Option<&Turn> {
        self.turns.iter().rev().find(|turn| turn.role == Role::Assistant)
    }

    /// The trailing `count` turns, oldest first.
    pub fn recent(&self, count: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(count);
        &self.turns[start..]
    }

    /// Positions of the turns authored by `agent`.
    pub fn authored_by(&self, agent: AgentKind) -> Vec<usize> {
        self.turns
            .iter()
            .enumerate()
            .filter(|(_, turn)| turn.agent == Some(agent))
            .map(|(index, _)| index)
            .collect()
    }

    /// True when every turn of `self` appears, unchanged apart from a tail
    /// annotation, at the same position in `other`.
    pub fn is_prefix_of(&self, other: &Transcript) -> bool {
        if self.turns.len() > other.turns.len() {
            return false;
        }
        self.turns.iter().zip(other.turns.iter()).all(|(before, after)| {
            before.role == after.role
                && before.content == after.content
                && before.agent == after.agent
                && before.timestamp == after.timestamp
        })
    }

    pub fn annotate_tail(&mut self, note: impl Into<String>) -> bool {
        match self.turns.last_mut() {
            Some(turn) if turn.role == Role::Assistant && turn.internal_note.is_none() => {
                turn.internal_note = Some(note.into());
                true
            }
            _ => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub thread_key: ThreadKey,
    #[serde(default)]
    pub user_id: Option<i64>,
    /// Number of committed runs; incremented once per successful checkpoint.
    #[serde(default)]
    pub version: u64,
    pub messages: Transcript,
    #[serde(default)]
    pub current_agent: Option<AgentKind>,
    #[serde(default)]
    pub force_reroute: bool,
    #[serde(default)]
    pub rag_context: String,
    #[serde(default)]
    pub sentiment_analysis: Option<SentimentAnalysis>,
    #[serde(default)]
    pub priority_score: Option<f64>,
    #[serde(default)]
    pub should_escalate: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl ConversationState {
    pub fn new(thread_key: ThreadKey, user_id: Option<i64>) -> Self {
        Self {
            thread_key,
            user_id,
            version: 0,
            messages: Transcript::default(),
            current_agent: None,
            force_reroute: false,
            rag_context: String::new(),
            sentiment_analysis: None,
            priority_score: None,
            should_escalate: false,
            metadata: BTreeMap::new(),
        }
    }

    /// Text of the most recent inbound turn; every analysis stage keys off it.
    pub fn latest_user_message(&self) -> &str {
        self.messages.last_user_turn().map(|turn| turn.content.as_str()).unwrap_or_default()
    }

    pub fn intent(&self) -> Intent {
        self.metadata
            .get(meta::INTENT)
            .and_then(Value::as_str)
            .and_then(Intent::parse_label)
            .unwrap_or(Intent::Support)
    }

    pub fn set_intent(&mut self, intent: Intent) {
        self.metadata.insert(meta::INTENT.to_owned(), Value::String(intent.as_label().to_owned()));
    }

    pub fn needs_handoff(&self) -> bool {
        self.metadata.get(meta::NEEDS_HANDOFF).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn ticket_signal(&self) -> Option<TicketSignal> {
        if !self.should_escalate {
            return None;
        }
        self.metadata
            .get(meta::ESCALATION)
            .and_then(|value| serde_json::from_value::<TicketSignal>(value.clone()).ok())
    }

    /// Clears per-turn scratch values that must not leak into the next run.
    pub fn reset_turn_scratch(&mut self) {
        self.rag_context.clear();
        self.should_escalate = false;
        for key in [
            meta::TOOL_CALLS,
            meta::NEEDS_HANDOFF,
            meta::HANDOFF_TO,
            meta::PRIORITY_DETAILS,
            meta::ESCALATION,
            meta::DEGRADED_STAGES,
        ] {
            self.metadata.remove(key);
        }
    }

    pub fn record_degraded_stage(&mut self, stage: &str) {
        let entry = self
            .metadata
            .entry(meta::DEGRADED_STAGES.to_owned())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(stages) = entry {
            stages.push(Value::String(stage.to_owned()));
        }
    }
}
