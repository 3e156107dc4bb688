use serde::{Deserialize, Serialize};

use crate::domain::conversation::ThreadKey;

/// Domain-risk signals for one message, each on a 0-10 scale.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    #[serde(default)]
    pub security: f64,
    #[serde(default)]
    pub financial: f64,
    #[serde(default)]
    pub legal: f64,
    #[serde(default)]
    pub operational: f64,
}

impl RiskAssessment {
    pub fn entries(&self) -> [(&'static str, f64); 4] {
        [
            ("security", self.security),
            ("financial", self.financial),
            ("legal", self.legal),
            ("operational", self.operational),
        ]
    }

    pub fn max(&self) -> f64 {
        self.entries().iter().map(|(_, score)| *score).fold(0.0, f64::max)
    }

    pub fn clamped(self) -> Self {
        let pin = |value: f64| if value.is_finite() { value.clamp(0.0, 10.0) } else { 0.0 };
        Self {
            security: pin(self.security),
            financial: pin(self.financial),
            legal: pin(self.legal),
            operational: pin(self.operational),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    ImmediateEscalation,
    EscalateAfterResponse,
    RespondAndMonitor,
    Respond,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriorityAssessment {
    pub priority_score: f64,
    pub should_escalate: bool,
    pub reason: String,
    pub risk: RiskAssessment,
    pub action: RecommendedAction,
}

impl PriorityAssessment {
    /// Substituted whenever scoring cannot complete.
    pub fn neutral() -> Self {
        Self {
            priority_score: 5.0,
            should_escalate: false,
            reason: String::new(),
            risk: RiskAssessment::default(),
            action: RecommendedAction::Respond,
        }
    }
}

/// Raised by the escalation gate for the downstream ticketing collaborator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TicketSignal {
    pub thread_key: ThreadKey,
    pub priority_score: f64,
    pub reason: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketSeverity {
    Critical,
    High,
    Medium,
}

impl TicketSeverity {
    pub fn from_score(priority_score: f64) -> Self {
        if priority_score >= 9.0 {
            Self::Critical
        } else if priority_score >= 7.0 {
            Self::High
        } else {
            Self::Medium
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{RiskAssessment, TicketSeverity};

    #[test]
    fn risk_max_picks_highest_dimension() {
        let risk = RiskAssessment { security: 2.0, financial: 9.0, legal: 4.5, operational: 0.0 };
        assert_eq!(risk.max(), 9.0);
        assert_eq!(RiskAssessment::default().max(), 0.0);
    }

    #[test]
    fn partial_risk_json_defaults_missing_fields() {
        let risk: RiskAssessment =
            serde_json::from_str(r#"{"legal": 12, "operational": 3}"#).expect("decode");
        let risk = risk.clamped();
        assert_eq!(risk.legal, 10.0);
        assert_eq!(risk.security, 0.0);
    }

    #[test]
    fn ticket_severity_follows_score_bands() {
        assert_eq!(TicketSeverity::from_score(9.2), TicketSeverity::Critical);
        assert_eq!(TicketSeverity::from_score(7.0), TicketSeverity::High);
        assert_eq!(TicketSeverity::from_score(4.0).as_str(), "medium");
    }
}
