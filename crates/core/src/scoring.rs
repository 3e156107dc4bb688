//! Priority arithmetic shared by the scorer and its tests. The gateway-backed
//! risk sub-call lives in the agent crate; everything here is pure.

use serde::{Deserialize, Serialize};

use crate::domain::priority::{PriorityAssessment, RecommendedAction, RiskAssessment};
use crate::domain::sentiment::{Sentiment, SentimentAnalysis, Urgency};

/// A single risk dimension at or above this value forces escalation.
pub const RISK_ESCALATION_FLOOR: f64 = 8.0;
const MONITOR_FLOOR: f64 = 5.0;
const SENTIMENT_WEIGHT: f64 = 0.4;
const RISK_WEIGHT: f64 = 0.6;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriorityThresholds {
    pub high: f64,
    pub critical: f64,
}

impl Default for PriorityThresholds {
    fn default() -> Self {
        Self { high: 7.0, critical: 9.0 }
    }
}

pub fn sentiment_weight(sentiment: Sentiment) -> f64 {
    match sentiment {
        Sentiment::VeryNegative => 9.0,
        Sentiment::Negative => 7.0,
        Sentiment::Neutral => 5.0,
        Sentiment::Positive => 3.0,
    }
}

pub fn urgency_weight(urgency: Urgency) -> f64 {
    match urgency {
        Urgency::Critical => 10.0,
        Urgency::High => 8.0,
        Urgency::Medium => 5.0,
        Urgency::Low => 2.0,
    }
}

pub fn sentiment_score(analysis: &SentimentAnalysis) -> f64 {
    sentiment_weight(analysis.sentiment) * 0.3
        + urgency_weight(analysis.urgency) * 0.4
        + analysis.frustration * 0.3
}

/// Combines sentiment and risk into the final escalation decision.
pub fn assess(
    analysis: &SentimentAnalysis,
    risk: RiskAssessment,
    thresholds: PriorityThresholds,
) -> PriorityAssessment {
    let risk = risk.clamped();
    let risk_score = risk.max();
    let priority_score =
        round2(sentiment_score(analysis) * SENTIMENT_WEIGHT + risk_score * RISK_WEIGHT);

    let should_escalate = priority_score >= thresholds.high
        || risk_score >= RISK_ESCALATION_FLOOR
        || analysis.urgency == Urgency::Critical;

    let reason =
        if should_escalate { escalation_reason(analysis, &risk) } else { String::new() };

    PriorityAssessment {
        priority_score,
        should_escalate,
        reason,
        risk,
        action: recommended_action(priority_score, thresholds),
    }
}

pub fn recommended_action(priority_score: f64, thresholds: PriorityThresholds) -> RecommendedAction {
    if priority_score >= thresholds.critical {
        RecommendedAction::ImmediateEscalation
    } else if priority_score >= thresholds.high {
        RecommendedAction::EscalateAfterResponse
    } else if priority_score >= MONITOR_FLOOR {
        RecommendedAction::RespondAndMonitor
    } else {
        RecommendedAction::Respond
    }
}

/// Human-readable summary of what triggered an escalation.
pub fn escalation_reason(analysis: &SentimentAnalysis, risk: &RiskAssessment) -> String {
    let mut reasons = Vec::new();
    if analysis.sentiment == Sentiment::VeryNegative {
        reasons.push("very dissatisfied customer".to_string());
    }
    if analysis.urgency == Urgency::Critical {
        reasons.push("critical urgency".to_string());
    }
    if analysis.frustration >= 8.0 {
        reasons.push("high frustration".to_string());
    }
    for (kind, score) in risk.entries() {
        if score >= RISK_ESCALATION_FLOOR {
            reasons.push(format!("critical {kind} risk"));
        }
    }

    if reasons.is_empty() {
        "high priority score".to_string()
    } else {
        reasons.join(", ")
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::{assess, recommended_action, sentiment_score, PriorityThresholds};
    use crate::domain::priority::{RecommendedAction, RiskAssessment};
    use crate::domain::sentiment::{Sentiment, SentimentAnalysis, Urgency};

    fn analysis(sentiment: Sentiment, urgency: Urgency, frustration: f64) -> SentimentAnalysis {
        SentimentAnalysis { sentiment, urgency, frustration, confidence: 0.9, indicators: vec![] }
    }

    #[test]
    fn very_negative_critical_scenario_scores_nine_point_four() {
        let furious = analysis(Sentiment::VeryNegative, Urgency::Critical, 9.0);
        assert!((sentiment_score(&furious) - 9.4).abs() < 1e-9);

        let calm_risk = assess(&furious, RiskAssessment::default(), PriorityThresholds::default());
        assert_eq!(calm_risk.priority_score, 3.76);
        assert!(calm_risk.should_escalate, "critical urgency must escalate on its own");
        assert!(calm_risk.reason.contains("critical urgency"));

        let severe_risk = assess(
            &furious,
            RiskAssessment { operational: 10.0, ..RiskAssessment::default() },
            PriorityThresholds::default(),
        );
        assert_eq!(severe_risk.priority_score, 9.76);
        assert_eq!(severe_risk.action, RecommendedAction::ImmediateEscalation);
    }

    #[test]
    fn single_high_risk_dimension_escalates_despite_low_priority() {
        let content = analysis(Sentiment::Positive, Urgency::Low, 0.0);
        let assessment = assess(
            &content,
            RiskAssessment { legal: 9.0, ..RiskAssessment::default() },
            PriorityThresholds::default(),
        );

        // 1.7 * 0.4 + 9.0 * 0.6
        assert_eq!(assessment.priority_score, 6.08);
        assert!(assessment.priority_score < 7.0);
        assert!(assessment.should_escalate);
        assert_eq!(assessment.reason, "critical legal risk");
        assert_eq!(assessment.action, RecommendedAction::RespondAndMonitor);
    }

    #[test]
    fn quiet_message_does_not_escalate() {
        let neutral = analysis(Sentiment::Neutral, Urgency::Low, 2.0);
        let assessment = assess(
            &neutral,
            RiskAssessment { financial: 3.0, ..RiskAssessment::default() },
            PriorityThresholds::default(),
        );

        assert!(!assessment.should_escalate);
        assert!(assessment.reason.is_empty());
        assert_eq!(assessment.action, RecommendedAction::Respond);
    }

    #[test]
    fn escalation_always_implies_a_documented_trigger() {
        let thresholds = PriorityThresholds::default();
        for sentiment in
            [Sentiment::Positive, Sentiment::Neutral, Sentiment::Negative, Sentiment::VeryNegative]
        {
            for urgency in [Urgency::Low, Urgency::Medium, Urgency::High, Urgency::Critical] {
                for risk_level in [0.0, 4.0, 7.9, 8.0, 10.0] {
                    let input = analysis(sentiment, urgency, 6.0);
                    let risk = RiskAssessment { security: risk_level, ..RiskAssessment::default() };
                    let assessment = assess(&input, risk, thresholds);
                    if assessment.should_escalate {
                        assert!(
                            assessment.priority_score >= thresholds.high
                                || risk_level >= 8.0
                                || urgency == Urgency::Critical
                        );
                        assert!(!assessment.reason.is_empty());
                    }
                }
            }
        }
    }

    #[test]
    fn action_bands_follow_configured_thresholds() {
        let thresholds = PriorityThresholds { high: 6.0, critical: 8.0 };
        assert_eq!(recommended_action(8.0, thresholds), RecommendedAction::ImmediateEscalation);
        assert_eq!(recommended_action(6.5, thresholds), RecommendedAction::EscalateAfterResponse);
        assert_eq!(recommended_action(5.0, thresholds), RecommendedAction::RespondAndMonitor);
        assert_eq!(recommended_action(4.99, thresholds), RecommendedAction::Respond);
    }
}
