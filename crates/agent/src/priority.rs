//! Gateway-backed priority scoring: one risk sub-call, then the pure
//! arithmetic in `cadence_core::scoring`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use tracing::warn;

use cadence_core::domain::priority::{PriorityAssessment, RiskAssessment};
use cadence_core::domain::sentiment::SentimentAnalysis;
use cadence_core::scoring::{self, PriorityThresholds};

use crate::llm::{
    extract_json_object, InferenceGateway, InferencePurpose, InferenceRequest, ResponseMode,
};

const RISK_INSTRUCTION: &str = r#"Assess the risk a customer message poses to a digital music distributor. Return a JSON object with four scores from 0 to 10:
{"security": 0-10, "financial": 0-10, "legal": 0-10, "operational": 0-10}
security covers account takeover and leaked credentials, financial covers missing payments and chargebacks, legal covers copyright claims and lawsuits, operational covers outages and blocked releases."#;

const DEFAULT_RISK_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of one scoring pass. `risk_error` is set when the risk sub-call
/// failed and the assessment was computed with zero risk.
#[derive(Debug)]
pub struct PriorityScore {
    pub assessment: PriorityAssessment,
    pub risk_error: Option<anyhow::Error>,
}

pub struct PriorityScorer {
    gateway: Arc<dyn InferenceGateway>,
    thresholds: PriorityThresholds,
    risk_timeout: Duration,
}

impl PriorityScorer {
    pub fn new(gateway: Arc<dyn InferenceGateway>, thresholds: PriorityThresholds) -> Self {
        Self { gateway, thresholds, risk_timeout: DEFAULT_RISK_TIMEOUT }
    }

    /// Bounds the risk sub-call; must stay below the caller's own deadline so
    /// the sentiment half of the score survives a slow gateway.
    pub fn with_risk_timeout(mut self, risk_timeout: Duration) -> Self {
        self.risk_timeout = risk_timeout;
        self
    }

    /// A failed or late risk sub-call contributes zero risk, so the
    /// sentiment triggers (critical urgency included) still apply. Errors only
    /// when the combined score is unusable; callers then substitute
    /// [`PriorityAssessment::neutral`].
    pub async fn score(&self, message: &str, analysis: &SentimentAnalysis) -> Result<PriorityScore> {
        let risk = match tokio::time::timeout(self.risk_timeout, self.assess_risk(message)).await {
            Ok(risk) => risk,
            Err(_) => Err(anyhow!("risk assessment timed out after {:?}", self.risk_timeout)),
        };
        let (risk, risk_error) = match risk {
            Ok(risk) => (risk, None),
            Err(error) => {
                warn!(
                    event_name = "agent.priority.risk_degraded",
                    error = %error,
                    "risk assessment failed, scoring with zero risk"
                );
                (RiskAssessment::default(), Some(error))
            }
        };

        let assessment = scoring::assess(analysis, risk, self.thresholds);
        if !assessment.priority_score.is_finite() {
            bail!("priority score is not a finite number");
        }
        Ok(PriorityScore { assessment, risk_error })
    }

    async fn assess_risk(&self, message: &str) -> Result<RiskAssessment> {
        let request = InferenceRequest::new(InferencePurpose::Risk, RISK_INSTRUCTION, message)
            .with_mode(ResponseMode::Json)
            .with_temperature(0.2);
        let response = self.gateway.infer(request).await?;
        let text = response.trimmed_text().unwrap_or_default();
        let object = extract_json_object(text)
            .ok_or_else(|| anyhow!("risk reply did not contain a json object"))?;
        serde_json::from_str(object).context("risk reply had an unexpected shape")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use cadence_core::domain::priority::RecommendedAction;
    use cadence_core::domain::sentiment::{Sentiment, SentimentAnalysis, Urgency};
    use cadence_core::scoring::PriorityThresholds;

    use super::PriorityScorer;
    use crate::llm::{InferencePurpose, InferenceResponse, ScriptedGateway, ScriptedStep};

    fn analysis(sentiment: Sentiment, urgency: Urgency, frustration: f64) -> SentimentAnalysis {
        SentimentAnalysis { sentiment, urgency, frustration, ..SentimentAnalysis::default() }
    }

    #[tokio::test]
    async fn high_single_risk_escalates_despite_calm_sentiment() {
        let gateway = ScriptedGateway::new();
        gateway.reply(
            InferencePurpose::Risk,
            r#"{"security": 1, "financial": 0, "legal": 9, "operational": 2}"#,
        );
        let scorer = PriorityScorer::new(Arc::new(gateway), PriorityThresholds::default());

        let calm = analysis(Sentiment::Neutral, Urgency::Low, 2.0);
        let scored = scorer.score("I will sue you for copyright", &calm).await.expect("scored");
        assert!(scored.risk_error.is_none());
        let assessment = scored.assessment;
        assert!(assessment.priority_score < 7.0);
        assert!(assessment.should_escalate);
        assert!(assessment.reason.contains("legal"));
    }

    #[tokio::test]
    async fn critical_customer_with_max_risk_is_immediate() {
        let gateway = ScriptedGateway::new();
        gateway.reply(
            InferencePurpose::Risk,
            r#"{"security": 10, "financial": 4, "legal": 0, "operational": 0}"#,
        );
        let scorer = PriorityScorer::new(Arc::new(gateway), PriorityThresholds::default());

        let furious = analysis(Sentiment::VeryNegative, Urgency::Critical, 9.0);
        let assessment =
            scorer.score("someone stole my account", &furious).await.expect("scored").assessment;
        assert_eq!(assessment.priority_score, 9.76);
        assert_eq!(assessment.action, RecommendedAction::ImmediateEscalation);
    }

    #[tokio::test]
    async fn unreadable_risk_reply_scores_with_zero_risk() {
        let gateway = ScriptedGateway::new();
        gateway.reply(InferencePurpose::Risk, "no idea");
        let scorer = PriorityScorer::new(Arc::new(gateway), PriorityThresholds::default());

        let scored = scorer.score("hola", &SentimentAnalysis::default()).await.expect("scored");
        assert!(scored.risk_error.is_some());
        assert_eq!(scored.assessment.risk.max(), 0.0);
        assert_eq!(scored.assessment.priority_score, 1.52);
        assert!(!scored.assessment.should_escalate);
    }

    #[tokio::test]
    async fn critical_urgency_escalates_when_risk_is_unavailable() {
        let gateway = ScriptedGateway::new();
        gateway.push(
            InferencePurpose::Risk,
            ScriptedStep::Stall(Duration::from_millis(200), InferenceResponse::text("{}")),
        );
        let scorer = PriorityScorer::new(Arc::new(gateway), PriorityThresholds::default())
            .with_risk_timeout(Duration::from_millis(20));

        let furious = analysis(Sentiment::VeryNegative, Urgency::Critical, 9.0);
        let scored = scorer.score("this is unacceptable", &furious).await.expect("scored");
        assert!(scored.risk_error.is_some());
        // 9.4 sentiment, zero risk.
        assert_eq!(scored.assessment.priority_score, 3.76);
        assert!(scored.assessment.should_escalate);
        assert!(scored.assessment.reason.contains("critical"));
    }
}
