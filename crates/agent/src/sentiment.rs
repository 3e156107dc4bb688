use std::sync::Arc;

use anyhow::{anyhow, Context, Result};

use cadence_core::domain::conversation::{Role, Turn};
use cadence_core::domain::sentiment::SentimentAnalysis;

use crate::llm::{
    extract_json_object, InferenceGateway, InferencePurpose, InferenceRequest, ResponseMode,
};

/// Prior turns quoted to the assessor alongside the current message.
pub const SENTIMENT_HISTORY_TURNS: usize = 3;

const ASSESSOR_INSTRUCTION: &str = r#"You are an expert sentiment analyst. Analyse the current message and return a JSON object:
{
  "sentiment": "positive|neutral|negative|very_negative",
  "urgency": "low|medium|high|critical",
  "frustration_level": 0-10,
  "confidence": 0-1,
  "indicators": ["detected indicators"]
}
Consider urgency words ("urgent", "now", "asap", "urgente", "ya"), signs of frustration (repetition, capitals, repeated exclamation marks), emotional tone (complaints, dissatisfaction, threats) and the previous conversation."#;

pub struct SentimentAssessor {
    gateway: Arc<dyn InferenceGateway>,
}

impl SentimentAssessor {
    pub fn new(gateway: Arc<dyn InferenceGateway>) -> Self {
        Self { gateway }
    }

    pub async fn assess(&self, message: &str, history: &[Turn]) -> Result<SentimentAnalysis> {
        let request = InferenceRequest::new(
            InferencePurpose::Sentiment,
            ASSESSOR_INSTRUCTION,
            format!("Previous context:\n{}\n\nCurrent message:\n{message}", quote_history(history)),
        )
        .with_mode(ResponseMode::Json)
        .with_temperature(0.3);

        let response = self.gateway.infer(request).await?;
        let text = response.trimmed_text().unwrap_or_default();
        let object = extract_json_object(text)
            .ok_or_else(|| anyhow!("sentiment reply did not contain a json object"))?;
        let analysis: SentimentAnalysis =
            serde_json::from_str(object).context("sentiment reply had an unexpected shape")?;
        Ok(analysis.clamped())
    }
}

fn quote_history(history: &[Turn]) -> String {
    let start = history.len().saturating_sub(SENTIMENT_HISTORY_TURNS);
    history[start..]
        .iter()
        .map(|turn| {
            let role = match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            format!("{role}: {}", turn.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cadence_core::domain::conversation::{AgentKind, Turn};
    use cadence_core::domain::sentiment::{Sentiment, Urgency};

    use super::SentimentAssessor;
    use crate::llm::{InferencePurpose, ScriptedGateway};

    #[tokio::test]
    async fn parses_assessment_and_quotes_last_three_turns() {
        let gateway = ScriptedGateway::new();
        gateway.reply(
            InferencePurpose::Sentiment,
            r#"```json
{"sentiment": "negative", "urgency": "high", "frustration_level": 7.5, "confidence": 0.9, "indicators": ["¡¡"]}
```"#,
        );
        let assessor = SentimentAssessor::new(Arc::new(gateway.clone()));
        let history = vec![
            Turn::user("first"),
            Turn::assistant("second", AgentKind::Support),
            Turn::user("third"),
            Turn::assistant("fourth", AgentKind::Support),
        ];

        let analysis = assessor.assess("¡¡sigue sin aparecer!!", &history).await.expect("parsed");
        assert_eq!(analysis.sentiment, Sentiment::Negative);
        assert_eq!(analysis.urgency, Urgency::High);
        assert_eq!(analysis.frustration, 7.5);

        let prompt = &gateway.requests_for(InferencePurpose::Sentiment)[0].user_message;
        assert!(!prompt.contains("first"));
        assert!(prompt.contains("assistant: second") && prompt.contains("assistant: fourth"));
    }

    #[tokio::test]
    async fn reply_without_confidence_keeps_critical_urgency() {
        let gateway = ScriptedGateway::new();
        gateway.reply(
            InferencePurpose::Sentiment,
            r#"{"sentiment": "very_negative", "urgency": "critical", "frustration_level": 9}"#,
        );
        let assessor = SentimentAssessor::new(Arc::new(gateway));

        let analysis = assessor.assess("FIX THIS NOW", &[]).await.expect("partial reply parsed");
        assert_eq!(analysis.sentiment, Sentiment::VeryNegative);
        assert_eq!(analysis.urgency, Urgency::Critical);
        assert_eq!(analysis.frustration, 9.0);
        assert_eq!(analysis.confidence, 0.5);
    }

    #[tokio::test]
    async fn malformed_reply_is_an_error() {
        let gateway = ScriptedGateway::new();
        gateway.reply(InferencePurpose::Sentiment, "the customer seems upset");
        gateway.reply(InferencePurpose::Sentiment, r#"{"sentiment": "furious"}"#);
        let assessor = SentimentAssessor::new(Arc::new(gateway));

        assert!(assessor.assess("hola", &[]).await.is_err());
        assert!(assessor.assess("hola", &[]).await.is_err());
    }
}
