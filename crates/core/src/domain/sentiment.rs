use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
    VeryNegative,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

/// Structured emotional/urgency assessment of the latest inbound message.
///
/// Fields missing from a gateway reply take the neutral defaults one by one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentimentAnalysis {
    pub sentiment: Sentiment,
    pub urgency: Urgency,
    /// 0-10
    #[serde(alias = "frustration_level")]
    pub frustration: f64,
    /// 0-1
    pub confidence: f64,
    pub indicators: Vec<String>,
}

impl Default for SentimentAnalysis {
    fn default() -> Self {
        Self {
            sentiment: Sentiment::Neutral,
            urgency: Urgency::Low,
            frustration: 5.0,
            confidence: 0.5,
            indicators: Vec::new(),
        }
    }
}

impl SentimentAnalysis {
    /// Pins the numeric fields into their documented ranges.
    pub fn clamped(mut self) -> Self {
        self.frustration = clamp_or(self.frustration, 0.0, 10.0, 5.0);
        self.confidence = clamp_or(self.confidence, 0.0, 1.0, 0.5);
        self
    }
}

fn clamp_or(value: f64, min: f64, max: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::{Sentiment, SentimentAnalysis, Urgency};

    #[test]
    fn decodes_gateway_json_with_legacy_field_name() {
        let analysis: SentimentAnalysis = serde_json::from_str(
            r#"{"sentiment":"very_negative","urgency":"critical","frustration_level":9,"confidence":0.8}"#,
        )
        .expect("valid assessment");

        assert_eq!(analysis.sentiment, Sentiment::VeryNegative);
        assert_eq!(analysis.urgency, Urgency::Critical);
        assert_eq!(analysis.frustration, 9.0);
        assert!(analysis.indicators.is_empty());
    }

    #[test]
    fn partial_reply_keeps_the_fields_it_carries() {
        let analysis: SentimentAnalysis = serde_json::from_str(
            r#"{"sentiment":"very_negative","urgency":"critical","frustration_level":9}"#,
        )
        .expect("partial assessment");

        assert_eq!(analysis.sentiment, Sentiment::VeryNegative);
        assert_eq!(analysis.urgency, Urgency::Critical);
        assert_eq!(analysis.frustration, 9.0);
        assert_eq!(analysis.confidence, 0.5);

        let sparse: SentimentAnalysis =
            serde_json::from_str(r#"{"urgency":"high"}"#).expect("sparse assessment");
        assert_eq!(sparse.sentiment, Sentiment::Neutral);
        assert_eq!(sparse.urgency, Urgency::High);
        assert_eq!(sparse.frustration, 5.0);
    }

    #[test]
    fn clamping_pins_out_of_range_values() {
        let analysis = SentimentAnalysis {
            frustration: 14.0,
            confidence: f64::NAN,
            ..SentimentAnalysis::default()
        }
        .clamped();

        assert_eq!(analysis.frustration, 10.0);
        assert_eq!(analysis.confidence, 0.5);
    }
}
