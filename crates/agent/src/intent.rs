use std::sync::Arc;

use anyhow::{anyhow, Result};

use cadence_core::domain::conversation::Intent;

use crate::llm::{InferenceGateway, InferencePurpose, InferenceRequest, ResponseMode};

const CLASSIFIER_INSTRUCTION: &str = "Classify the customer message for a digital music \
distributor. SALES covers prices, plans, quotes, onboarding and new accounts. SUPPORT covers \
problems with releases, metadata, royalties, payments and the platform.";

pub struct IntentClassifier {
    gateway: Arc<dyn InferenceGateway>,
}

impl IntentClassifier {
    pub fn new(gateway: Arc<dyn InferenceGateway>) -> Self {
        Self { gateway }
    }

    /// Errors when the gateway fails or answers with anything but a known label.
    pub async fn classify(&self, message: &str) -> Result<Intent> {
        let request =
            InferenceRequest::new(InferencePurpose::Intent, CLASSIFIER_INSTRUCTION, message)
                .with_mode(ResponseMode::Label(&Intent::LABELS))
                .with_temperature(0.0);
        let response = self.gateway.infer(request).await?;
        let label = response.trimmed_text().unwrap_or_default();
        Intent::parse_label(label).ok_or_else(|| anyhow!("unrecognised intent label `{label}`"))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cadence_core::domain::conversation::Intent;

    use super::IntentClassifier;
    use crate::llm::{InferencePurpose, ResponseMode, ScriptedGateway};

    #[tokio::test]
    async fn parses_single_label_replies() {
        let gateway = ScriptedGateway::new();
        gateway.reply(InferencePurpose::Intent, "Sales.");
        gateway.reply(InferencePurpose::Intent, "SUPPORT");
        let classifier = IntentClassifier::new(Arc::new(gateway.clone()));

        assert_eq!(classifier.classify("¿cuánto cuesta?").await.ok(), Some(Intent::Sales));
        assert_eq!(classifier.classify("mi canción no aparece").await.ok(), Some(Intent::Support));

        let requests = gateway.requests_for(InferencePurpose::Intent);
        assert!(matches!(requests[0].mode, ResponseMode::Label(labels) if labels.len() == 2));
    }

    #[tokio::test]
    async fn unknown_label_is_an_error() {
        let gateway = ScriptedGateway::new();
        gateway.reply(InferencePurpose::Intent, "BILLING");
        let classifier = IntentClassifier::new(Arc::new(gateway));

        assert!(classifier.classify("invoice?").await.is_err());
    }
}
