use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::ChannelError;

/// Top-level body Meta posts to the webhook.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct WebhookEntry {
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct WebhookChange {
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub value: ChangeValue,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ChangeValue {
    #[serde(default)]
    pub contacts: Vec<Contact>,
    #[serde(default)]
    pub messages: Vec<RawMessage>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Contact {
    #[serde(default)]
    pub wa_id: Option<String>,
    #[serde(default)]
    pub profile: Option<ContactProfile>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ContactProfile {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawMessage {
    pub from: String,
    pub id: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<TextBody>,
    #[serde(default)]
    pub button: Option<ButtonBody>,
    #[serde(default)]
    pub interactive: Option<InteractiveBody>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct TextBody {
    pub body: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ButtonBody {
    pub text: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct InteractiveBody {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub button_reply: Option<ReplyTitle>,
    #[serde(default)]
    pub list_reply: Option<ReplyTitle>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ReplyTitle {
    pub title: String,
}

/// One user message extracted from a webhook delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub from: String,
    pub message_id: String,
    pub timestamp: Option<String>,
    pub kind: String,
    pub text: String,
    pub profile_name: Option<String>,
}

/// Extracts every text-bearing message. Status callbacks and unsupported
/// media types produce nothing.
pub fn parse_inbound(payload: &WebhookPayload) -> Vec<InboundMessage> {
    let mut inbound = Vec::new();
    for change in payload.entry.iter().flat_map(|entry| entry.changes.iter()) {
        for message in &change.value.messages {
            let Some(text) = message_text(message) else {
                debug!(
                    event_name = "channel.webhook.unsupported_message",
                    message_id = %message.id,
                    kind = %message.kind,
                    "skipping non-text message"
                );
                continue;
            };

            let profile_name = change
                .value
                .contacts
                .iter()
                .find(|contact| contact.wa_id.as_deref() == Some(message.from.as_str()))
                .or_else(|| change.value.contacts.first())
                .and_then(|contact| contact.profile.as_ref())
                .and_then(|profile| profile.name.clone());

            inbound.push(InboundMessage {
                from: message.from.clone(),
                message_id: message.id.clone(),
                timestamp: message.timestamp.clone(),
                kind: message.kind.clone(),
                text,
                profile_name,
            });
        }
    }
    inbound
}

fn message_text(message: &RawMessage) -> Option<String> {
    let text = match message.kind.as_str() {
        "text" => message.text.as_ref().map(|text| text.body.clone()),
        "button" => message.button.as_ref().map(|button| button.text.clone()),
        "interactive" => message.interactive.as_ref().and_then(|interactive| {
            match interactive.kind.as_str() {
                "button_reply" => interactive.button_reply.as_ref(),
                "list_reply" => interactive.list_reply.as_ref(),
                _ => None,
            }
            .map(|reply| reply.title.clone())
        }),
        _ => None,
    }?;
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Query string of the `GET /webhook` subscription handshake.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct VerificationQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// Returns the challenge to echo back when the handshake is valid.
pub fn verify_subscription(
    query: &VerificationQuery,
    expected_token: &SecretString,
) -> Result<String, ChannelError> {
    let (Some(mode), Some(token), Some(challenge)) =
        (query.mode.as_deref(), query.verify_token.as_deref(), query.challenge.as_deref())
    else {
        return Err(ChannelError::Payload("missing hub.* verification parameters".to_string()));
    };

    let expected = expected_token.expose_secret();
    if mode != "subscribe" || expected.is_empty() || token != expected {
        warn!(event_name = "channel.webhook.verification_failed", mode, "webhook handshake rejected");
        return Err(ChannelError::Verification("mode or verify token mismatch".to_string()));
    }

    Ok(challenge.to_string())
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::{parse_inbound, verify_subscription, VerificationQuery, WebhookPayload};
    use crate::ChannelError;

    fn payload(json: &str) -> WebhookPayload {
        serde_json::from_str(json).expect("valid webhook json")
    }

    #[test]
    fn parses_text_button_and_interactive_messages() {
        let body = payload(
            r#"{
              "object": "whatsapp_business_account",
              "entry": [{
                "changes": [{
                  "field": "messages",
                  "value": {
                    "contacts": [{"wa_id": "5215512345678", "profile": {"name": "Ana"}}],
                    "messages": [
                      {"from": "5215512345678", "id": "wamid.1", "timestamp": "1700000000",
                       "type": "text", "text": {"body": "  ¿Cuánto cuesta el plan pro?  "}},
                      {"from": "5215512345678", "id": "wamid.2", "type": "button",
                       "button": {"text": "Ver precios"}},
                      {"from": "5215512345678", "id": "wamid.3", "type": "interactive",
                       "interactive": {"type": "list_reply", "list_reply": {"title": "Soporte"}}},
                      {"from": "5215512345678", "id": "wamid.4", "type": "image"}
                    ]
                  }
                }]
              }]
            }"#,
        );

        let messages = parse_inbound(&body);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].text, "¿Cuánto cuesta el plan pro?");
        assert_eq!(messages[0].profile_name.as_deref(), Some("Ana"));
        assert_eq!(messages[1].text, "Ver precios");
        assert_eq!(messages[2].text, "Soporte");
        assert_eq!(messages[2].message_id, "wamid.3");
    }

    #[test]
    fn status_callbacks_yield_no_messages() {
        let body = payload(
            r#"{"entry": [{"changes": [{"value": {"statuses": [{"id": "wamid.1", "status": "read"}]}}]}]}"#,
        );
        assert!(parse_inbound(&body).is_empty());
        assert!(parse_inbound(&WebhookPayload::default()).is_empty());
    }

    #[test]
    fn handshake_echoes_challenge_only_for_matching_token() {
        let expected = SecretString::from("verify-me".to_string());
        let query = VerificationQuery {
            mode: Some("subscribe".to_string()),
            verify_token: Some("verify-me".to_string()),
            challenge: Some("1158201444".to_string()),
        };
        assert_eq!(verify_subscription(&query, &expected), Ok("1158201444".to_string()));

        let wrong = VerificationQuery { verify_token: Some("nope".to_string()), ..query.clone() };
        assert!(matches!(verify_subscription(&wrong, &expected), Err(ChannelError::Verification(_))));

        let missing = VerificationQuery { challenge: None, ..query };
        assert!(matches!(verify_subscription(&missing, &expected), Err(ChannelError::Payload(_))));
    }

    #[test]
    fn empty_expected_token_never_verifies() {
        let query = VerificationQuery {
            mode: Some("subscribe".to_string()),
            verify_token: Some(String::new()),
            challenge: Some("c".to_string()),
        };
        let expected = SecretString::from(String::new());
        assert!(verify_subscription(&query, &expected).is_err());
    }
}
