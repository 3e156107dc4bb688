use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cadence_core::config::ChannelConfig;
use cadence_core::domain::conversation::strip_internal_note;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::ChannelError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: Option<String>,
}

#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_text(&self, to: &str, body: &str) -> Result<SendReceipt, ChannelError>;
    async fn mark_as_read(&self, message_id: &str) -> Result<(), ChannelError>;
}

/// Sends a reply with any internal note removed. Empty results are not sent.
pub async fn send_reply(
    sender: &dyn MessageSender,
    to: &str,
    reply: &str,
) -> Result<Option<SendReceipt>, ChannelError> {
    let visible = strip_internal_note(reply);
    if visible.is_empty() {
        warn!(event_name = "channel.send.empty_reply", to, "reply empty after stripping");
        return Ok(None);
    }
    sender.send_text(to, &visible).await.map(Some)
}

/// Graph API client for the WhatsApp Cloud API.
pub struct WhatsAppSender {
    client: Client,
    messages_url: String,
    access_token: SecretString,
}

impl WhatsAppSender {
    pub fn new(config: &ChannelConfig, timeout: Duration) -> Result<Self, ChannelError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| ChannelError::Transport(error.to_string()))?;

        let messages_url =
            messages_url(&config.base_url, &config.api_version, &config.phone_number_id);
        Ok(Self { client, messages_url, access_token: config.access_token.clone() })
    }

    async fn post(&self, payload: &Value) -> Result<Value, ChannelError> {
        let response = self
            .client
            .post(&self.messages_url)
            .bearer_auth(self.access_token.expose_secret())
            .json(payload)
            .send()
            .await
            .map_err(|error| ChannelError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Provider { status: status.as_u16(), body });
        }

        response.json::<Value>().await.map_err(|error| ChannelError::Payload(error.to_string()))
    }
}

#[async_trait]
impl MessageSender for WhatsAppSender {
    async fn send_text(&self, to: &str, body: &str) -> Result<SendReceipt, ChannelError> {
        let response = self.post(&text_message_payload(to, body)).await?;
        let parsed: SendResponse = serde_json::from_value(response).unwrap_or_default();
        let message_id = parsed.messages.into_iter().next().map(|message| message.id);

        info!(
            event_name = "channel.send.delivered",
            to,
            message_id = message_id.as_deref().unwrap_or("unknown"),
            "whatsapp message sent"
        );
        Ok(SendReceipt { message_id })
    }

    async fn mark_as_read(&self, message_id: &str) -> Result<(), ChannelError> {
        self.post(&read_receipt_payload(message_id)).await.map(|_| ())
    }
}

#[derive(Debug, Default, Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<SentMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: String,
}

pub fn messages_url(base_url: &str, api_version: &str, phone_number_id: &str) -> String {
    format!("{}/{api_version}/{phone_number_id}/messages", base_url.trim_end_matches('/'))
}

pub fn text_message_payload(to: &str, body: &str) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": to,
        "type": "text",
        "text": { "preview_url": false, "body": body },
    })
}

pub fn read_receipt_payload(message_id: &str) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "status": "read",
        "message_id": message_id,
    })
}

/// Used when the channel is disabled: logs instead of delivering.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSender;

#[async_trait]
impl MessageSender for NoopSender {
    async fn send_text(&self, to: &str, body: &str) -> Result<SendReceipt, ChannelError> {
        info!(
            event_name = "channel.send.skipped",
            to,
            chars = body.chars().count(),
            "channel disabled; reply not delivered"
        );
        Ok(SendReceipt { message_id: None })
    }

    async fn mark_as_read(&self, _message_id: &str) -> Result<(), ChannelError> {
        Ok(())
    }
}

/// Keeps every outbound message in memory.
#[derive(Clone, Default)]
pub struct RecordingSender {
    sent: Arc<Mutex<Vec<(String, String)>>>,
    read: Arc<Mutex<Vec<String>>>,
}

impl RecordingSender {
    pub fn sent(&self) -> Vec<(String, String)> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn read_receipts(&self) -> Vec<String> {
        match self.read.lock() {
            Ok(read) => read.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send_text(&self, to: &str, body: &str) -> Result<SendReceipt, ChannelError> {
        let mut sent = match self.sent.lock() {
            Ok(sent) => sent,
            Err(poisoned) => poisoned.into_inner(),
        };
        sent.push((to.to_string(), body.to_string()));
        Ok(SendReceipt { message_id: Some(format!("recorded.{}", sent.len())) })
    }

    async fn mark_as_read(&self, message_id: &str) -> Result<(), ChannelError> {
        match self.read.lock() {
            Ok(mut read) => read.push(message_id.to_string()),
            Err(poisoned) => poisoned.into_inner().push(message_id.to_string()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cadence_core::config::AppConfig;

    use super::{
        messages_url, send_reply, text_message_payload, MessageSender, RecordingSender,
        WhatsAppSender,
    };
    use crate::ChannelError;

    #[tokio::test]
    async fn reply_is_stripped_of_internal_note_before_sending() {
        let sender = RecordingSender::default();
        let reply = "Ya escalé tu caso.\n\n[INTERNAL NOTE: flagged for human escalation]";

        let receipt = send_reply(&sender, "5215512345678", reply).await.expect("send");
        assert!(receipt.is_some());
        assert_eq!(
            sender.sent(),
            vec![("5215512345678".to_string(), "Ya escalé tu caso.".to_string())]
        );
    }

    #[tokio::test]
    async fn reply_consisting_only_of_a_note_is_not_sent() {
        let sender = RecordingSender::default();
        let receipt =
            send_reply(&sender, "1", "[INTERNAL NOTE: nothing visible]").await.expect("send");
        assert!(receipt.is_none());
        assert!(sender.sent().is_empty());
    }

    #[test]
    fn request_shape_matches_cloud_api() {
        assert_eq!(
            messages_url("https://graph.facebook.com/", "v21.0", "1098765"),
            "https://graph.facebook.com/v21.0/1098765/messages"
        );
        let payload = text_message_payload("5215512345678", "hola");
        assert_eq!(payload["type"], "text");
        assert_eq!(payload["text"]["body"], "hola");
        assert_eq!(payload["text"]["preview_url"], false);
    }

    #[tokio::test]
    async fn unreachable_provider_surfaces_transport_error() {
        let mut config = AppConfig::default().channel;
        config.base_url = "http://127.0.0.1:9".to_string();
        config.phone_number_id = "1".to_string();
        let sender = WhatsAppSender::new(&config, Duration::from_secs(2)).expect("client");

        let outcome = sender.send_text("5215512345678", "hola").await;
        assert!(matches!(outcome, Err(ChannelError::Transport(_))));
    }
}
