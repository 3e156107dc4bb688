//! WhatsApp Cloud API connector.
//!
//! - **Webhook** (`webhook`) - payload parsing and the subscription handshake
//! - **Signature** (`signature`) - `X-Hub-Signature-256` verification
//! - **Sender** (`sender`) - outbound text delivery; internal notes never leave the process
//!
//! ```text
//! Meta webhook → parse_inbound → (server) workflow → send_reply → Graph API
//! ```

pub mod sender;
pub mod signature;
pub mod webhook;

use thiserror::Error;

pub use sender::{
    send_reply, MessageSender, NoopSender, RecordingSender, SendReceipt, WhatsAppSender,
};
pub use signature::verify_signature;
pub use webhook::{
    parse_inbound, verify_subscription, InboundMessage, VerificationQuery, WebhookPayload,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("webhook verification failed: {0}")]
    Verification(String),
    #[error("webhook signature rejected: {0}")]
    Signature(String),
    #[error("malformed webhook payload: {0}")]
    Payload(String),
    #[error("delivery transport failed: {0}")]
    Transport(String),
    #[error("provider rejected request with status {status}: {body}")]
    Provider { status: u16, body: String },
}
