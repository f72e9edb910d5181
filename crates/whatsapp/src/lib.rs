//! WhatsApp Cloud API channel: inbound webhook payload types and the
//! outbound send client.

pub mod payload;
pub mod sender;

pub use payload::{InboundMessage, WebhookPayload};
pub use sender::{CloudApiSender, ReplySender, SendError};
