use std::time::Duration;

use async_trait::async_trait;
use clearquote_core::ExtractedData;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::debug;

use crate::blocks::handoff_notification;

pub const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("escalation post failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("escalation channel returned status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Posts the handoff notification to the human-facing channel. Failures
/// are reported to the caller, which logs them and still sends the
/// user-facing reply.
#[async_trait]
pub trait EscalationNotifier: Send + Sync {
    async fn notify_handoff(
        &self,
        conversation_id: &str,
        extracted: &ExtractedData,
    ) -> Result<(), NotifyError>;
}

/// Incoming-webhook implementation. The webhook URL embeds a token, so
/// it is held as a secret.
pub struct WebhookNotifier {
    http: reqwest::Client,
    webhook_url: SecretString,
}

impl WebhookNotifier {
    pub fn new(webhook_url: SecretString) -> Self {
        Self { http: reqwest::Client::new(), webhook_url }
    }
}

#[async_trait]
impl EscalationNotifier for WebhookNotifier {
    async fn notify_handoff(
        &self,
        conversation_id: &str,
        extracted: &ExtractedData,
    ) -> Result<(), NotifyError> {
        let message = handoff_notification(conversation_id, extracted);

        let response = self
            .http
            .post(self.webhook_url.expose_secret())
            .timeout(NOTIFY_TIMEOUT)
            .json(&message)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Status { status: status.as_u16(), body });
        }

        debug!(conversation_id, "handoff notification posted");
        Ok(())
    }
}
