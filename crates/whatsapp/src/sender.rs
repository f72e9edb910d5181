use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

/// Outbound sends are bounded independently of the caller's deadline.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SendError {
    #[error("send request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("send API returned status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Outbound seam of the channel. The pipeline only ever needs to push a
/// text reply back to the sender.
#[async_trait]
pub trait ReplySender: Send + Sync {
    async fn send_text(&self, to: &str, body: &str) -> Result<(), SendError>;
}

/// Cloud API send client (`POST /v18.0/{phone_number_id}/messages`).
pub struct CloudApiSender {
    http: reqwest::Client,
    base_url: String,
    phone_number_id: String,
    access_token: SecretString,
}

impl CloudApiSender {
    pub fn new(
        base_url: impl Into<String>,
        phone_number_id: impl Into<String>,
        access_token: SecretString,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            phone_number_id: phone_number_id.into(),
            access_token,
        }
    }
}

#[async_trait]
impl ReplySender for CloudApiSender {
    async fn send_text(&self, to: &str, body: &str) -> Result<(), SendError> {
        let url = format!("{}/v18.0/{}/messages", self.base_url, self.phone_number_id);

        let response = self
            .http
            .post(&url)
            .timeout(SEND_TIMEOUT)
            .bearer_auth(self.access_token.expose_secret())
            .json(&send_payload(to, body))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SendError::Status { status: status.as_u16(), body });
        }

        debug!(to, "outbound message accepted");
        Ok(())
    }
}

fn send_payload(to: &str, body: &str) -> serde_json::Value {
    json!({
        "messaging_product": "whatsapp",
        "to": to,
        "type": "text",
        "text": { "body": body },
    })
}

#[cfg(test)]
mod tests {
    use super::send_payload;

    #[test]
    fn send_payload_matches_cloud_api_shape() {
        let payload = send_payload("14165551234", "On our way!");
        assert_eq!(payload["messaging_product"], "whatsapp");
        assert_eq!(payload["to"], "14165551234");
        assert_eq!(payload["type"], "text");
        assert_eq!(payload["text"]["body"], "On our way!");
    }
}
