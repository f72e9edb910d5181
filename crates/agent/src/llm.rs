use std::time::Duration;

use async_trait::async_trait;
use clearquote_core::domain::reply::HOLDING_REPLY;
use clearquote_core::{AgentAction, AgentReply, ExtractedData, Message};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("completion request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("completion backend returned status {0}")]
    Status(u16),
    #[error("completion backend returned no choices")]
    EmptyChoices,
    #[error("structured reply was not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Completion backend seam. Implementations never return a null reply
/// on success; on error the pipeline substitutes
/// [`AgentReply::fallback`] so the user always gets a response.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        history: &[Message],
    ) -> Result<AgentReply, LlmError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct WireReply {
    #[serde(default)]
    reply_to_user: String,
    #[serde(default)]
    extracted_data: ExtractedData,
    #[serde(default)]
    action: String,
}

/// Chat-completions client for the DeepSeek wire format.
pub struct DeepSeekClient {
    http: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl DeepSeekClient {
    pub fn new(
        api_key: SecretString,
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: base_url.into(),
            model: model.into(),
            timeout,
        }
    }
}

#[async_trait]
impl LlmClient for DeepSeekClient {
    async fn complete(
        &self,
        system_prompt: &str,
        history: &[Message],
    ) -> Result<AgentReply, LlmError> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(WireMessage { role: "system", content: system_prompt });
        messages.extend(
            history
                .iter()
                .map(|message| WireMessage { role: message.role.as_str(), content: &message.content }),
        );

        let request = ChatRequest {
            model: &self.model,
            messages,
            response_format: ResponseFormat { kind: "json_object" },
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .timeout(self.timeout)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::Status(status.as_u16()));
        }

        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .first()
            .map(|choice| choice.message.content.as_str())
            .ok_or(LlmError::EmptyChoices)?;

        parse_reply(content)
    }
}

/// Parse and post-validate the structured content: an empty reply text
/// becomes the holding message, an unrecognized action tag becomes
/// `continue`.
pub fn parse_reply(content: &str) -> Result<AgentReply, LlmError> {
    let wire: WireReply = serde_json::from_str(content)?;

    let reply_to_user = if wire.reply_to_user.trim().is_empty() {
        HOLDING_REPLY.to_string()
    } else {
        wire.reply_to_user
    };

    Ok(AgentReply {
        reply_to_user,
        extracted_data: wire.extracted_data,
        action: AgentAction::parse(&wire.action),
    })
}
