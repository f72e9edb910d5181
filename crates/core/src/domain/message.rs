use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unrecognized message role `{0}`")]
pub struct ParseMessageRoleError(pub String);

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = ParseMessageRoleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(ParseMessageRoleError(other.to_string())),
        }
    }
}

/// A single transcript entry. The id is the provider-assigned message
/// identifier for inbound messages (the idempotency key) and a
/// synthesized identifier for assistant replies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(id: impl Into<String>, conversation_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            conversation_id: conversation_id.into(),
            role: MessageRole::User,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn assistant(
        id: impl Into<String>,
        conversation_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            conversation_id: conversation_id.into(),
            role: MessageRole::Assistant,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::MessageRole;

    #[test]
    fn role_round_trips_through_storage_representation() {
        for role in [MessageRole::User, MessageRole::Assistant] {
            assert_eq!(role.as_str().parse::<MessageRole>(), Ok(role));
        }
    }

    #[test]
    fn system_role_is_not_a_transcript_role() {
        assert!("system".parse::<MessageRole>().is_err());
    }
}
