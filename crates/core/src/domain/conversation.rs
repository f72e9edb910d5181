use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of a conversation (one row per external party
/// identifier, created on the first inbound message, never deleted).
/// The only transition is a manual `Active` -> `Paused` when an
/// operator takes over; there is no automated resume path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationState {
    Active,
    Paused,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unrecognized conversation state `{0}`")]
pub struct ParseConversationStateError(pub String);

impl ConversationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Paused => "PAUSED",
        }
    }
}

impl std::str::FromStr for ConversationState {
    type Err = ParseConversationStateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ACTIVE" => Ok(Self::Active),
            "PAUSED" => Ok(Self::Paused),
            other => Err(ParseConversationStateError(other.to_string())),
        }
    }
}
