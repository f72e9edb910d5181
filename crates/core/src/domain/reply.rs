use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Quote fields extracted by the model. Field names are model-defined
/// (address, elevator_access, stairs, inventory today); latest write
/// wins, no history retained.
pub type ExtractedData = BTreeMap<String, String>;

/// Sent to the customer when the model backend fails outright.
pub const FALLBACK_REPLY: &str =
    "Sorry, I ran into a technical issue. Our team will follow up with you shortly.";

/// Substituted when the model returns an empty reply text.
pub const HOLDING_REPLY: &str = "I'm looking into that, one moment!";

/// Action requested by the model for the current turn. Unrecognized
/// wire values coerce to `Continue` so a model typo can never select
/// the wrong code path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentAction {
    #[default]
    Continue,
    Handoff,
    Schedule,
}

impl AgentAction {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "handoff" => Self::Handoff,
            "schedule" => Self::Schedule,
            _ => Self::Continue,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Handoff => "handoff",
            Self::Schedule => "schedule",
        }
    }
}

/// Structured model reply after normalization: the reply text is never
/// empty and the action is always a recognized variant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentReply {
    pub reply_to_user: String,
    pub extracted_data: ExtractedData,
    pub action: AgentAction,
}

impl AgentReply {
    /// Safe canned reply used when the gateway fails entirely. Callers
    /// treat this as usable output, not as a hard failure.
    pub fn fallback() -> Self {
        Self {
            reply_to_user: FALLBACK_REPLY.to_string(),
            extracted_data: ExtractedData::new(),
            action: AgentAction::Continue,
        }
    }
}
