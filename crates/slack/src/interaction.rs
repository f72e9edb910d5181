//! Interactive callback handling for the take-over button.

use clearquote_db::{ConversationStore, StoreError};
use clearquote_core::ConversationState;
use serde::Deserialize;
use tracing::warn;

/// The only action this service reacts to; anything else recognized by
/// the channel is acknowledged with no effect.
pub const TAKE_OVER_ACTION: &str = "take_over_chat";

/// The decoded `payload` form field of an interactive callback.
#[derive(Clone, Debug, Deserialize)]
pub struct InteractionPayload {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub user: InteractionUser,
    #[serde(default)]
    pub actions: Vec<InteractionAction>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct InteractionUser {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub username: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct InteractionAction {
    pub action_id: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TakeOverOutcome {
    /// Recognized-but-unhandled action: acknowledge, do nothing.
    Ignored,
    NotFound,
    AlreadyPaused,
    Paused { operator: String },
}

impl TakeOverOutcome {
    /// Channel-facing response text; `None` means a bare acknowledgment.
    pub fn response_text(&self) -> Option<String> {
        match self {
            Self::Ignored => None,
            Self::NotFound => Some("\u{26a0}\u{fe0f} Conversation not found.".to_string()),
            Self::AlreadyPaused => Some("\u{2139}\u{fe0f} Chat was already paused.".to_string()),
            Self::Paused { operator } => Some(format!(
                "\u{2705} Chat paused. {operator} has taken over the conversation."
            )),
        }
    }
}

/// Apply the take-over action. The conversation lookup treats a store
/// error like a missing row (the operator gets the warning either way);
/// only a failing pause mutation propagates, so the transport layer can
/// answer with a server error.
pub async fn apply_take_over(
    store: &ConversationStore,
    payload: &InteractionPayload,
) -> Result<TakeOverOutcome, StoreError> {
    let Some(action) = payload.actions.first() else {
        return Ok(TakeOverOutcome::Ignored);
    };
    if action.action_id != TAKE_OVER_ACTION {
        return Ok(TakeOverOutcome::Ignored);
    }

    let conversation_id = action.value.as_str();
    let state = match store.conversation_state(conversation_id).await {
        Ok(state) => state,
        Err(error) => {
            warn!(conversation_id, error = %error, "conversation lookup failed");
            return Ok(TakeOverOutcome::NotFound);
        }
    };

    match state {
        None => Ok(TakeOverOutcome::NotFound),
        Some(ConversationState::Paused) => Ok(TakeOverOutcome::AlreadyPaused),
        Some(ConversationState::Active) => {
            store.pause_conversation(conversation_id).await?;
            Ok(TakeOverOutcome::Paused { operator: payload.user.username.clone() })
        }
    }
}

#[cfg(test)]
mod tests {
    use clearquote_core::ConversationState;
    use clearquote_db::{connect_with_settings, migrations, ConversationStore};

    use super::{apply_take_over, InteractionPayload, TakeOverOutcome};

    async fn store() -> ConversationStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        ConversationStore::new(pool)
    }

    fn take_over_payload(value: &str) -> InteractionPayload {
        serde_json::from_str(&format!(
            r#"{{"type":"block_actions",
                 "user":{{"id":"U123","username":"adriana"}},
                 "actions":[{{"action_id":"take_over_chat","value":"{value}"}}]}}"#
        ))
        .expect("payload decode")
    }

    #[tokio::test]
    async fn take_over_pauses_an_active_conversation() {
        let store = store().await;
        store.ensure_conversation("14165551234").await.expect("seed");

        let outcome =
            apply_take_over(&store, &take_over_payload("14165551234")).await.expect("apply");

        assert_eq!(outcome, TakeOverOutcome::Paused { operator: "adriana".to_string() });
        assert!(outcome.response_text().expect("text").contains("adriana"));
        let state = store.conversation_state("14165551234").await.expect("state");
        assert_eq!(state, Some(ConversationState::Paused));
    }

    #[tokio::test]
    async fn repeated_take_over_reports_already_paused_without_mutation() {
        let store = store().await;
        store.ensure_conversation("14165551234").await.expect("seed");
        store.pause_conversation("14165551234").await.expect("pause");

        let outcome =
            apply_take_over(&store, &take_over_payload("14165551234")).await.expect("apply");

        assert_eq!(outcome, TakeOverOutcome::AlreadyPaused);
        assert!(outcome.response_text().expect("text").contains("already paused"));
    }

    #[tokio::test]
    async fn unknown_conversation_reports_not_found() {
        let store = store().await;

        let outcome =
            apply_take_over(&store, &take_over_payload("99999999999")).await.expect("apply");

        assert_eq!(outcome, TakeOverOutcome::NotFound);
        assert!(outcome.response_text().expect("text").contains("not found"));
    }

    #[tokio::test]
    async fn unrelated_action_is_acknowledged_with_no_effect() {
        let store = store().await;
        store.ensure_conversation("14165551234").await.expect("seed");

        let payload: InteractionPayload = serde_json::from_str(
            r#"{"type":"block_actions",
                "user":{"id":"U123","username":"adriana"},
                "actions":[{"action_id":"open_dashboard","value":"14165551234"}]}"#,
        )
        .expect("payload decode");

        let outcome = apply_take_over(&store, &payload).await.expect("apply");
        assert_eq!(outcome, TakeOverOutcome::Ignored);
        assert_eq!(outcome.response_text(), None);
        let state = store.conversation_state("14165551234").await.expect("state");
        assert_eq!(state, Some(ConversationState::Active));
    }
}
