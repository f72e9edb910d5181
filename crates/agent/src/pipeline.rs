//! The inbound-message pipeline.
//!
//! Per message: LOCKED -> DEDUPLICATED -> STATE-CHECKED ->
//! PERSISTED-INBOUND -> MODEL-INVOKED -> PERSISTED-OUTBOUND ->
//! DISPATCHED. The HTTP acknowledgment has already been sent by the
//! time this code runs, so every gate failure is logged and absorbed;
//! nothing here propagates back to the transport layer.

use std::sync::Arc;
use std::time::Duration;

use clearquote_core::{AgentAction, AgentReply, ConversationState, Message};
use clearquote_db::{ConversationStore, StoreError};
use clearquote_slack::notifier::EscalationNotifier;
use clearquote_whatsapp::payload::{InboundMessage, WebhookPayload};
use clearquote_whatsapp::sender::ReplySender;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::llm::LlmClient;
use crate::locks::ConversationLocks;

/// Transcript context window handed to the model.
pub const HISTORY_WINDOW: u32 = 20;

pub const UNSUPPORTED_TYPE_REPLY: &str = "Sorry, I can only handle text messages right now.";

/// Sent while an operator has taken over; the model is never consulted.
pub const PAUSED_REPLY: &str =
    "Our team is handling your request directly. We'll be in touch shortly!";

pub const SCHEDULING_LINK: &str = "https://bookings.clearquote.io/assessment";

pub struct InboundPipeline {
    store: ConversationStore,
    llm: Arc<dyn LlmClient>,
    sender: Arc<dyn ReplySender>,
    notifier: Arc<dyn EscalationNotifier>,
    locks: Arc<ConversationLocks>,
    system_prompt: String,
    model_timeout: Duration,
}

impl InboundPipeline {
    pub fn new(
        store: ConversationStore,
        llm: Arc<dyn LlmClient>,
        sender: Arc<dyn ReplySender>,
        notifier: Arc<dyn EscalationNotifier>,
        locks: Arc<ConversationLocks>,
        system_prompt: String,
        model_timeout: Duration,
    ) -> Self {
        Self { store, llm, sender, notifier, locks, system_prompt, model_timeout }
    }

    /// Entry point for the detached processing task spawned after the
    /// webhook acknowledgment.
    pub async fn process_payload(&self, raw_body: &[u8]) {
        let payload: WebhookPayload = match serde_json::from_slice(raw_body) {
            Ok(payload) => payload,
            Err(error) => {
                warn!(error = %error, "unparsable webhook payload, dropping");
                return;
            }
        };

        let mut seen_any = false;
        for message in payload.messages() {
            seen_any = true;
            self.handle_message(message).await;
        }
        if !seen_any {
            debug!("no message entries in payload (delivery receipt), nothing to do");
        }
    }

    async fn handle_message(&self, inbound: &InboundMessage) {
        let Some(text) = inbound.text_body() else {
            info!(
                message_id = %inbound.id,
                from = %inbound.from,
                kind = %inbound.kind,
                "ignoring non-text message"
            );
            self.send_reply(&inbound.from, UNSUPPORTED_TYPE_REPLY).await;
            return;
        };

        // Serialize everything stateful for this conversation. Two
        // near-simultaneous messages from the same party must never
        // race on history reads, state checks, or dedup lookups.
        let lock = self.locks.lock_for(&inbound.from);
        let _guard = lock.lock().await;

        if let Err(error) = self.handle_text_message(inbound, text).await {
            error!(
                message_id = %inbound.id,
                conversation_id = %inbound.from,
                error = %error,
                "message processing aborted"
            );
        }
    }

    async fn handle_text_message(
        &self,
        inbound: &InboundMessage,
        text: &str,
    ) -> Result<(), StoreError> {
        let conversation_id = inbound.from.as_str();

        if self.store.message_exists(&inbound.id).await? {
            debug!(message_id = %inbound.id, "duplicate delivery, skipping");
            return Ok(());
        }

        self.store.ensure_conversation(conversation_id).await?;

        let state = self
            .store
            .conversation_state(conversation_id)
            .await?
            .unwrap_or(ConversationState::Active);
        if state == ConversationState::Paused {
            // Record the inbound message for the audit trail, but keep
            // the model out of a conversation a human has taken over.
            self.store.insert_message(&Message::user(inbound.id.as_str(), conversation_id, text)).await?;
            info!(conversation_id, "conversation is paused, sending static reply");
            self.send_reply(conversation_id, PAUSED_REPLY).await;
            return Ok(());
        }

        self.store.insert_message(&Message::user(inbound.id.as_str(), conversation_id, text)).await?;

        let history = self.store.recent_messages(conversation_id, HISTORY_WINDOW).await?;
        let reply = self.invoke_model(conversation_id, &history).await;

        let assistant = Message::assistant(
            format!("assistant-{conversation_id}-{}", Uuid::new_v4().simple()),
            conversation_id,
            reply.reply_to_user.clone(),
        );
        if let Err(error) = self.store.insert_message(&assistant).await {
            warn!(conversation_id, error = %error, "failed to persist assistant reply");
        }
        if let Err(error) =
            self.store.upsert_extracted_data(conversation_id, &reply.extracted_data).await
        {
            warn!(conversation_id, error = %error, "failed to persist extracted data");
        }

        self.dispatch(conversation_id, &reply).await;
        Ok(())
    }

    async fn invoke_model(&self, conversation_id: &str, history: &[Message]) -> AgentReply {
        match tokio::time::timeout(
            self.model_timeout,
            self.llm.complete(&self.system_prompt, history),
        )
        .await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(error)) => {
                warn!(conversation_id, error = %error, "model call failed, using fallback reply");
                AgentReply::fallback()
            }
            Err(_) => {
                warn!(conversation_id, "model call exceeded deadline, using fallback reply");
                AgentReply::fallback()
            }
        }
    }

    async fn dispatch(&self, conversation_id: &str, reply: &AgentReply) {
        match reply.action {
            AgentAction::Handoff => {
                if let Err(error) =
                    self.notifier.notify_handoff(conversation_id, &reply.extracted_data).await
                {
                    warn!(
                        conversation_id,
                        error = %error,
                        "escalation notification failed, sending reply anyway"
                    );
                }
                self.send_reply(conversation_id, &reply.reply_to_user).await;
            }
            AgentAction::Schedule => {
                let with_link = format!(
                    "{}\n\nYou can pick a time for an on-site assessment here: {SCHEDULING_LINK}",
                    reply.reply_to_user
                );
                self.send_reply(conversation_id, &with_link).await;
            }
            AgentAction::Continue => {
                self.send_reply(conversation_id, &reply.reply_to_user).await;
            }
        }
    }

    async fn send_reply(&self, to: &str, body: &str) {
        if let Err(error) = self.sender.send_text(to, body).await {
            warn!(conversation_id = %to, error = %error, "outbound send failed");
        }
    }
}
