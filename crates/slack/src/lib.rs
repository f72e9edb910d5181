//! Slack escalation channel.
//!
//! Outbound: handoff notifications posted to an incoming webhook with a
//! "Take Over Chat" button (`blocks`, `notifier`). Inbound: the
//! interactive callback fired when an operator presses that button
//! (`interaction`) transitions the conversation to PAUSED.

pub mod blocks;
pub mod interaction;
pub mod notifier;

pub use interaction::{InteractionAction, InteractionPayload, InteractionUser, TakeOverOutcome};
pub use notifier::{EscalationNotifier, NotifyError, WebhookNotifier};
