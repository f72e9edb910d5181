//! Minimal Block Kit builders for the escalation notification.

use clearquote_core::ExtractedData;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum TextObject {
    #[serde(rename = "plain_text")]
    Plain { text: String },
    #[serde(rename = "mrkdwn")]
    Mrkdwn { text: String },
}

impl TextObject {
    pub fn plain(text: impl Into<String>) -> Self {
        Self::Plain { text: text.into() }
    }

    pub fn mrkdwn(text: impl Into<String>) -> Self {
        Self::Mrkdwn { text: text.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ButtonElement {
    #[serde(rename = "type")]
    kind: &'static str,
    pub action_id: String,
    pub text: TextObject,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl ButtonElement {
    pub fn new(action_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self { kind: "button", action_id: action_id.into(), text: TextObject::plain(label), value: None }
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Section { text: TextObject },
    Actions { elements: Vec<ButtonElement> },
}

/// A complete webhook message: plain-text fallback plus rich blocks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NotificationMessage {
    pub text: String,
    pub blocks: Vec<Block>,
}

pub struct MessageBuilder {
    text: String,
    blocks: Vec<Block>,
}

impl MessageBuilder {
    pub fn new(fallback_text: impl Into<String>) -> Self {
        Self { text: fallback_text.into(), blocks: Vec::new() }
    }

    pub fn section(mut self, text: TextObject) -> Self {
        self.blocks.push(Block::Section { text });
        self
    }

    pub fn actions(mut self, elements: Vec<ButtonElement>) -> Self {
        self.blocks.push(Block::Actions { elements });
        self
    }

    pub fn build(self) -> NotificationMessage {
        NotificationMessage { text: self.text, blocks: self.blocks }
    }
}

/// The handoff notification: extracted quote fields plus the take-over
/// button whose value carries the conversation identifier.
pub fn handoff_notification(conversation_id: &str, extracted: &ExtractedData) -> NotificationMessage {
    let mut summary = format!("*New Quote Request*\n*Phone:* {conversation_id}");
    if extracted.is_empty() {
        summary.push_str("\n_(no quote details extracted yet)_");
    } else {
        for (field, value) in extracted {
            summary.push_str(&format!("\n*{}:* {value}", field_label(field)));
        }
    }

    MessageBuilder::new(format!("New Quote Request from +{conversation_id}"))
        .section(TextObject::mrkdwn(summary))
        .actions(vec![ButtonElement::new(
            crate::interaction::TAKE_OVER_ACTION,
            "Take Over Chat",
        )
        .value(conversation_id)])
        .build()
}

fn field_label(field: &str) -> String {
    let mut label = String::with_capacity(field.len());
    for (i, part) in field.split('_').enumerate() {
        if i > 0 {
            label.push(' ');
        }
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            label.extend(first.to_uppercase());
            label.push_str(chars.as_str());
        }
    }
    label
}
