use serde::Deserialize;

/// Inbound webhook payload. Every level defaults to empty so
/// delivery-receipt callbacks (which carry `statuses` instead of
/// `messages`) decode cleanly to a payload with no messages.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub entry: Vec<Entry>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub changes: Vec<Change>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Change {
    #[serde(default)]
    pub value: ChangeValue,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ChangeValue {
    #[serde(default)]
    pub messages: Vec<InboundMessage>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct InboundMessage {
    /// Sender phone number; doubles as the conversation identifier.
    pub from: String,
    /// Provider-assigned message id (`wamid.*`); the idempotency key.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<TextBody>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TextBody {
    pub body: String,
}

impl WebhookPayload {
    /// All messages across entries and changes; a single callback may
    /// batch several.
    pub fn messages(&self) -> impl Iterator<Item = &InboundMessage> {
        self.entry
            .iter()
            .flat_map(|entry| entry.changes.iter())
            .flat_map(|change| change.value.messages.iter())
    }
}

impl InboundMessage {
    /// The text body, present only for plain text messages.
    pub fn text_body(&self) -> Option<&str> {
        if self.kind != "text" {
            return None;
        }
        self.text.as_ref().map(|text| text.body.as_str())
    }
}
