use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Per-conversation execution locks. Lock objects are created on first
/// use and retained for the process lifetime; cardinality is bounded by
/// real customers, not adversarial input. Owned by whoever constructs
/// the pipeline and passed in as a collaborator, so tests and multiple
/// pipeline instances stay isolated.
#[derive(Default)]
pub struct ConversationLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert-if-absent; the returned handle serializes all pipeline
    /// executions for one conversation identifier.
    pub fn lock_for(&self, conversation_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut table = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(table.entry(conversation_id.to_string()).or_default())
    }
}
