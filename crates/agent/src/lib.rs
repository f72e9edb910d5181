//! Conversational pipeline: per-conversation locking, LLM invocation
//! with fallback, and action dispatch.

pub mod llm;
pub mod locks;
pub mod pipeline;
pub mod prompt;

pub use llm::{DeepSeekClient, LlmClient, LlmError};
pub use locks::ConversationLocks;
pub use pipeline::InboundPipeline;
