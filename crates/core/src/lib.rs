pub mod config;
pub mod domain;
pub mod signature;

pub use domain::conversation::ConversationState;
pub use domain::message::{Message, MessageRole};
pub use domain::reply::{AgentAction, AgentReply, ExtractedData};
