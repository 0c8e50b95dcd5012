//! 记忆层：单用户对话历史与按用户划分的存储

pub mod conversation;
pub mod store;

pub use conversation::{ConversationMemory, Message, Role, ToolCallRequest};
pub use store::{ConversationStore, OwnedConversation};
